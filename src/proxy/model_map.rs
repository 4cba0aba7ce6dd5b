//! Alias to upstream model lookup, in both directions.

use std::collections::HashMap;

/// Immutable alias ↔ upstream model table, built once at startup.
///
/// Several aliases may target the same upstream model. The reverse table then
/// keeps whichever alias was inserted last, and since the source map has no
/// defined order that alias is not stable between runs.
#[derive(Debug, Clone, Default)]
pub struct ModelMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl ModelMap {
    pub fn new(mappings: HashMap<String, String>) -> Self {
        let reverse = mappings
            .iter()
            .map(|(alias, upstream)| (upstream.clone(), alias.clone()))
            .collect();
        Self {
            forward: mappings,
            reverse,
        }
    }

    /// Upstream identifier for a client alias.
    pub fn forward(&self, alias: &str) -> Option<&str> {
        self.forward.get(alias).map(String::as_str)
    }

    /// Client alias for an upstream identifier.
    pub fn reverse(&self, upstream: &str) -> Option<&str> {
        self.reverse.get(upstream).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ModelMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(alias, upstream)| (alias.into(), upstream.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lookup() {
        let map = ModelMap::from_iter([("gpt-4-my-alias", "gpt-4")]);
        assert_eq!(map.forward("gpt-4-my-alias"), Some("gpt-4"));
        assert_eq!(map.forward("gpt-4"), None);
    }

    #[test]
    fn test_reverse_lookup() {
        let map = ModelMap::from_iter([("fast", "claude-3-haiku"), ("smart", "claude-3-opus")]);
        assert_eq!(map.reverse("claude-3-opus"), Some("smart"));
        assert_eq!(map.reverse("claude-3-haiku"), Some("fast"));
        assert_eq!(map.reverse("smart"), None);
    }

    #[test]
    fn test_lookup_is_exact() {
        let map = ModelMap::from_iter([("alias", "gpt-4")]);
        assert_eq!(map.forward("Alias"), None);
        assert_eq!(map.forward("alias "), None);
    }

    #[test]
    fn test_colliding_aliases_reverse_to_one_of_them() {
        let map = ModelMap::from_iter([("a", "gpt-4"), ("b", "gpt-4")]);
        assert_eq!(map.len(), 2);
        let alias = map.reverse("gpt-4").unwrap();
        assert!(alias == "a" || alias == "b");
    }

    #[test]
    fn test_empty_map() {
        let map = ModelMap::default();
        assert!(map.is_empty());
        assert_eq!(map.forward("anything"), None);
    }
}
