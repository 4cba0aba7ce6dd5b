//! Model-aliasing forwarding proxy for LLM HTTP APIs.
//!
//! Clients send requests naming a model alias; the proxy swaps in the
//! upstream model name, forwards to a single upstream, and maps the name
//! back in responses so clients only ever see their alias.

pub mod config;
pub mod proxy;
