pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{candidate_paths, discover, load, read_config};
pub use types::{Config, LogLevel, Settings};
