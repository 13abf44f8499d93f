pub mod config;
pub mod engine;
pub mod executor;
pub mod geoip;
pub mod model;
pub mod service;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export common types for convenience
pub use config::{load_config, resolve_config_path, ConfigError, EngineConfig};
pub use engine::BatchEngine;
pub use executor::*;
pub use model::*;
pub use service::{BatchService, ServiceError, Submission};
pub use store::MemoryStore;
pub use traits::*;
