//! Public API for configuration

pub mod keywords;
pub mod loader;
pub mod model;
pub mod validate;

// Re-export the main entrypoints:
pub use loader::{load_master_config, parse_master_config, CONFIG_FILE_NAME};
pub use model::{
    CollectorConfig, CollectorType, ConfigError, MasterConfig, Provider, RawCollector, TraceLevel, ValidationError,
};
pub use validate::{check_invariants, validate_all, validate_collector};
