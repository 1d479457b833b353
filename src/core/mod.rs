pub mod config;
pub mod types;

pub use self::config::{
    CacheConfig, EngineConfig, FhirVersion, GatewayConfig, InvocationMode, LoggingConfig,
    ReportConfig, ValidationDefaults,
};
pub use self::types::*;
