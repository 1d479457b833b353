use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::report::GrammarVariant;

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// How the validation engine is built and invoked
    #[serde(default)]
    pub engine: EngineConfig,

    /// Engine cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Defaults applied to incoming validation requests
    #[serde(default)]
    pub validation: ValidationDefaults,

    /// Report grammar settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FhirVersion {
    #[serde(rename = "3.0.2")]
    R3,
    #[serde(rename = "4.0.1")]
    R4,
    #[serde(rename = "4.3.0")]
    R4B,
    #[serde(rename = "5.0.0")]
    R5,
    #[serde(rename = "6.0.0-ballot3")]
    R6,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvocationMode {
    /// Launch the validator as an external process per request
    #[default]
    Subprocess,
    /// Call a long-lived in-process engine
    Direct,
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: InvocationMode,

    /// Program launched in subprocess mode
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the document path
    #[serde(default = "default_program_args")]
    pub args: Vec<String>,

    /// Directory holding the validator artifact; the child runs there
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Where request-scoped scratch files are created (system temp dir if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Wall-clock budget per validation run in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Time allowed for a killed child to be reaped, in seconds
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// Exit codes treated as a completed run
    #[serde(default = "default_accepted_exit_codes")]
    pub accepted_exit_codes: Vec<i32>,
}

/// Engine cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Idle time after which a cached engine is discarded, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Sweep expired engines at the start of every request
    #[serde(default = "default_true")]
    pub sweep_on_request: bool,
}

/// Request defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDefaults {
    /// Version used when neither the caller nor the document names one
    #[serde(default = "default_native_version")]
    pub native_version: FhirVersion,

    /// Guides loaded when the caller supplies no guide selector
    #[serde(default = "default_guides")]
    pub default_guides: Vec<String>,

    /// Comma-separated `name#version` tokens exposed by the catalog
    #[serde(default = "default_catalog")]
    pub catalog: String,

    /// Package registry used to derive canonical URLs for catalog entries
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Attach the normalized document to responses unless the caller says otherwise
    #[serde(default)]
    pub include_formatted_resource: bool,
}

/// Report grammar settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub variant: GrammarVariant,

    /// Yield an empty report when the summary banner is missing instead of
    /// scanning the whole output
    #[serde(default)]
    pub require_banner: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl GatewayConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Environment variables use the `FHIR_GATEWAY` prefix with `__` between
    /// path segments, e.g. `FHIR_GATEWAY__ENGINE__TIMEOUT_SECS=120`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FHIR_GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.timeout_secs == 0 {
            return Err(GatewayError::configuration(
                "engine.timeout_secs must be greater than 0",
            ));
        }

        if self.engine.mode == InvocationMode::Subprocess && self.engine.program.trim().is_empty()
        {
            return Err(GatewayError::configuration(
                "engine.program is required in subprocess mode",
            ));
        }

        if self.engine.accepted_exit_codes.is_empty() {
            return Err(GatewayError::configuration(
                "engine.accepted_exit_codes must name at least one exit code",
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(GatewayError::configuration(
                "cache.ttl_secs must be greater than 0",
            ));
        }

        url::Url::parse(&self.validation.registry_url)?;

        Ok(())
    }

    pub fn with_mode(mut self, mode: InvocationMode) -> Self {
        self.engine.mode = mode;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: InvocationMode::default(),
            program: default_program(),
            args: default_program_args(),
            working_dir: None,
            scratch_dir: None,
            timeout_secs: default_timeout_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            accepted_exit_codes: default_accepted_exit_codes(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_on_request: default_true(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs().max(1);
        self
    }
}

impl Default for ValidationDefaults {
    fn default() -> Self {
        Self {
            native_version: default_native_version(),
            default_guides: default_guides(),
            catalog: default_catalog(),
            registry_url: default_registry_url(),
            include_formatted_resource: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl std::fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.package_version())
    }
}

impl FhirVersion {
    /// Get all supported FHIR versions
    pub fn all() -> &'static [FhirVersion] {
        &[
            FhirVersion::R3,
            FhirVersion::R4,
            FhirVersion::R4B,
            FhirVersion::R5,
            FhirVersion::R6,
        ]
    }

    /// Get the core package name for this FHIR version
    pub fn package_name(&self) -> &'static str {
        match self {
            FhirVersion::R3 => "hl7.fhir.r3.core",
            FhirVersion::R4 => "hl7.fhir.r4.core",
            FhirVersion::R4B => "hl7.fhir.r4b.core",
            FhirVersion::R5 => "hl7.fhir.r5.core",
            FhirVersion::R6 => "hl7.fhir.r6.core",
        }
    }

    /// Get the core package version for this FHIR version
    pub fn package_version(&self) -> &'static str {
        match self {
            FhirVersion::R3 => "3.0.2",
            FhirVersion::R4 => "4.0.1",
            FhirVersion::R4B => "4.3.0",
            FhirVersion::R5 => "5.0.0",
            FhirVersion::R6 => "6.0.0-ballot3",
        }
    }

    /// Get a short identifier for this version (e.g., "r4", "r4b")
    pub fn short_name(&self) -> &'static str {
        match self {
            FhirVersion::R3 => "r3",
            FhirVersion::R4 => "r4",
            FhirVersion::R4B => "r4b",
            FhirVersion::R5 => "r5",
            FhirVersion::R6 => "r6",
        }
    }

    /// Interpret a version string such as `4.0.1`, `4.0`, `R4B` or `r5`.
    ///
    /// Only major.minor is significant; patch levels and ballot suffixes are
    /// ignored.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(version) = FhirVersion::all()
            .iter()
            .find(|v| v.short_name().eq_ignore_ascii_case(value))
        {
            return Some(*version);
        }

        let mut parts = value.split(['.', '-']);
        let major = parts.next()?;
        let minor = parts.next().unwrap_or("0");
        match (major, minor) {
            ("3", "0") => Some(FhirVersion::R3),
            ("4", "0") => Some(FhirVersion::R4),
            ("4", "1") | ("4", "3") => Some(FhirVersion::R4B),
            ("4", "2") | ("4", "4") | ("4", "5") | ("4", "6") | ("5", "0") => Some(FhirVersion::R5),
            ("6", _) => Some(FhirVersion::R6),
            _ => None,
        }
    }

    /// Version implied by a core package selector such as `hl7.fhir.r4.core#4.0.1`
    pub fn from_core_package(selector: &str) -> Option<Self> {
        let name = selector.split('#').next().unwrap_or(selector).trim();
        FhirVersion::all()
            .iter()
            .find(|v| v.package_name() == name)
            .copied()
    }
}

// Default value functions
fn default_program() -> String { "java".to_string() }
fn default_program_args() -> Vec<String> {
    vec!["-jar".to_string(), "validator_cli.jar".to_string()]
}
fn default_timeout_secs() -> u64 { 240 } // 4 minutes
fn default_kill_grace_secs() -> u64 { 5 }
fn default_accepted_exit_codes() -> Vec<i32> { vec![0] }
fn default_ttl_secs() -> u64 { 30 * 86400 } // 30 days
fn default_true() -> bool { true }
fn default_native_version() -> FhirVersion { FhirVersion::R5 }
fn default_guides() -> Vec<String> { vec!["hl7.fhir.us.mdi#current".to_string()] }
fn default_catalog() -> String { "hl7.fhir.us.mdi#current".to_string() }
fn default_registry_url() -> String { "https://packages.fhir.org".to_string() }
fn default_log_level() -> String { "info".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine.timeout(), Duration::from_secs(240));
        assert_eq!(config.cache.ttl(), Duration::from_secs(30 * 24 * 3600));
        assert_eq!(config.validation.native_version, FhirVersion::R5);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = GatewayConfig::default();
        config.engine.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_program_rejected_only_in_subprocess_mode() {
        let mut config = GatewayConfig::default();
        config.engine.program = String::new();
        assert!(config.validate().is_err());

        let config = config.with_mode(InvocationMode::Direct);
        config.validate().unwrap();
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(FhirVersion::parse("4.0.1"), Some(FhirVersion::R4));
        assert_eq!(FhirVersion::parse("4.0"), Some(FhirVersion::R4));
        assert_eq!(FhirVersion::parse("4.3.0"), Some(FhirVersion::R4B));
        assert_eq!(FhirVersion::parse("R4B"), Some(FhirVersion::R4B));
        assert_eq!(FhirVersion::parse("5.0.0-snapshot1"), Some(FhirVersion::R5));
        assert_eq!(FhirVersion::parse("r6"), Some(FhirVersion::R6));
        assert_eq!(FhirVersion::parse("banana"), None);
    }

    #[test]
    fn test_core_package_selector() {
        assert_eq!(
            FhirVersion::from_core_package("hl7.fhir.r4.core#4.0.1"),
            Some(FhirVersion::R4)
        );
        assert_eq!(FhirVersion::from_core_package("hl7.fhir.us.core#6.1.0"), None);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(
            &path,
            r#"{"engine": {"timeout_secs": 120}, "validation": {"native_version": "4.0.1"}}"#,
        )
        .unwrap();

        let config = GatewayConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.timeout_secs, 120);
        assert_eq!(config.engine.program, "java");
        assert_eq!(config.validation.native_version, FhirVersion::R4);
    }
}
