use std::time::Duration;

use thiserror::Error;

use crate::core::types::{Issue, Severity, ValidationReport};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Stable category of a failed validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    Input,
    Io,
    Process,
    Timeout,
    VersionAmbiguity,
}

impl FaultKind {
    pub fn code(&self) -> &'static str {
        match self {
            FaultKind::Input => "INPUT_FAULT",
            FaultKind::Io => "IO_FAULT",
            FaultKind::Process => "PROCESS_FAULT",
            FaultKind::Timeout => "TIMEOUT_FAULT",
            FaultKind::VersionAmbiguity => "VERSION_AMBIGUITY_FAULT",
        }
    }
}

/// A validation run that could not produce a report.
///
/// None of these are retried internally. Every variant renders into the same
/// issue shape as a successful run via [`ValidationFault::into_report`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFault {
    #[error("Invalid request: {0}")]
    Input(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Validator process failed: {0}")]
    Process(String),

    #[error("Validation exceeded its {}s budget", .budget.as_secs())]
    Timeout { budget: Duration },

    #[error("Multiple FHIR versions found ({}); specify a version explicitly", .found.join(", "))]
    VersionAmbiguity { found: Vec<String> },
}

impl ValidationFault {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            ValidationFault::Input(_) => FaultKind::Input,
            ValidationFault::Io(_) => FaultKind::Io,
            ValidationFault::Process(_) => FaultKind::Process,
            ValidationFault::Timeout { .. } => FaultKind::Timeout,
            ValidationFault::VersionAmbiguity { .. } => FaultKind::VersionAmbiguity,
        }
    }

    /// Render the fault as a single fatal issue.
    pub fn into_report(self) -> ValidationReport {
        let message = self.to_string();
        ValidationReport::from(vec![Issue::without_location(
            Severity::Fatal,
            "",
            message,
        )])
    }
}

impl From<GatewayError> for ValidationFault {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Io(e) => ValidationFault::Io(e.to_string()),
            GatewayError::Serialization(e) => ValidationFault::Input(e.to_string()),
            other => ValidationFault::Process(other.to_string()),
        }
    }
}
