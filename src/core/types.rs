use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::config::FhirVersion;

/// Engine-assigned issue criticality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Note,
    Information,
}

impl Severity {
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Fatal,
            Severity::Error,
            Severity::Warning,
            Severity::Note,
            Severity::Information,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "Fatal",
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Note => "Note",
            Severity::Information => "Information",
        }
    }

    /// OperationOutcome `issue.severity` code. FHIR has no "note" severity,
    /// so notes are reported as information.
    pub fn fhir_code(&self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note | Severity::Information => "information",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Fatal | Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::all()
            .iter()
            .copied()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown severity '{s}'"))
    }
}

/// Text used for an issue whose position in the document is not known.
pub const UNKNOWN_LOCATION: &str = "??";

/// Position of an issue inside the validated document.
///
/// `Unknown` is the only representation of "no location": it renders as `??`
/// in text and on the wire, and is never collapsed into line 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    At {
        line: u32,
        column: u32,
    },
    #[default]
    Unknown,
}

impl Location {
    pub fn at(line: u32, column: u32) -> Self {
        Location::At { line, column }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            Location::At { line, .. } => Some(*line),
            Location::Unknown => None,
        }
    }

    pub fn column(&self) -> Option<u32> {
        match self {
            Location::At { column, .. } => Some(*column),
            Location::Unknown => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::At { line, column } => write!(f, "(line {line}, col{column})"),
            Location::Unknown => f.write_str(UNKNOWN_LOCATION),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Location::At { line, column } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("line", line)?;
                map.serialize_entry("column", column)?;
                map.end()
            }
            Location::Unknown => serializer.serialize_str(UNKNOWN_LOCATION),
        }
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LocationVisitor;

        impl<'de> Visitor<'de> for LocationVisitor {
            type Value = Location;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a {line, column} object or the string \"??\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Location, E> {
                if value == UNKNOWN_LOCATION {
                    Ok(Location::Unknown)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(value), &self))
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<Location, E> {
                Ok(Location::Unknown)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Location, A::Error> {
                let mut line = None;
                let mut column = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "line" => line = Some(map.next_value()?),
                        "column" | "col" => column = Some(map.next_value()?),
                        _ => {
                            map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }
                match (line, column) {
                    (Some(line), Some(column)) => Ok(Location::At { line, column }),
                    _ => Ok(Location::Unknown),
                }
            }
        }

        deserializer.deserialize_any(LocationVisitor)
    }
}

/// One normalized diagnostic reported by the validation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    #[serde(rename = "fhirPath")]
    pub path: String,
    pub location: Location,
    pub message: String,
}

/// Message carried by the issue that stands for an all-clear run.
pub const ALL_OK_MESSAGE: &str = "ALL OK";

impl Issue {
    pub fn new(
        severity: Severity,
        path: impl Into<String>,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            path: path.into(),
            location,
            message: message.into(),
        }
    }

    pub fn without_location(
        severity: Severity,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(severity, path, Location::Unknown, message)
    }

    pub fn all_ok() -> Self {
        Self::without_location(Severity::Information, "", ALL_OK_MESSAGE)
    }

    pub fn is_all_ok(&self) -> bool {
        self.severity == Severity::Information && self.message == ALL_OK_MESSAGE
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() {
            UNKNOWN_LOCATION
        } else {
            &self.path
        };
        match self.location {
            Location::At { .. } => {
                write!(f, "{} @ {} {}: {}", self.severity, path, self.location, self.message)
            }
            Location::Unknown => write!(f, "{} @ {}: {}", self.severity, path, self.message),
        }
    }
}

/// Ordered issues of one validation run, in engine emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationReport {
    issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Issue> {
        self.issues.iter()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_error())
    }

    /// True when the engine reported nothing but the all-clear sentinel.
    pub fn is_all_ok(&self) -> bool {
        self.issues.len() == 1 && self.issues[0].is_all_ok()
    }
}

impl From<Vec<Issue>> for ValidationReport {
    fn from(issues: Vec<Issue>) -> Self {
        Self { issues }
    }
}

impl IntoIterator for ValidationReport {
    type Item = Issue;
    type IntoIter = std::vec::IntoIter<Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationReport {
    type Item = &'a Issue;
    type IntoIter = std::slice::Iter<'a, Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.iter()
    }
}

/// Declared wire format of the document under validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Json,
    Xml,
}

pub const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/fhir+json",
    "application/xml",
    "application/fhir+xml",
];

impl DocumentFormat {
    /// Resolve a declared content type. Mime parameters such as
    /// `; charset=utf-8` are ignored, as is case.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" | "application/fhir+json" | "json" => Some(DocumentFormat::Json),
            "application/xml" | "application/fhir+xml" | "xml" => Some(DocumentFormat::Xml),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "json",
            DocumentFormat::Xml => "xml",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "application/fhir+json",
            DocumentFormat::Xml => "application/fhir+xml",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Opaque identifier letting a caller reuse a previously built engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Mint a fresh key for a caller that did not present one.
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One validation pass handed to an invoker.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub document: Vec<u8>,
    pub format: DocumentFormat,
    /// Target profiles, in caller order.
    pub profiles: Vec<String>,
    pub timeout: Duration,
    /// Resource type of the document, when known. Used to name scratch files.
    pub resource_type: Option<String>,
}

impl InvocationRequest {
    pub fn new(document: impl Into<Vec<u8>>, format: DocumentFormat, timeout: Duration) -> Self {
        Self {
            document: document.into(),
            format,
            profiles: Vec::new(),
            timeout,
            resource_type: None,
        }
    }

    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }
}

/// What a successful engine run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// Captured human-oriented report text (subprocess mode).
    Text(String),
    /// Structured issues returned by an in-process engine.
    Issues(Vec<Issue>),
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(EngineOutput),
    ProcessFailure(String),
    TimedOut { budget: Duration },
    IoFailure(String),
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success(_))
    }
}

/// Resolved schema version together with how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSource {
    Pinned,
    Detected,
    EngineDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVersion {
    pub version: FhirVersion,
    pub source: VersionSource,
}
