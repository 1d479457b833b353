//! Schema version resolution for incoming documents.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::core::config::FhirVersion;
use crate::core::types::{DocumentFormat, ResolvedVersion, VersionSource};
use crate::error::ValidationFault;

static XML_FHIR_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:[\w-]+:)?fhirVersion\s+value\s*=\s*["']([^"']+)["']"#)
        .expect("fhirVersion pattern")
});

/// Picks the schema version a document is validated against.
///
/// An explicit pin wins. Otherwise the document's `fhirVersion` elements and
/// any core package among the guide selectors are collected; exactly one
/// distinct version is used as found, none falls back to the engine's native
/// version, and more than one is refused rather than guessed.
#[derive(Debug, Clone, Copy)]
pub struct VersionResolver {
    native: FhirVersion,
}

impl VersionResolver {
    pub fn new(native: FhirVersion) -> Self {
        Self { native }
    }

    pub fn resolve(
        &self,
        pinned: Option<&str>,
        document: &[u8],
        format: DocumentFormat,
        guides: &[String],
    ) -> Result<ResolvedVersion, ValidationFault> {
        if let Some(pin) = pinned.map(str::trim).filter(|p| !p.is_empty()) {
            let version = FhirVersion::parse(pin)
                .ok_or_else(|| ValidationFault::input(format!("Unsupported FHIR version '{pin}'")))?;
            return Ok(ResolvedVersion {
                version,
                source: VersionSource::Pinned,
            });
        }

        let mut found = scan_document(document, format)?;
        found.extend(guides.iter().filter_map(|g| FhirVersion::from_core_package(g)));

        let mut versions = found.into_iter();
        match (versions.next(), versions.next()) {
            (None, _) => {
                tracing::debug!(version = %self.native, "No version information found, using engine default");
                Ok(ResolvedVersion {
                    version: self.native,
                    source: VersionSource::EngineDefault,
                })
            }
            (Some(version), None) => {
                tracing::debug!(version = %version, "Detected document version");
                Ok(ResolvedVersion {
                    version,
                    source: VersionSource::Detected,
                })
            }
            (Some(first), Some(second)) => {
                let found = [first, second]
                    .into_iter()
                    .chain(versions)
                    .map(|v| v.package_version().to_string())
                    .collect();
                Err(ValidationFault::VersionAmbiguity { found })
            }
        }
    }
}

impl Default for VersionResolver {
    fn default() -> Self {
        Self::new(FhirVersion::R5)
    }
}

/// Versions named by `fhirVersion` elements anywhere in the document.
/// Values that name no known release are ignored.
pub fn scan_document(
    document: &[u8],
    format: DocumentFormat,
) -> Result<BTreeSet<FhirVersion>, ValidationFault> {
    let mut found = BTreeSet::new();
    match format {
        DocumentFormat::Json => {
            let value: Value = serde_json::from_slice(document)
                .map_err(|e| ValidationFault::input(format!("Document is not valid JSON: {e}")))?;
            collect_json(&value, &mut found);
        }
        DocumentFormat::Xml => {
            let text = String::from_utf8_lossy(document);
            found.extend(
                XML_FHIR_VERSION
                    .captures_iter(&text)
                    .filter_map(|caps| FhirVersion::parse(&caps[1])),
            );
        }
    }
    Ok(found)
}

fn collect_json(value: &Value, found: &mut BTreeSet<FhirVersion>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "fhirVersion" {
                    match child {
                        Value::String(s) => found.extend(FhirVersion::parse(s)),
                        Value::Array(items) => found.extend(
                            items
                                .iter()
                                .filter_map(Value::as_str)
                                .filter_map(FhirVersion::parse),
                        ),
                        _ => {}
                    }
                } else {
                    collect_json(child, found);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_json(item, found)),
        _ => {}
    }
}
