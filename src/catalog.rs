//! Catalog of guides and packages the gateway can validate against.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GatewayError, Result};

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    pub canonical_url: String,
}

/// Parse comma-separated `name#version` tokens.
///
/// A token without `#` (or with nothing after it) refers to the latest
/// version. Blank tokens are skipped. Canonical URLs are
/// `<registry>/<name>/<version>`, without the version segment for latest.
pub fn parse_catalog(tokens: &str, registry: &str) -> Result<Vec<CatalogEntry>> {
    let registry = Url::parse(registry)?;
    tokens
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let (name, version) = match token.split_once('#') {
                Some((name, version)) if !version.trim().is_empty() => (name.trim(), version.trim()),
                Some((name, _)) => (name.trim(), LATEST),
                None => (token, LATEST),
            };
            if name.is_empty() {
                return Err(GatewayError::configuration(format!(
                    "catalog token '{token}' has no package name"
                )));
            }
            Ok(CatalogEntry {
                name: name.to_string(),
                version: version.to_string(),
                canonical_url: canonical_url(&registry, name, version)?,
            })
        })
        .collect()
}

fn canonical_url(registry: &Url, name: &str, version: &str) -> Result<String> {
    let mut url = registry.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            GatewayError::configuration(format!("registry URL {registry} cannot carry a path"))
        })?;
        segments.pop_if_empty().push(name);
        if version != LATEST {
            segments.push(version);
        }
    }
    Ok(url.to_string())
}
