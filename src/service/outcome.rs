//! Response shapes: the raw issue array and the OperationOutcome envelope.

use serde::{Deserialize, Serialize};

use crate::core::types::{Issue, ResolvedVersion, SessionKey, ValidationReport};
use crate::error::Result;

pub const LINE_AND_COL_EXTENSION: &str = "urn:local:line-and-col";
pub const LINE_EXTENSION: &str = "urn:local:line";
pub const COL_EXTENSION: &str = "urn:local:col";
pub const FORMATTED_RESOURCE_EXTENSION: &str = "urn:local:formattedResourceBody";

/// Result of one validation call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub issues: ValidationReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_resource: Option<String>,
    /// Identity of the engine that served the call, for reuse on later calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ResolvedVersion>,
}

impl ValidationResponse {
    pub fn new(issues: ValidationReport) -> Self {
        Self {
            issues,
            formatted_resource: None,
            session_key: None,
            version: None,
        }
    }

    pub fn into_outcome(self) -> OperationOutcome {
        OperationOutcome::from_response(self)
    }

    pub fn render(self, shape: ResponseShape) -> Result<serde_json::Value> {
        Ok(match shape {
            ResponseShape::Issues => serde_json::to_value(self)?,
            ResponseShape::OperationOutcome => serde_json::to_value(self.into_outcome())?,
        })
    }
}

/// Wire layout requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseShape {
    #[default]
    Issues,
    OperationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    pub issue: Vec<OutcomeIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeIssue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    pub severity: String,
    pub code: String,
    pub diagnostics: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

impl Extension {
    fn integer(url: &str, value: u32) -> Self {
        Self {
            url: url.to_string(),
            extension: Vec::new(),
            value_integer: Some(value),
            value_string: None,
        }
    }

    fn string(url: &str, value: String) -> Self {
        Self {
            url: url.to_string(),
            extension: Vec::new(),
            value_integer: None,
            value_string: Some(value),
        }
    }

    fn nested(url: &str, extension: Vec<Extension>) -> Self {
        Self {
            url: url.to_string(),
            extension,
            value_integer: None,
            value_string: None,
        }
    }
}

impl OperationOutcome {
    pub fn from_response(response: ValidationResponse) -> Self {
        let mut extension = Vec::new();
        if let Some(body) = response.formatted_resource {
            extension.push(Extension::string(FORMATTED_RESOURCE_EXTENSION, body));
        }
        Self {
            resource_type: "OperationOutcome".to_string(),
            extension,
            issue: response.issues.iter().map(OutcomeIssue::from).collect(),
        }
    }
}

impl From<&Issue> for OutcomeIssue {
    fn from(issue: &Issue) -> Self {
        let extension = match (issue.location.line(), issue.location.column()) {
            (Some(line), Some(column)) => vec![Extension::nested(
                LINE_AND_COL_EXTENSION,
                vec![
                    Extension::integer(LINE_EXTENSION, line),
                    Extension::integer(COL_EXTENSION, column),
                ],
            )],
            _ => Vec::new(),
        };
        let code = if issue.is_all_ok() {
            "informational"
        } else {
            "processing"
        };
        Self {
            extension,
            severity: issue.severity.fhir_code().to_string(),
            code: code.to_string(),
            diagnostics: issue.message.clone(),
            expression: if issue.path.is_empty() {
                Vec::new()
            } else {
                vec![issue.path.clone()]
            },
            location: vec![issue.location.to_string()],
        }
    }
}
