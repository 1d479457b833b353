use regex::Regex;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use super::outcome::ValidationResponse;
use super::version::VersionResolver;
use crate::catalog::{self, CatalogEntry};
use crate::core::config::{GatewayConfig, InvocationMode, ValidationDefaults};
use crate::core::types::{
    ACCEPTED_CONTENT_TYPES, DocumentFormat, EngineOutput, InvocationRequest, InvocationResult,
    SessionKey, ValidationReport,
};
use crate::engine::{EngineCache, EngineFactory, EngineKey, ExternalEngineFactory};
use crate::error::{GatewayError, Result, ValidationFault};
use crate::invoker::{self, Invoker};
use crate::report::ReportParser;

static XML_ROOT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(?:<\?.*?\?>\s*)?(?:<!--.*?-->\s*)*<(?:[\w-]+:)?([A-Za-z]+)")
        .expect("root element pattern")
});

/// One inbound validation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    #[serde(with = "body")]
    pub document: Vec<u8>,
    pub content_type: String,
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Guide selectors; the configured default guides apply when empty.
    #[serde(default)]
    pub guides: Vec<String>,
    /// Explicit schema version pin.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub session_key: Option<SessionKey>,
    #[serde(default)]
    pub include_formatted_resource: Option<bool>,
}

impl ValidationRequest {
    pub fn new(document: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_guides(mut self, guides: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.guides = guides.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_session(mut self, session: SessionKey) -> Self {
        self.session_key = Some(session);
        self
    }

    pub fn with_formatted_resource(mut self, include: bool) -> Self {
        self.include_formatted_resource = Some(include);
        self
    }
}

/// Documents travel as text on the wire.
mod body {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

/// Coordinates one validation call from request to response.
///
/// Owns no engines itself: handles are borrowed from the injected
/// [`EngineCache`] for the duration of a call.
pub struct OrchestrationService {
    cache: Arc<EngineCache>,
    factory: Arc<dyn EngineFactory>,
    invoker: Arc<dyn Invoker>,
    parser: ReportParser,
    resolver: VersionResolver,
    defaults: ValidationDefaults,
    timeout: Duration,
    sweep_on_request: bool,
}

impl OrchestrationService {
    pub fn new(
        config: &GatewayConfig,
        cache: Arc<EngineCache>,
        factory: Arc<dyn EngineFactory>,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            cache,
            factory,
            invoker,
            parser: ReportParser::from_config(&config.report),
            resolver: VersionResolver::new(config.validation.native_version),
            defaults: config.validation.clone(),
            timeout: config.engine.timeout(),
            sweep_on_request: config.cache.sweep_on_request,
        }
    }

    /// Service running the configured external validator.
    ///
    /// Direct mode needs an in-process engine, which only the embedding
    /// application can provide; use [`OrchestrationService::with_engine`].
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        if config.engine.mode == InvocationMode::Direct {
            return Err(GatewayError::configuration(
                "direct mode requires an in-process engine factory",
            ));
        }
        Ok(Self::with_engine(
            config,
            Arc::new(ExternalEngineFactory::from_config(&config.engine)),
        ))
    }

    /// Service building engines through `factory`, invoked in the configured mode.
    pub fn with_engine(config: &GatewayConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self::new(
            config,
            Arc::new(EngineCache::new(&config.cache)),
            factory,
            invoker::from_config(&config.engine),
        )
    }

    pub fn cache(&self) -> &Arc<EngineCache> {
        &self.cache
    }

    pub fn invoker_mode(&self) -> InvocationMode {
        self.invoker.mode()
    }

    /// Guides and packages advertised by this gateway.
    pub fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        catalog::parse_catalog(&self.defaults.catalog, &self.defaults.registry_url)
    }

    /// Validate, rendering any fault as a single fatal issue.
    pub async fn respond(&self, request: ValidationRequest) -> ValidationResponse {
        let session = request
            .session_key
            .clone()
            .unwrap_or_else(SessionKey::mint);
        match self.run(request, session.clone()).await {
            Ok(response) => response,
            Err(fault) => {
                tracing::warn!(session = %session, kind = fault.kind().code(), error = %fault, "Validation failed");
                let mut response = ValidationResponse::new(fault.into_report());
                response.session_key = Some(session);
                response
            }
        }
    }

    pub async fn validate(
        &self,
        request: ValidationRequest,
    ) -> std::result::Result<ValidationResponse, ValidationFault> {
        let session = request
            .session_key
            .clone()
            .unwrap_or_else(SessionKey::mint);
        self.run(request, session).await
    }

    async fn run(
        &self,
        request: ValidationRequest,
        session: SessionKey,
    ) -> std::result::Result<ValidationResponse, ValidationFault> {
        let started = Instant::now();

        let format = DocumentFormat::from_content_type(&request.content_type).ok_or_else(|| {
            ValidationFault::input(format!(
                "Unsupported content type '{}'; expected one of {}",
                request.content_type,
                ACCEPTED_CONTENT_TYPES.join(", ")
            ))
        })?;
        if request.document.iter().all(u8::is_ascii_whitespace) {
            return Err(ValidationFault::input("Document body is empty"));
        }
        ensure_well_formed(&request.document, format)?;

        let guides = if request.guides.is_empty() {
            self.defaults.default_guides.clone()
        } else {
            request.guides.clone()
        };

        let resolved = self.resolver.resolve(
            request.version.as_deref(),
            &request.document,
            format,
            &guides,
        )?;
        tracing::info!(
            session = %session,
            version = %resolved.version,
            source = ?resolved.source,
            profiles = request.profiles.len(),
            "Validating document"
        );

        if self.sweep_on_request {
            self.cache.remove_expired();
        }

        let key = EngineKey::new(session.clone(), resolved.version, guides);
        let engine = self
            .cache
            .get_or_build(&key, self.factory.as_ref())
            .await
            .map_err(ValidationFault::from)?;

        let mut invocation = InvocationRequest::new(request.document.clone(), format, self.timeout)
            .with_profiles(request.profiles.iter().cloned());
        if let Some(resource_type) = resource_type(&request.document, format) {
            invocation = invocation.with_resource_type(resource_type);
        }

        let report = match self.invoker.run(&engine, &invocation).await {
            InvocationResult::Success(EngineOutput::Text(text)) => {
                let parsed = self.parser.parse_detailed(&text);
                if let Some(summary) = parsed.summary {
                    tracing::debug!(
                        errors = summary.errors,
                        warnings = summary.warnings,
                        notes = summary.notes,
                        "Validator summary"
                    );
                }
                parsed.report
            }
            InvocationResult::Success(EngineOutput::Issues(issues)) => ValidationReport::from(issues),
            InvocationResult::ProcessFailure(detail) => return Err(ValidationFault::Process(detail)),
            InvocationResult::TimedOut { budget } => return Err(ValidationFault::Timeout { budget }),
            InvocationResult::IoFailure(cause) => return Err(ValidationFault::Io(cause)),
        };

        let include = request
            .include_formatted_resource
            .unwrap_or(self.defaults.include_formatted_resource);
        let formatted_resource = include.then(|| {
            format_document(&request.document, format).unwrap_or_else(|fault| {
                tracing::warn!(session = %session, error = %fault, "Echoing the document unformatted");
                String::from_utf8_lossy(&request.document).into_owned()
            })
        });

        tracing::info!(
            session = %session,
            issues = report.len(),
            errors = report.has_errors(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Validation finished"
        );

        Ok(ValidationResponse {
            issues: report,
            formatted_resource,
            session_key: Some(session),
            version: Some(resolved),
        })
    }
}

impl std::fmt::Debug for OrchestrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationService")
            .field("mode", &self.invoker.mode())
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Reject JSON bodies that do not parse, whether or not a version was pinned.
fn ensure_well_formed(
    document: &[u8],
    format: DocumentFormat,
) -> std::result::Result<(), ValidationFault> {
    match format {
        DocumentFormat::Json => serde_json::from_slice::<IgnoredAny>(document)
            .map(|_| ())
            .map_err(|e| ValidationFault::input(format!("Document is not valid JSON: {e}"))),
        DocumentFormat::Xml => Ok(()),
    }
}

/// Resource type named by the document's root, if it has one.
pub fn resource_type(document: &[u8], format: DocumentFormat) -> Option<String> {
    match format {
        DocumentFormat::Json => serde_json::from_slice::<serde_json::Value>(document)
            .ok()?
            .get("resourceType")?
            .as_str()
            .map(str::to_string),
        DocumentFormat::Xml => {
            let text = String::from_utf8_lossy(document);
            XML_ROOT_ELEMENT
                .captures(&text)
                .map(|caps| caps[1].to_string())
        }
    }
}

/// Normalized form of the document for echoing back to the caller.
pub fn format_document(
    document: &[u8],
    format: DocumentFormat,
) -> std::result::Result<String, ValidationFault> {
    match format {
        DocumentFormat::Json => {
            let value: serde_json::Value = serde_json::from_slice(document)
                .map_err(|e| ValidationFault::input(format!("Document is not valid JSON: {e}")))?;
            serde_json::to_string_pretty(&value).map_err(|e| ValidationFault::Input(e.to_string()))
        }
        DocumentFormat::Xml => Ok(String::from_utf8_lossy(document).trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_extraction() {
        assert_eq!(
            resource_type(br#"{"resourceType":"Patient","id":"x"}"#, DocumentFormat::Json),
            Some("Patient".to_string())
        );
        assert_eq!(
            resource_type(
                br#"<?xml version="1.0"?><!-- sample --><Observation xmlns="http://hl7.org/fhir"/>"#,
                DocumentFormat::Xml
            ),
            Some("Observation".to_string())
        );
        assert_eq!(resource_type(b"[]", DocumentFormat::Json), None);
    }

    #[test]
    fn test_malformed_json_is_rejected_up_front() {
        let fault = ensure_well_formed(br#"{"resourceType":"Patient","#, DocumentFormat::Json).unwrap_err();
        assert_eq!(fault.kind(), crate::error::FaultKind::Input);
        assert!(ensure_well_formed(br#"{"resourceType":"Patient"}"#, DocumentFormat::Json).is_ok());
        assert!(ensure_well_formed(b"<Patient", DocumentFormat::Xml).is_ok());
    }

    #[test]
    fn test_format_document_pretty_prints_json() {
        let formatted = format_document(br#"{"resourceType":"Patient"}"#, DocumentFormat::Json).unwrap();
        assert_eq!(formatted, "{\n  \"resourceType\": \"Patient\"\n}");
    }

    #[test]
    fn test_request_wire_form() {
        let request: ValidationRequest = serde_json::from_value(serde_json::json!({
            "document": "{\"resourceType\":\"Patient\"}",
            "contentType": "application/fhir+json",
            "profiles": ["http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient"],
            "sessionKey": "abc"
        }))
        .unwrap();
        assert_eq!(request.session_key, Some(SessionKey::new("abc")));
        assert!(request.guides.is_empty());
        assert_eq!(request.document, br#"{"resourceType":"Patient"}"#.to_vec());
    }

    #[test]
    fn test_direct_mode_needs_engine_factory() {
        let config = GatewayConfig::default().with_mode(InvocationMode::Direct);
        assert!(OrchestrationService::from_config(&config).is_err());
        assert_eq!(
            OrchestrationService::from_config(&GatewayConfig::default())
                .unwrap()
                .invoker_mode(),
            InvocationMode::Subprocess
        );
    }
}
