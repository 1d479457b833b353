//! # OctoFHIR IG Gateway
//!
//! Runs FHIR resources through an implementation-guide validation engine and
//! returns normalized, structured issues.
//!
//! ## Features
//!
//! - **Engine Cache**: Expensive engine builds are amortized per session, with TTL expiry and one build in flight per key
//! - **Two Invocation Modes**: External validator process with captured output, or a shared in-process engine
//! - **Report Normalization**: Tolerant grammar for the validator's text report
//! - **Uniform Faults**: Every failure renders as a single fatal issue in the same shape as a report
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_ig_gateway::*;
//!
//! # async fn example() -> Result<()> {
//! let config = GatewayConfig::load(None)?;
//! let service = OrchestrationService::from_config(&config)?;
//!
//! let request = ValidationRequest::new(
//!     r#"{"resourceType":"Patient","gender":"unknown-code"}"#,
//!     "application/fhir+json",
//! )
//! .with_profiles(["http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient"]);
//!
//! let response = service.respond(request).await;
//! for issue in response.issues.iter() {
//!     println!("{issue}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod core;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod report;
pub mod service;

pub use catalog::{CatalogEntry, parse_catalog};
pub use crate::core::*;
pub use engine::{
    CacheStats, CancelFlag, EngineBackend, EngineCache, EngineFactory, EngineHandle, EngineKey,
    EngineRequest, ExternalEngine, ExternalEngineFactory, ValidationEngine,
};
pub use error::Result; // Our Result type takes precedence
pub use error::{FaultKind, GatewayError, ValidationFault};
pub use invoker::{DirectInvoker, Invoker, SubprocessInvoker};
pub use report::{GrammarVariant, ParsedReport, ReportGrammar, ReportParser, SummaryBanner};
pub use service::{
    OperationOutcome, OrchestrationService, ResponseShape, ValidationRequest, ValidationResponse,
    VersionResolver,
};
