//! Request orchestration and response assembly.

pub mod orchestrator;
pub mod outcome;
pub mod version;

pub use orchestrator::{OrchestrationService, ValidationRequest, format_document, resource_type};
pub use outcome::{OperationOutcome, OutcomeIssue, ResponseShape, ValidationResponse};
pub use version::VersionResolver;
