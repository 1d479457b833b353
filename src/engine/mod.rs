//! Validation engines, their cache and termination containment.

pub mod cache;
pub mod guard;
pub mod handle;

pub use cache::{CacheStats, EngineCache};
pub use guard::{ContainedFailure, TerminationRequest, contain, request_exit};
pub use handle::{
    CancelFlag, EngineBackend, EngineFactory, EngineHandle, EngineKey, EngineRequest,
    ExternalEngine, ExternalEngineFactory, ValidationEngine,
};
