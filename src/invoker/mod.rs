//! Running one validation pass against an engine handle.
//!
//! Two variants share the [`Invoker`] contract: [`SubprocessInvoker`] launches
//! the validator as a child process and returns its captured report text,
//! [`DirectInvoker`] calls an in-process engine and returns structured issues.
//! Neither ever returns success for a run that exceeded its budget.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::config::{EngineConfig, InvocationMode};
use crate::core::types::{InvocationRequest, InvocationResult};
use crate::engine::EngineHandle;

pub mod direct;
pub mod subprocess;

pub use direct::DirectInvoker;
pub use subprocess::SubprocessInvoker;

#[async_trait]
pub trait Invoker: Send + Sync {
    fn mode(&self) -> InvocationMode;

    /// Run one validation pass, bounded by `request.timeout`.
    ///
    /// Failures are reported through the returned [`InvocationResult`]; this
    /// never panics on engine misbehaviour.
    async fn run(&self, engine: &EngineHandle, request: &InvocationRequest) -> InvocationResult;
}

/// Invoker matching the configured mode.
pub fn from_config(config: &EngineConfig) -> Arc<dyn Invoker> {
    match config.mode {
        InvocationMode::Subprocess => Arc::new(SubprocessInvoker::from_config(config)),
        InvocationMode::Direct => Arc::new(DirectInvoker::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        let config = EngineConfig::default();
        assert_eq!(from_config(&config).mode(), InvocationMode::Subprocess);

        let config = EngineConfig {
            mode: InvocationMode::Direct,
            ..EngineConfig::default()
        };
        assert_eq!(from_config(&config).mode(), InvocationMode::Direct);
    }
}
