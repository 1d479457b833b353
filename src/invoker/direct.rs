use async_trait::async_trait;
use std::sync::Arc;

use super::Invoker;
use crate::core::config::InvocationMode;
use crate::core::types::{EngineOutput, InvocationRequest, InvocationResult};
use crate::engine::{CancelFlag, EngineBackend, EngineHandle, EngineRequest, ValidationEngine, guard};
use crate::error::GatewayError;

/// Calls a shared in-process engine on a blocking thread.
///
/// Engine panics and exit requests are contained and reported as process
/// failures. On timeout the cancel flag is raised and the call is abandoned:
/// an engine that never polls the flag keeps its blocking thread busy until it
/// returns on its own, but the caller gets `TimedOut` on schedule.
#[derive(Debug, Clone, Copy)]
pub struct DirectInvoker;

impl Default for DirectInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectInvoker {
    pub fn new() -> Self {
        guard::install_quiet_hook();
        Self
    }

    async fn execute(
        engine: Arc<dyn ValidationEngine>,
        handle: &EngineHandle,
        request: &InvocationRequest,
        cancel: CancelFlag,
    ) -> InvocationResult {
        if let Err(e) = handle.ensure_profiles(&request.profiles).await {
            return failure_from(e);
        }

        let document = request.document.clone();
        let format = request.format;
        let profiles = request.profiles.clone();
        let task = tokio::task::spawn_blocking(move || {
            guard::contain(|| {
                let engine_request = EngineRequest {
                    document: &document,
                    format,
                    profiles: &profiles,
                };
                engine.validate(&engine_request, &cancel)
            })
        });

        match task.await {
            Ok(Ok(Ok(issues))) => InvocationResult::Success(EngineOutput::Issues(issues)),
            Ok(Ok(Err(e))) => failure_from(e),
            Ok(Err(contained)) => {
                tracing::error!(failure = %contained, "Engine failure contained");
                InvocationResult::ProcessFailure(contained.to_string())
            }
            Err(e) => InvocationResult::ProcessFailure(format!("engine task failed: {e}")),
        }
    }
}

#[async_trait]
impl Invoker for DirectInvoker {
    fn mode(&self) -> InvocationMode {
        InvocationMode::Direct
    }

    async fn run(&self, engine: &EngineHandle, request: &InvocationRequest) -> InvocationResult {
        let EngineBackend::InProcess(validator) = engine.backend() else {
            return InvocationResult::ProcessFailure(
                "direct invocation needs an in-process engine".to_string(),
            );
        };

        let cancel = CancelFlag::new();
        let started = std::time::Instant::now();
        let run = Self::execute(Arc::clone(validator), engine, request, cancel.clone());
        match tokio::time::timeout(request.timeout, run).await {
            Ok(result) => {
                tracing::debug!(
                    session = %engine.session_key(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    success = result.is_success(),
                    "Engine call finished"
                );
                result
            }
            Err(_) => {
                cancel.cancel();
                tracing::warn!(
                    session = %engine.session_key(),
                    budget_secs = request.timeout.as_secs(),
                    "Engine call exceeded its budget and was abandoned"
                );
                InvocationResult::TimedOut {
                    budget: request.timeout,
                }
            }
        }
    }
}

fn failure_from(err: GatewayError) -> InvocationResult {
    match err {
        GatewayError::Io(e) => InvocationResult::IoFailure(e.to_string()),
        other => InvocationResult::ProcessFailure(other.to_string()),
    }
}
