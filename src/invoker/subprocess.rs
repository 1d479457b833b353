use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;

use super::Invoker;
use crate::core::config::{EngineConfig, FhirVersion, InvocationMode};
use crate::core::types::{EngineOutput, InvocationRequest, InvocationResult};
use crate::engine::{EngineBackend, EngineHandle, ExternalEngine};

/// Launches the validator as a child process for every run.
///
/// The document is written to a scratch file and the child's output streams
/// go to anonymous temporary files, read only once the child has exited. All
/// three are removed on every exit path. Anything on the error stream fails
/// the run, whatever the output stream says.
#[derive(Debug, Clone)]
pub struct SubprocessInvoker {
    scratch_dir: Option<PathBuf>,
    kill_grace: Duration,
    accepted_exit_codes: Vec<i32>,
}

impl Default for SubprocessInvoker {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SubprocessInvoker {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            kill_grace: config.kill_grace(),
            accepted_exit_codes: config.accepted_exit_codes.clone(),
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_accepted_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.accepted_exit_codes = codes.into_iter().collect();
        self
    }

    async fn execute(
        &self,
        engine: &ExternalEngine,
        handle: &EngineHandle,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, std::io::Error> {
        let document = self.write_document(request).await?;
        let document_path = std::path::absolute(document.path())?;

        let stdout = tempfile::tempfile()?;
        let stderr = tempfile::tempfile()?;

        let mut command = Command::new(&engine.program);
        command
            .args(&engine.args)
            .args(engine_arguments(
                &document_path,
                handle.schema_version(),
                handle.loaded_guides(),
                &request.profiles,
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .kill_on_drop(true);
        if let Some(dir) = &engine.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(
            program = %engine.program,
            document = %document_path.display(),
            session = %handle.session_key(),
            "Launching validator"
        );
        let started = std::time::Instant::now();
        let mut child = command.spawn().map_err(|e| {
            std::io::Error::new(e.kind(), format!("failed to launch {}: {e}", engine.program))
        })?;

        let waited = tokio::time::timeout(request.timeout, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    program = %engine.program,
                    budget_secs = request.timeout.as_secs(),
                    "Validator exceeded its budget, killing it"
                );
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "Failed to signal validator process");
                }
                if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
                    tracing::error!(program = %engine.program, "Validator was not reaped within the grace period");
                }
                return Ok(InvocationResult::TimedOut {
                    budget: request.timeout,
                });
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let error_text = read_capture(stderr).await?;
        if !error_text.trim().is_empty() {
            tracing::error!(status = ?status.code(), elapsed_ms, stderr = %error_text.trim(), "Validator wrote to its error stream");
            return Ok(InvocationResult::ProcessFailure(format!(
                "Error running external validator {}: {}",
                engine.program,
                error_text.trim()
            )));
        }

        if let Some(detail) = self.exit_failure(status) {
            tracing::error!(status = ?status.code(), elapsed_ms, "Validator exited abnormally");
            return Ok(InvocationResult::ProcessFailure(detail));
        }

        let output = read_capture(stdout).await?;
        tracing::debug!(elapsed_ms, bytes = output.len(), "Validator finished");
        tracing::trace!(output = %output, "Validator output");
        Ok(InvocationResult::Success(EngineOutput::Text(output)))
    }

    async fn write_document(
        &self,
        request: &InvocationRequest,
    ) -> std::io::Result<tempfile::NamedTempFile> {
        let prefix = scratch_prefix(request.resource_type.as_deref());
        let suffix = format!(".{}", request.format.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(&suffix);
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        tokio::fs::write(file.path(), &request.document).await?;
        Ok(file)
    }

    fn exit_failure(&self, status: ExitStatus) -> Option<String> {
        match status.code() {
            Some(code) if self.accepted_exit_codes.contains(&code) => None,
            Some(code) => Some(format!("validator exited with status {code}")),
            None => Some("validator was terminated by a signal".to_string()),
        }
    }
}

#[async_trait]
impl Invoker for SubprocessInvoker {
    fn mode(&self) -> InvocationMode {
        InvocationMode::Subprocess
    }

    async fn run(&self, engine: &EngineHandle, request: &InvocationRequest) -> InvocationResult {
        let EngineBackend::External(external) = engine.backend() else {
            return InvocationResult::ProcessFailure(
                "subprocess invocation needs an external validator".to_string(),
            );
        };
        match self.execute(external, engine, request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Validator run failed before completion");
                InvocationResult::IoFailure(e.to_string())
            }
        }
    }
}

/// `<document> [-ig <guide>]* [-profile <profile>]* -version <v>`
pub fn engine_arguments<'a>(
    document: &Path,
    version: FhirVersion,
    guides: impl IntoIterator<Item = &'a String>,
    profiles: &[String],
) -> Vec<String> {
    let mut args = vec![document.display().to_string()];
    for guide in guides {
        args.push("-ig".to_string());
        args.push(guide.clone());
    }
    for profile in profiles {
        args.push("-profile".to_string());
        args.push(profile.clone());
    }
    args.push("-version".to_string());
    args.push(version.package_version().to_string());
    args
}

/// `<ResourceType><UTC timestamp>-`, e.g. `Patient2024-03-01T101500-`.
fn scratch_prefix(resource_type: Option<&str>) -> String {
    let resource_type: String = resource_type
        .unwrap_or("Resource")
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    let resource_type = if resource_type.is_empty() {
        "Resource"
    } else {
        resource_type.as_str()
    };
    format!("{resource_type}{}-", Utc::now().format("%Y-%m-%dT%H%M%S"))
}

async fn read_capture(file: std::fs::File) -> std::io::Result<String> {
    let mut file = tokio::fs::File::from_std(file);
    file.rewind().await?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_arguments_order() {
        let guides = ["hl7.fhir.us.core#6.1.0".to_string()];
        let profiles = vec![
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient".to_string(),
        ];
        let args = engine_arguments(Path::new("/tmp/doc.json"), FhirVersion::R4, &guides, &profiles);
        assert_eq!(
            args,
            vec![
                "/tmp/doc.json",
                "-ig",
                "hl7.fhir.us.core#6.1.0",
                "-profile",
                "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
                "-version",
                "4.0.1",
            ]
        );
    }

    #[test]
    fn test_scratch_prefix() {
        let prefix = scratch_prefix(Some("Patient"));
        assert!(prefix.starts_with("Patient20"));
        assert!(prefix.ends_with('-'));
        assert!(scratch_prefix(Some("../etc")).starts_with("etc"));
        assert!(scratch_prefix(None).starts_with("Resource"));
    }

    #[test]
    fn test_exit_code_policy() {
        let invoker = SubprocessInvoker::default().with_accepted_exit_codes([0, 1]);
        assert_eq!(invoker.accepted_exit_codes, vec![0, 1]);
    }
}
