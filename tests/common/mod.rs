use async_trait::async_trait;
use octofhir_ig_gateway::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[allow(dead_code)]
pub const US_CORE_PATIENT: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient";

#[allow(dead_code)]
pub const PATIENT_JSON: &str = r#"{"resourceType":"Patient","id":"example","gender":"unknown-code"}"#;

#[allow(dead_code)]
pub const SINGLE_ERROR_OUTPUT: &str =
    "1 errors, 0 warnings, 0 notes\nError @ Patient.gender (line 5, col12): Invalid code";

/// Output of a current validator build, preamble included.
#[allow(dead_code)]
pub const CURRENT_BUILD_OUTPUT: &str = "\
FHIR Validation tool Version 6.3.4 (Git# 5bba2e7ba4d7). Built 2024-05-10T12:13:01.92Z
  Java:   17.0.10 from /usr/lib/jvm/java-17 on amd64 (64bit). 3964MB available
  Loading
  Load FHIR v4.0.1 from hl7.fhir.r4.core#4.0.1 - 4575 resources (00:04.104)
  Validate /tmp/Patient2024-05-10T121501-123.json
Validating
Done. Times: Loading: 00:12.305, validation: 00:00.640.
*FAILURE*: 2 errors, 1 warnings, 0 notes
  Error @ Patient.gender (line 5, col12) : The value provided ('unknown-code') is not in the value set 'AdministrativeGender'
  Error @ Patient (line 1, col2) : Patient.name: minimum required = 1, but only found 0
  Warning @ Patient : Constraint failed: dom-6: 'A resource should have narrative for robust management'
";

#[allow(dead_code)]
pub fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.engine.timeout_secs = 10;
    config.engine.kill_grace_secs = 2;
    config.validation.default_guides = vec!["hl7.fhir.us.core#6.1.0".to_string()];
    config
}

/// Factory that hands out external backends and counts builds.
#[allow(dead_code)]
pub struct CountingFactory {
    pub builds: AtomicUsize,
    backend: EngineBackend,
}

#[allow(dead_code)]
impl CountingFactory {
    pub fn external(program: &str, args: Vec<String>) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            backend: EngineBackend::External(ExternalEngine {
                program: program.to_string(),
                args,
                working_dir: None,
            }),
        }
    }

    pub fn in_process(engine: Arc<dyn ValidationEngine>) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            backend: EngineBackend::InProcess(engine),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for CountingFactory {
    async fn build(&self, _key: &EngineKey) -> Result<EngineBackend> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self.backend.clone())
    }
}

/// Invoker returning a canned result and recording what it was asked to run.
#[allow(dead_code)]
pub struct ScriptedInvoker {
    result: InvocationResult,
    pub calls: Mutex<Vec<(FhirVersion, Vec<String>)>>,
}

#[allow(dead_code)]
impl ScriptedInvoker {
    pub fn new(result: InvocationResult) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn text(output: &str) -> Self {
        Self::new(InvocationResult::Success(EngineOutput::Text(output.to_string())))
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    fn mode(&self) -> InvocationMode {
        InvocationMode::Subprocess
    }

    async fn run(&self, engine: &EngineHandle, request: &InvocationRequest) -> InvocationResult {
        self.calls
            .lock()
            .unwrap()
            .push((engine.schema_version(), request.profiles.clone()));
        self.result.clone()
    }
}

/// In-process engine returning fixed issues and tracking loaded profiles.
#[allow(dead_code)]
pub struct FixedEngine {
    issues: Vec<Issue>,
    pub loaded: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FixedEngine {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            loaded: Mutex::new(Vec::new()),
        }
    }
}

impl ValidationEngine for FixedEngine {
    fn validate(&self, _request: &EngineRequest<'_>, _cancel: &CancelFlag) -> Result<Vec<Issue>> {
        Ok(self.issues.clone())
    }

    fn has_profile(&self, url: &str) -> bool {
        self.loaded.lock().unwrap().iter().any(|p| p == url)
    }

    fn load_profile(&self, url: &str) -> Result<()> {
        self.loaded.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Write an executable shell script standing in for the validator.
#[cfg(unix)]
#[allow(dead_code)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

#[allow(dead_code)]
pub fn external_handle(program: &str, args: Vec<String>, working_dir: Option<PathBuf>) -> EngineHandle {
    let key = EngineKey::new(
        SessionKey::new("test-session"),
        FhirVersion::R4,
        ["hl7.fhir.us.core#6.1.0"],
    );
    EngineHandle::new(
        &key,
        EngineBackend::External(ExternalEngine {
            program: program.to_string(),
            args,
            working_dir,
        }),
    )
}
