use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::core::config::{EngineConfig, FhirVersion};
use crate::core::types::{DocumentFormat, Issue, SessionKey};
use crate::engine::guard;
use crate::error::{GatewayError, Result};

/// Identity of a cached engine: who asked for it and what it was built with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub session: SessionKey,
    pub version: FhirVersion,
    pub guides: BTreeSet<String>,
}

impl EngineKey {
    pub fn new(
        session: SessionKey,
        version: FhirVersion,
        guides: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            session,
            version,
            guides: guides.into_iter().map(Into::into).collect(),
        }
    }
}

/// Cooperative cancellation signal handed to in-process engines.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Input for one in-process validation pass.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub document: &'a [u8],
    pub format: DocumentFormat,
    pub profiles: &'a [String],
}

/// In-process validation engine.
///
/// Implementations are long-lived and shared between requests. They may block;
/// the direct invoker always calls them from a blocking thread. Engines that
/// can stop early should poll the [`CancelFlag`].
pub trait ValidationEngine: Send + Sync {
    fn validate(&self, request: &EngineRequest<'_>, cancel: &CancelFlag) -> Result<Vec<Issue>>;

    /// Whether the profile (or guide) identified by `url` is already loaded.
    fn has_profile(&self, url: &str) -> bool;

    /// Load a profile into the shared context. Callers serialize these calls
    /// per handle.
    fn load_profile(&self, url: &str) -> Result<()>;
}

/// Launch description of an out-of-process validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEngine {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ExternalEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        }
    }
}

#[derive(Clone)]
pub enum EngineBackend {
    InProcess(Arc<dyn ValidationEngine>),
    External(ExternalEngine),
}

impl std::fmt::Debug for EngineBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineBackend::InProcess(_) => f.write_str("InProcess(..)"),
            EngineBackend::External(engine) => f.debug_tuple("External").field(engine).finish(),
        }
    }
}

/// One initialized engine, bound to a schema version and guide set.
///
/// Owned by the engine cache; callers only borrow it for the duration of a run.
#[derive(Debug)]
pub struct EngineHandle {
    session_key: SessionKey,
    schema_version: FhirVersion,
    loaded_guides: BTreeSet<String>,
    built_at: DateTime<Utc>,
    backend: EngineBackend,
    profile_lock: Arc<Mutex<()>>,
}

impl EngineHandle {
    pub fn new(key: &EngineKey, backend: EngineBackend) -> Self {
        Self {
            session_key: key.session.clone(),
            schema_version: key.version,
            loaded_guides: key.guides.clone(),
            built_at: Utc::now(),
            backend,
            profile_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    pub fn schema_version(&self) -> FhirVersion {
        self.schema_version
    }

    pub fn loaded_guides(&self) -> &BTreeSet<String> {
        &self.loaded_guides
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn backend(&self) -> &EngineBackend {
        &self.backend
    }

    /// Load any of `profiles` the in-process engine does not know yet.
    ///
    /// Loading mutates the shared engine context, so concurrent callers on the
    /// same handle take turns. The lock travels with the blocking load, so a
    /// caller that stops waiting does not let the next one in early. External
    /// engines resolve profiles themselves and are left untouched. Returns the
    /// profiles that were loaded.
    pub async fn ensure_profiles(&self, profiles: &[String]) -> Result<Vec<String>> {
        let EngineBackend::InProcess(engine) = &self.backend else {
            return Ok(Vec::new());
        };
        if profiles.is_empty() {
            return Ok(Vec::new());
        }

        let permit = Arc::clone(&self.profile_lock).lock_owned().await;
        let engine = Arc::clone(engine);
        let profiles = profiles.to_vec();
        let session = self.session_key.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut loaded = Vec::new();
            for profile in profiles {
                if engine.has_profile(&profile) {
                    continue;
                }
                tracing::info!(session = %session, profile = %profile, "Fetching profile");
                guard::contain(|| engine.load_profile(&profile))
                    .map_err(|failure| GatewayError::engine(failure.to_string()))??;
                loaded.push(profile);
            }
            Ok(loaded)
        })
        .await
        .map_err(|e| GatewayError::engine(format!("profile loading task failed: {e}")))?
    }
}

/// Builds engines on cache misses.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, key: &EngineKey) -> Result<EngineBackend>;
}

/// Factory for the subprocess mode: checks the launch description once per
/// session so every run can assume it.
#[derive(Debug, Clone)]
pub struct ExternalEngineFactory {
    engine: ExternalEngine,
}

impl ExternalEngineFactory {
    pub fn new(engine: ExternalEngine) -> Self {
        Self { engine }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(ExternalEngine::from_config(config))
    }
}

#[async_trait]
impl EngineFactory for ExternalEngineFactory {
    async fn build(&self, key: &EngineKey) -> Result<EngineBackend> {
        if self.engine.program.trim().is_empty() {
            return Err(GatewayError::configuration("no validator program configured"));
        }
        if let Some(dir) = &self.engine.working_dir {
            let metadata = tokio::fs::metadata(dir).await.map_err(|e| {
                GatewayError::configuration(format!(
                    "validator directory {} is not accessible: {e}",
                    dir.display()
                ))
            })?;
            if !metadata.is_dir() {
                return Err(GatewayError::configuration(format!(
                    "validator location {} is not a directory",
                    dir.display()
                )));
            }
        }

        tracing::debug!(
            session = %key.session,
            version = %key.version,
            guides = ?key.guides,
            program = %self.engine.program,
            "Prepared external validator"
        );
        Ok(EngineBackend::External(self.engine.clone()))
    }
}
