use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::handle::{EngineBackend, EngineFactory, EngineHandle, EngineKey};
use crate::core::config::CacheConfig;
use crate::error::{GatewayError, Result};

struct CacheSlot {
    handle: OnceCell<Arc<EngineHandle>>,
    last_accessed_ms: AtomicU64,
    waiters: AtomicUsize,
}

impl CacheSlot {
    fn new(now_ms: u64) -> Self {
        Self {
            handle: OnceCell::new(),
            last_accessed_ms: AtomicU64::new(now_ms),
            waiters: AtomicUsize::new(0),
        }
    }

    fn touch(&self, now_ms: u64) {
        self.last_accessed_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Empty and nobody building: what a failed or cancelled build leaves.
    fn is_abandoned(&self) -> bool {
        !self.handle.initialized() && self.waiters.load(Ordering::Acquire) == 0
    }
}

/// Marks a caller as waiting on a slot's build until dropped.
struct Waiting<'a>(&'a CacheSlot);

impl<'a> Waiting<'a> {
    fn enter(slot: &'a CacheSlot) -> Self {
        slot.waiters.fetch_add(1, Ordering::AcqRel);
        Self(slot)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counters describing cache behaviour since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub evictions: u64,
}

/// Time-bounded store of initialized engines.
///
/// Each key owns a slot whose handle is built at most once at a time:
/// concurrent callers for an uninitialized key wait on the same build. A failed
/// build is not cached: its slot is dropped once no caller is waiting on it,
/// so the next caller retries with a fresh one. An entry whose last
/// successful borrow is older than the TTL behaves as absent.
pub struct EngineCache {
    entries: papaya::HashMap<EngineKey, Arc<CacheSlot>>,
    ttl: Duration,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    evictions: AtomicU64,
}

impl EngineCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.ttl())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: papaya::HashMap::new(),
            ttl,
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Borrow the engine for `key`, building it through `factory` on a miss.
    pub async fn get_or_build(
        &self,
        key: &EngineKey,
        factory: &dyn EngineFactory,
    ) -> Result<Arc<EngineHandle>> {
        self.get_or_build_with(key, move || factory.build(key)).await
    }

    pub async fn get_or_build_with<F, Fut>(&self, key: &EngineKey, build: F) -> Result<Arc<EngineHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EngineBackend>>,
    {
        let slot = self.live_slot(key, self.now_ms());

        if let Some(handle) = slot.handle.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            slot.touch(self.now_ms());
            tracing::debug!(session = %key.session, version = %key.version, "Engine cache hit");
            return Ok(Arc::clone(handle));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let waiting = Waiting::enter(&slot);
        let built = slot
            .handle
            .get_or_try_init(|| async move {
                let started = std::time::Instant::now();
                self.builds.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    session = %key.session,
                    version = %key.version,
                    guides = ?key.guides,
                    "Building validation engine"
                );
                let backend = build().await?;
                tracing::info!(
                    session = %key.session,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Validation engine ready"
                );
                Ok::<_, GatewayError>(Arc::new(EngineHandle::new(key, backend)))
            })
            .await;
        drop(waiting);

        match built {
            Ok(handle) => {
                slot.touch(self.now_ms());
                Ok(Arc::clone(handle))
            }
            Err(e) => {
                self.discard_if_abandoned(key, &slot);
                Err(e)
            }
        }
    }

    /// Drop every entry whose last successful borrow is older than the TTL,
    /// along with empty slots left by failed or cancelled builds. Returns the
    /// number of expired engines removed.
    pub fn remove_expired(&self) -> usize {
        let now = self.now_ms();
        let mut removed = 0;
        self.entries.pin().retain(|_, slot| {
            if slot.is_abandoned() {
                return false;
            }
            let keep = !self.is_expired(slot, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::info!(removed, "Evicted expired validation engines");
        }
        removed
    }

    pub fn invalidate(&self, key: &EngineKey) -> bool {
        self.entries.pin().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.pin().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Current slot for `key`, replacing it first if it has gone stale.
    ///
    /// Kept synchronous so the map guard never lives across an await.
    fn live_slot(&self, key: &EngineKey, now: u64) -> Arc<CacheSlot> {
        let slot = self.slot_for(key, now);
        if !self.is_expired(&slot, now) {
            return slot;
        }

        self.entries
            .pin()
            .retain(|k, current| !(k == key && Arc::ptr_eq(current, &slot)));
        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = %key.session, "Engine cache entry expired");
        self.slot_for(key, now)
    }

    fn discard_if_abandoned(&self, key: &EngineKey, slot: &Arc<CacheSlot>) {
        self.entries
            .pin()
            .retain(|k, current| !(k == key && Arc::ptr_eq(current, slot) && current.is_abandoned()));
    }

    fn slot_for(&self, key: &EngineKey, now: u64) -> Arc<CacheSlot> {
        Arc::clone(
            self.entries
                .pin()
                .get_or_insert_with(key.clone(), || Arc::new(CacheSlot::new(now))),
        )
    }

    /// Pending and failed slots never expire; only built engines age out.
    fn is_expired(&self, slot: &CacheSlot, now: u64) -> bool {
        if !slot.handle.initialized() {
            return false;
        }
        let last = slot.last_accessed_ms.load(Ordering::Relaxed);
        u128::from(now.saturating_sub(last)) >= self.ttl.as_millis()
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl std::fmt::Debug for EngineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}
