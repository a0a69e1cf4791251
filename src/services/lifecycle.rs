//! Lifecycle engine
//!
//! Periodic maintenance sweeps: delete expired session-state units,
//! refresh derived lifecycle payloads, expire idle conversation sessions,
//! and compact the BM25 index after heavy deletion. Sweeps are
//! interruptible; every derivation is recomputable, so partial completion
//! is always safe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adapters::hybrid_search::Bm25Catalog;
use crate::domain::error::{Error, Result};
use crate::domain::filter::Filter;
use crate::domain::ports::records::{EmbeddingCacheStore, RelationStore};
use crate::domain::ports::vector_store::VectorStoreProvider;
use crate::domain::types::{now_ms, MemoryUnit, TimestampMs, UnitId};

use super::session::SessionManager;

/// Scroll page size during sweeps.
const SWEEP_PAGE: usize = 256;

/// BM25 deletions tolerated before a compaction pass.
const COMPACT_THRESHOLD: usize = 1024;

/// Lifecycle tuning knobs.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Session-state TTL
    pub session_ttl_ms: i64,
    /// Conversation idle timeout
    pub idle_timeout_ms: i64,
    /// Interval between scheduled sweeps
    pub sweep_interval: Duration,
    /// Embedding cache TTL
    pub cache_ttl_ms: i64,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            session_ttl_ms: 48 * 60 * 60 * 1000,
            idle_timeout_ms: 30 * 60 * 1000,
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            cache_ttl_ms: 30 * 24 * 60 * 60 * 1000,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepReport {
    /// Expired session-state units deleted
    pub session_state_deleted: usize,
    /// Payloads whose derived lifecycle state was refreshed
    pub states_refreshed: usize,
    /// Idle conversation sessions dropped
    pub sessions_expired: usize,
    /// BM25 collections compacted
    pub bm25_compacted: usize,
    /// Expired embedding cache entries evicted
    pub cache_evicted: usize,
    /// Sweep wall-clock time
    pub duration_ms: u64,
}

/// The lifecycle engine. Single-threaded within a sweep.
pub struct LifecycleEngine {
    store: Arc<dyn VectorStoreProvider>,
    bm25: Arc<Bm25Catalog>,
    sessions: Arc<SessionManager>,
    relations: Arc<dyn RelationStore>,
    cache: Arc<dyn EmbeddingCacheStore>,
    collection: String,
    options: LifecycleOptions,
    sweeps_completed: AtomicU64,
}

impl LifecycleEngine {
    /// Assemble the engine.
    pub fn new(
        store: Arc<dyn VectorStoreProvider>,
        bm25: Arc<Bm25Catalog>,
        sessions: Arc<SessionManager>,
        relations: Arc<dyn RelationStore>,
        cache: Arc<dyn EmbeddingCacheStore>,
        collection: impl Into<String>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            store,
            bm25,
            sessions,
            relations,
            cache,
            collection: collection.into(),
            options,
            sweeps_completed: AtomicU64::new(0),
        }
    }

    /// Sweeps completed since startup.
    pub fn sweeps_completed(&self) -> u64 {
        self.sweeps_completed.load(Ordering::Relaxed)
    }

    /// Run one sweep at the current time.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(now_ms(), &CancellationToken::new()).await
    }

    /// Run one sweep as of `now`, checking `cancel` between phases.
    pub async fn sweep_at(
        &self,
        now: TimestampMs,
        cancel: &CancellationToken,
    ) -> Result<SweepReport> {
        let started = std::time::Instant::now();
        let mut report = SweepReport::default();

        report.session_state_deleted = self.prune_expired_session_state(now).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        report.states_refreshed = self.refresh_derived_states(now).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        report.sessions_expired = self
            .sessions
            .expire_idle(now, self.options.idle_timeout_ms)
            .await;

        report.bm25_compacted = self.bm25.compact_if_needed(COMPACT_THRESHOLD).await;
        report.cache_evicted = self
            .cache
            .sweep_expired(now, self.options.cache_ttl_ms)
            .await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
        info!(
            deleted = report.session_state_deleted,
            refreshed = report.states_refreshed,
            sessions = report.sessions_expired,
            "lifecycle sweep finished"
        );
        Ok(report)
    }

    /// Delete session-state units whose creation age exceeds the TTL.
    async fn prune_expired_session_state(&self, now: TimestampMs) -> Result<usize> {
        let cutoff = now - self.options.session_ttl_ms;
        let filter = Filter::eq("context_level", "session_state").and(Filter::range(
            "created_at",
            None,
            Some(cutoff as f64),
        ));

        let mut doomed: Vec<UnitId> = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .scroll(&self.collection, Some(&filter), cursor, SWEEP_PAGE)
                .await?;
            doomed.extend(page.points.iter().map(|p| p.id));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }

        let removed = self.store.delete_by_ids(&self.collection, &doomed).await?;
        self.bm25.remove_units(&self.collection, &doomed).await;
        for id in &doomed {
            let _ = self.relations.remove_for(*id).await;
        }
        debug!(removed, "expired session-state units pruned");
        Ok(removed)
    }

    /// Recompute derived lifecycle state for every unit and write back the
    /// ones that changed.
    async fn refresh_derived_states(&self, now: TimestampMs) -> Result<usize> {
        let mut refreshed = 0usize;
        let mut cursor = None;
        loop {
            let page = self
                .store
                .scroll(&self.collection, None, cursor, SWEEP_PAGE)
                .await?;
            let mut updates: Vec<(UnitId, MemoryUnit)> = Vec::new();
            let mut mirror: Vec<MemoryUnit> = Vec::new();
            for point in &page.points {
                let derived = point
                    .payload
                    .lifecycle_state(now, self.options.session_ttl_ms);
                if derived != point.payload.lifecycle_state {
                    let mut payload = point.payload.clone();
                    payload.lifecycle_state = derived;
                    mirror.push(payload.clone());
                    updates.push((point.id, payload));
                }
            }
            if !updates.is_empty() {
                refreshed += self
                    .store
                    .update_payloads(&self.collection, updates)
                    .await?;
                self.bm25.upsert_units(&self.collection, &mirror).await;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(refreshed)
    }

    /// Run sweeps on the configured interval until cancelled.
    pub async fn run_scheduled(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.sweep_interval);
        // The immediate first tick would sweep at startup; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("lifecycle scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_at(now_ms(), &cancel).await {
                        tracing::warn!(error = %err, "lifecycle sweep failed");
                    }
                }
            }
        }
    }
}
