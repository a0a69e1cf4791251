//! Conversation session management
//!
//! Sessions are in-memory and non-durable: a bounded ring of recent
//! queries (with their embeddings) and a bounded set of already-returned
//! result ids. One mutex per session; the registry itself is a concurrent
//! map so unrelated sessions never contend.

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::error::{Error, Result};
use crate::domain::types::{now_ms, TimestampMs, UnitId};

use crate::adapters::hybrid_search::tokenize;

/// Cosine similarity above which a prior query contributes its terms.
const HISTORY_SIMILARITY: f32 = 0.7;

/// Default bound on the query history ring.
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// Default bound on remembered result ids.
pub const DEFAULT_SEEN_CAP: usize = 200;

struct SessionState {
    name: Option<String>,
    created_at: TimestampMs,
    last_activity_at: TimestampMs,
    query_history: VecDeque<(String, Vec<f32>)>,
    seen_result_ids: HashSet<UnitId>,
    seen_order: VecDeque<UnitId>,
    queries_served: u64,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    /// Session id
    pub session_id: Uuid,
    /// Optional human name given at start
    pub name: Option<String>,
    /// Queries served within the session
    pub queries_served: u64,
    /// Distinct result ids returned
    pub results_seen: usize,
    /// Wall-clock lifetime in milliseconds
    pub duration_ms: i64,
}

/// What session context contributes to one retrieval call.
#[derive(Debug, Default)]
pub struct SessionContext {
    /// Terms from semantically similar prior queries
    pub extra_terms: Vec<String>,
    /// Ids to suppress from the output
    pub suppress: HashSet<UnitId>,
}

/// Registry of live conversation sessions.
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<Mutex<SessionState>>>,
    history_size: usize,
    seen_cap: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE, DEFAULT_SEEN_CAP)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl SessionManager {
    /// Create a registry with the given per-session bounds.
    pub fn new(history_size: usize, seen_cap: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            history_size: history_size.max(1),
            seen_cap: seen_cap.max(1),
        }
    }

    /// Start a session; returns its id.
    pub fn start(&self, name: Option<String>) -> Uuid {
        let id = Uuid::new_v4();
        let now = now_ms();
        self.sessions.insert(
            id,
            Arc::new(Mutex::new(SessionState {
                name,
                created_at: now,
                last_activity_at: now,
                query_history: VecDeque::with_capacity(self.history_size),
                seen_result_ids: HashSet::new(),
                seen_order: VecDeque::new(),
                queries_served: 0,
            })),
        );
        id
    }

    /// End a session, returning its stats.
    pub async fn end(&self, session_id: Uuid) -> Result<SessionStats> {
        let (_, state) = self
            .sessions
            .remove(&session_id)
            .ok_or_else(|| Error::not_found(format!("session {session_id}")))?;
        let state = state.lock().await;
        Ok(SessionStats {
            session_id,
            name: state.name.clone(),
            queries_served: state.queries_served,
            results_seen: state.seen_result_ids.len(),
            duration_ms: now_ms() - state.created_at,
        })
    }

    /// Live session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Collect the session's contribution to a retrieval call: terms from
    /// prior queries whose embeddings are close to this one, plus the ids
    /// already shown.
    pub async fn context_for(
        &self,
        session_id: Uuid,
        query_vec: &[f32],
    ) -> Result<SessionContext> {
        let state = {
            let entry = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| Error::not_found(format!("session {session_id}")))?;
            Arc::clone(entry.value())
        };
        let mut state = state.lock().await;
        state.last_activity_at = now_ms();

        let mut extra_terms = Vec::new();
        for (prior_query, prior_vec) in &state.query_history {
            if cosine(query_vec, prior_vec) > HISTORY_SIMILARITY {
                extra_terms.extend(tokenize(prior_query));
            }
        }
        Ok(SessionContext {
            extra_terms,
            suppress: state.seen_result_ids.clone(),
        })
    }

    /// Record a served query and the ids it returned. The query ring
    /// evicts oldest-first; the seen set stops growing at its cap.
    pub async fn record(
        &self,
        session_id: Uuid,
        query: &str,
        query_vec: Vec<f32>,
        returned: &[UnitId],
    ) -> Result<()> {
        let state = {
            let entry = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| Error::not_found(format!("session {session_id}")))?;
            Arc::clone(entry.value())
        };
        let mut state = state.lock().await;
        state.last_activity_at = now_ms();
        state.queries_served += 1;

        if state.query_history.len() == self.history_size {
            state.query_history.pop_front();
        }
        state.query_history.push_back((query.to_string(), query_vec));

        for id in returned {
            if state.seen_result_ids.len() >= self.seen_cap {
                break;
            }
            if state.seen_result_ids.insert(*id) {
                state.seen_order.push_back(*id);
            }
        }
        Ok(())
    }

    /// Drop sessions idle past `idle_timeout_ms`; returns how many.
    pub async fn expire_idle(&self, now: TimestampMs, idle_timeout_ms: i64) -> usize {
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            let state = entry.value().lock().await;
            if now - state.last_activity_at > idle_timeout_ms {
                expired.push(*entry.key());
            }
        }
        for id in &expired {
            self.sessions.remove(id);
            debug!(session = %id, "expired idle session");
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_start_record_end() {
        let manager = SessionManager::default();
        let id = manager.start(Some("debugging".into()));
        assert_eq!(manager.len(), 1);

        let unit_id = Uuid::new_v4();
        manager
            .record(id, "auth flow", vec![1.0, 0.0], &[unit_id])
            .await
            .unwrap();

        let stats = manager.end(id).await.unwrap();
        assert_eq!(stats.queries_served, 1);
        assert_eq!(stats.results_seen, 1);
        assert!(manager.is_empty());
        assert!(manager.end(id).await.is_err());
    }

    #[tokio::test]
    async fn similar_history_contributes_terms() {
        let manager = SessionManager::default();
        let id = manager.start(None);
        manager
            .record(id, "token refresh logic", vec![1.0, 0.0], &[])
            .await
            .unwrap();

        // Nearly identical direction: terms flow in.
        let ctx = manager.context_for(id, &[0.99, 0.1]).await.unwrap();
        assert!(ctx.extra_terms.contains(&"token".to_string()));

        // Orthogonal query: nothing contributed.
        let ctx = manager.context_for(id, &[0.0, 1.0]).await.unwrap();
        assert!(ctx.extra_terms.is_empty());
    }

    #[tokio::test]
    async fn query_ring_evicts_oldest() {
        let manager = SessionManager::new(2, 10);
        let id = manager.start(None);
        for i in 0..3 {
            manager
                .record(id, &format!("query {i}"), vec![1.0], &[])
                .await
                .unwrap();
        }
        let ctx = manager.context_for(id, &[1.0]).await.unwrap();
        // "query 0" fell off the ring; 1 and 2 both match exactly.
        assert!(!ctx.extra_terms.is_empty());
        assert!(!ctx.extra_terms.contains(&"0".to_string()));
    }

    #[tokio::test]
    async fn seen_set_respects_its_cap() {
        let manager = SessionManager::new(5, 3);
        let id = manager.start(None);
        let ids: Vec<UnitId> = (0..10).map(|_| Uuid::new_v4()).collect();
        manager.record(id, "q", vec![1.0], &ids).await.unwrap();
        let ctx = manager.context_for(id, &[1.0]).await.unwrap();
        assert_eq!(ctx.suppress.len(), 3);
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let manager = SessionManager::default();
        let _live = manager.start(None);
        let idle = manager.start(None);
        // Backdate the idle session by touching nothing and expiring with a
        // future "now".
        let expired = manager.expire_idle(now_ms() + 10_000, 5_000).await;
        assert_eq!(expired, 2);
        let _ = idle;
    }
}
