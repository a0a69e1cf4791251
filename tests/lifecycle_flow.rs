//! Lifecycle pruning flows (S5): expired session-state deletion through
//! the sweep, with the keyword index kept in step.

mod common;

use std::sync::Arc;

use codemem::adapters::hybrid_search::{Bm25Catalog, Bm25Params};
use codemem::adapters::records::InMemoryRecordStore;
use codemem::adapters::vector_store::InMemoryVectorStore;
use codemem::domain::ports::vector_store::VectorStoreProvider;
use codemem::services::lifecycle::{LifecycleEngine, LifecycleOptions};
use codemem::services::{SessionManager, StoreMemoryInput};
use codemem::{
    ContextLevel, MemoryKind, MemoryUnit, Scope, UnitDetails, UnitId, VectorPoint,
};
use tokio_util::sync::CancellationToken;

const HOUR: i64 = 60 * 60 * 1000;

fn session_unit(created_at: i64, content: &str) -> MemoryUnit {
    MemoryUnit {
        id: uuid::Uuid::new_v4(),
        content: content.into(),
        kind: MemoryKind::Context,
        scope: Scope::Global,
        project: None,
        context_level: ContextLevel::SessionState,
        importance: 0.5,
        tags: Default::default(),
        metadata: Default::default(),
        created_at,
        updated_at: created_at,
        last_accessed: created_at,
        access_count: 0,
        lifecycle_state: codemem::LifecycleState::Active,
        details: UnitDetails::Memory,
    }
}

/// S5: ten session-state memories created 49 h ago are all pruned; the
/// total unit count drops by exactly ten.
#[tokio::test]
async fn expired_session_state_is_pruned_by_the_sweep() {
    let now = 1_000 * HOUR;
    let store = Arc::new(InMemoryVectorStore::new());
    store.ensure_collection("units", 4).await.unwrap();
    let bm25 = Arc::new(Bm25Catalog::new(Bm25Params::default()));

    let mut expired_ids: Vec<UnitId> = Vec::new();
    let mut points = Vec::new();
    for i in 0..10 {
        let unit = session_unit(now - 49 * HOUR, &format!("scratch note {i}"));
        expired_ids.push(unit.id);
        bm25.upsert_unit("units", &unit).await;
        points.push(VectorPoint {
            id: unit.id,
            vector: vec![1.0, 0.0, 0.0, 0.0],
            payload: unit,
        });
    }
    // A survivor inside the TTL window.
    let survivor = session_unit(now - HOUR, "fresh scratch note");
    let survivor_id = survivor.id;
    bm25.upsert_unit("units", &survivor).await;
    points.push(VectorPoint {
        id: survivor.id,
        vector: vec![0.0, 1.0, 0.0, 0.0],
        payload: survivor,
    });
    store.upsert_batch("units", points).await.unwrap();
    assert_eq!(store.count("units", None).await.unwrap(), 11);

    let records = Arc::new(InMemoryRecordStore::new());
    let engine = LifecycleEngine::new(
        store.clone(),
        bm25.clone(),
        Arc::new(SessionManager::default()),
        records.clone(),
        records,
        "units",
        LifecycleOptions::default(),
    );

    let report = engine
        .sweep_at(now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.session_state_deleted, 10);

    for id in &expired_ids {
        assert!(store.get_by_id("units", *id).await.unwrap().is_none());
    }
    assert_eq!(store.count("units", None).await.unwrap(), 1);
    assert!(store.get_by_id("units", survivor_id).await.unwrap().is_some());

    // The keyword side dropped the same documents.
    assert_eq!(bm25.doc_count("units").await, 1);

    // Sweeping again finds nothing.
    let report = engine
        .sweep_at(now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.session_state_deleted, 0);
}

/// The engine-level sweep runs end to end and reports through `get_stats`.
#[tokio::test]
async fn engine_sweep_is_idempotent_on_a_fresh_store() {
    let engine = common::test_engine().await;
    engine
        .store_memory(StoreMemoryInput {
            content: "I prefer espresso over filter coffee".into(),
            ..StoreMemoryInput::default()
        })
        .await
        .unwrap();

    let report = engine.lifecycle_sweep().await.unwrap();
    assert_eq!(report.session_state_deleted, 0);

    let stats = engine.get_stats().await.unwrap();
    assert_eq!(stats.stored_units, 1);
    assert_eq!(stats.sweeps_completed, 1);
}
