//! Session-aware retrieval flows (S6): dedup of previously returned
//! results across calls within one session.

mod common;

use std::collections::HashSet;

use codemem::services::StoreMemoryInput;
use codemem::UnitId;

async fn seeded_engine() -> codemem::MemoryEngine {
    let engine = common::test_engine().await;
    for i in 0..5 {
        engine
            .store_memory(StoreMemoryInput {
                content: format!(
                    "database connection pooling note {i}: keep the pool bounded"
                ),
                ..StoreMemoryInput::default()
            })
            .await
            .unwrap();
    }
    engine
}

const QUERY: &str = "database connection pooling";

#[tokio::test]
async fn repeated_session_queries_never_repeat_results() {
    let engine = seeded_engine().await;
    let session = engine.session_start(Some("digging".into()));

    let first = engine
        .retrieve_memories(QUERY, 5, None, Some(session))
        .await
        .unwrap();
    assert!(!first.results.is_empty());
    assert!(first.results.len() <= 5);
    let first_ids: HashSet<UnitId> = first.results.iter().map(|r| r.id).collect();

    let second = engine
        .retrieve_memories(QUERY, 5, None, Some(session))
        .await
        .unwrap();
    let second_ids: HashSet<UnitId> = second.results.iter().map(|r| r.id).collect();
    assert!(
        first_ids.is_disjoint(&second_ids),
        "second call repeated ids from the first"
    );

    // The corpus only has five matches; once they are all seen, the third
    // call comes back empty rather than repeating.
    let third = engine
        .retrieve_memories(QUERY, 5, None, Some(session))
        .await
        .unwrap();
    let third_ids: HashSet<UnitId> = third.results.iter().map(|r| r.id).collect();
    assert!(first_ids.is_disjoint(&third_ids));
    assert!(second_ids.is_disjoint(&third_ids));

    let total_seen = first_ids.len() + second_ids.len() + third_ids.len();
    assert!(total_seen <= 5, "more distinct ids than the corpus holds");

    let stats = engine.session_end(session).await.unwrap();
    assert_eq!(stats.queries_served, 3);
    assert_eq!(stats.results_seen, total_seen as usize);
}

#[tokio::test]
async fn sessionless_queries_are_unaffected_by_history() {
    let engine = seeded_engine().await;

    let first = engine
        .retrieve_memories(QUERY, 3, None, None)
        .await
        .unwrap();
    let second = engine
        .retrieve_memories(QUERY, 3, None, None)
        .await
        .unwrap();
    let first_ids: Vec<UnitId> = first.results.iter().map(|r| r.id).collect();
    let second_ids: Vec<UnitId> = second.results.iter().map(|r| r.id).collect();
    assert_eq!(first_ids, second_ids, "sessionless retrieval must not dedup");
}

#[tokio::test]
async fn separate_sessions_do_not_share_seen_sets() {
    let engine = seeded_engine().await;
    let a = engine.session_start(None);
    let b = engine.session_start(None);

    let from_a = engine
        .retrieve_memories(QUERY, 5, None, Some(a))
        .await
        .unwrap();
    let from_b = engine
        .retrieve_memories(QUERY, 5, None, Some(b))
        .await
        .unwrap();

    let ids_a: HashSet<UnitId> = from_a.results.iter().map(|r| r.id).collect();
    let ids_b: HashSet<UnitId> = from_b.results.iter().map(|r| r.id).collect();
    assert_eq!(ids_a, ids_b, "fresh sessions should see the same corpus");

    engine.session_end(a).await.unwrap();
    engine.session_end(b).await.unwrap();
}

#[tokio::test]
async fn ending_an_unknown_session_is_not_found() {
    let engine = common::test_engine().await;
    assert!(engine.session_end(uuid::Uuid::new_v4()).await.is_err());
}
