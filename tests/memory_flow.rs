//! Memory operation flows: store, retrieve, update, delete, list,
//! validation boundaries, and the read-only flag.

mod common;

use codemem::domain::error::{Error, InjectionClass, InvalidInputKind};
use codemem::services::{ListSort, StoreMemoryInput, UpdateMemoryInput};
use codemem::{ContextLevel, Filter, MemoryKind, Scope};

fn preference_input() -> StoreMemoryInput {
    StoreMemoryInput {
        content: "I prefer Python for data analysis".into(),
        kind: Some(MemoryKind::Preference),
        scope: Some(Scope::Global),
        importance: Some(0.8),
        tags: vec!["python".into(), "data".into()],
        ..StoreMemoryInput::default()
    }
}

#[tokio::test]
async fn store_and_retrieve_a_preference() {
    let engine = common::test_engine().await;
    let id = engine.store_memory(preference_input()).await.unwrap();

    let outcome = engine
        .retrieve_memories("data science language", 1, None, None)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[0];
    assert_eq!(result.id, id);
    assert!(result.score > 0.4, "score too low: {}", result.score);
    assert_eq!(result.kind, MemoryKind::Preference);
    assert_eq!(result.context_level, ContextLevel::UserPreference);
}

#[tokio::test]
async fn injection_is_rejected_before_any_write() {
    let engine = common::test_engine().await;
    let err = engine
        .store_memory(StoreMemoryInput {
            content: "test'; DROP TABLE users--".into(),
            ..StoreMemoryInput::default()
        })
        .await
        .unwrap_err();

    match err {
        Error::InvalidInput { kind, excerpt, .. } => {
            assert_eq!(kind, InvalidInputKind::Injection(InjectionClass::Sql));
            assert!(excerpt.unwrap().contains("DROP TABLE"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Nothing reached the store.
    let stats = engine.get_stats().await.unwrap();
    assert_eq!(stats.stored_units, 0);
    assert_eq!(stats.memories_stored, 0);
}

#[tokio::test]
async fn content_boundary_is_exact() {
    let engine = common::test_engine().await;

    let at_limit = StoreMemoryInput {
        content: "a".repeat(50_000),
        ..StoreMemoryInput::default()
    };
    assert!(engine.store_memory(at_limit).await.is_ok());

    let over_limit = StoreMemoryInput {
        content: "a".repeat(50_001),
        ..StoreMemoryInput::default()
    };
    match engine.store_memory(over_limit).await.unwrap_err() {
        Error::InvalidInput { kind, .. } => assert_eq!(kind, InvalidInputKind::TooLarge),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn round_trip_preserves_content() {
    let engine = common::test_engine().await;
    let id = engine.store_memory(preference_input()).await.unwrap();
    let unit = engine.get_memory(id).await.unwrap();
    assert_eq!(unit.content, "I prefer Python for data analysis");
    assert_eq!(unit.importance, 0.8);
    assert!(unit.tags.contains("python"));
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let engine = common::test_engine().await;
    let id = engine.store_memory(preference_input()).await.unwrap();

    engine.delete_memory(id).await.unwrap();
    assert!(matches!(
        engine.get_memory(id).await.unwrap_err(),
        Error::NotFound { .. }
    ));
    // A fresh store works and gets a new id.
    let next = engine.store_memory(preference_input()).await.unwrap();
    assert_ne!(next, id);
}

#[tokio::test]
async fn update_reports_what_changed() {
    let engine = common::test_engine().await;
    let id = engine.store_memory(preference_input()).await.unwrap();

    let diff = engine
        .update_memory(
            id,
            UpdateMemoryInput {
                content: Some("I prefer Rust for systems work".into()),
                importance: Some(0.9),
                ..UpdateMemoryInput::default()
            },
            false,
        )
        .await
        .unwrap();

    assert!(diff.changed.contains(&"content".to_string()));
    assert!(diff.changed.contains(&"importance".to_string()));
    assert!(diff.embedding_regenerated);

    let unit = engine.get_memory(id).await.unwrap();
    assert_eq!(unit.content, "I prefer Rust for systems work");

    // A no-op update changes nothing.
    let diff = engine
        .update_memory(id, UpdateMemoryInput::default(), false)
        .await
        .unwrap();
    assert!(diff.changed.is_empty());
    assert!(!diff.embedding_regenerated);
}

#[tokio::test]
async fn stale_update_conflicts() {
    let engine = common::test_engine().await;
    let id = engine.store_memory(preference_input()).await.unwrap();

    let err = engine
        .update_memory(
            id,
            UpdateMemoryInput {
                importance: Some(0.1),
                expected_updated_at: Some(1),
                ..UpdateMemoryInput::default()
            },
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
}

#[tokio::test]
async fn list_memories_filters_and_paginates() {
    let engine = common::test_engine().await;
    for i in 0..5 {
        engine
            .store_memory(StoreMemoryInput {
                content: format!("project note number {i} about the repo layout"),
                kind: Some(MemoryKind::Fact),
                project: Some("acme".into()),
                ..StoreMemoryInput::default()
            })
            .await
            .unwrap();
    }
    engine
        .store_memory(StoreMemoryInput {
            content: "global fact with no project attached".into(),
            ..StoreMemoryInput::default()
        })
        .await
        .unwrap();

    let page = engine
        .list_memories(
            Some(Filter::eq("project", "acme")),
            ListSort::CreatedDesc,
            0,
            3,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 3);

    let rest = engine
        .list_memories(
            Some(Filter::eq("project", "acme")),
            ListSort::CreatedDesc,
            3,
            3,
        )
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 2);
}

#[tokio::test]
async fn filter_matching_nothing_is_empty_with_timing() {
    let engine = common::test_engine().await;
    engine.store_memory(preference_input()).await.unwrap();

    let outcome = engine
        .retrieve_memories(
            "data science language",
            5,
            Some(Filter::eq("project", "nonexistent")),
            None,
        )
        .await
        .unwrap();
    assert!(outcome.results.is_empty());
    // Diagnostics are still populated.
    assert!(!outcome.diagnostics.gated);
}

#[tokio::test]
async fn read_only_blocks_writes_but_not_reads() {
    let engine = common::test_engine().await;
    let id = engine.store_memory(preference_input()).await.unwrap();

    engine.set_read_only(true);
    assert!(matches!(
        engine.store_memory(preference_input()).await.unwrap_err(),
        Error::ReadOnly
    ));
    assert!(matches!(
        engine.delete_memory(id).await.unwrap_err(),
        Error::ReadOnly
    ));
    assert!(engine.get_memory(id).await.is_ok());
    assert!(engine
        .retrieve_memories("data science language", 1, None, None)
        .await
        .is_ok());

    engine.set_read_only(false);
    assert!(engine.store_memory(preference_input()).await.is_ok());
}

#[tokio::test]
async fn relations_round_trip_through_the_engine() {
    let engine = common::test_engine().await;
    let a = engine.store_memory(preference_input()).await.unwrap();
    let b = engine
        .store_memory(StoreMemoryInput {
            content: "pandas is the tool I reach for first".into(),
            ..StoreMemoryInput::default()
        })
        .await
        .unwrap();

    engine
        .add_relation(b, a, codemem::RelationKind::Supports)
        .await
        .unwrap();
    let edges = engine.relations_of(a).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].from, b);

    // Deleting a unit removes its edges.
    engine.delete_memory(a).await.unwrap();
    assert!(engine.relations_of(b).await.unwrap().is_empty());
}
