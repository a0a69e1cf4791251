//! Property checks over the engine's core invariants.

mod common;

use codemem::adapters::embedding::hashing::HashingBackend;
use codemem::domain::ports::embedding::EmbeddingBackend;
use codemem::services::indexing::unit_id;
use proptest::prelude::*;

proptest! {
    /// Deterministic ids: equal inputs agree, any differing component
    /// disagrees.
    #[test]
    fn unit_ids_depend_on_every_component(
        project in "[a-z]{1,12}",
        file in "[a-z/]{1,24}",
        hash in "[0-9a-f]{8,64}",
    ) {
        let id = unit_id(&project, &file, &hash);
        prop_assert_eq!(id, unit_id(&project, &file, &hash));

        let other = format!("{project}x");
        prop_assert_ne!(id, unit_id(&other, &file, &hash));
        let other = format!("{file}x");
        prop_assert_ne!(id, unit_id(&project, &other, &hash));
        let other = format!("{hash}0");
        prop_assert_ne!(id, unit_id(&project, &file, &other));
    }

    /// Every embedding has the configured dimension and unit L2 norm
    /// within 1e-4.
    #[test]
    fn embeddings_are_unit_normalized(texts in proptest::collection::vec(".{0,120}", 1..8)) {
        let mut backend = HashingBackend::new(96);
        let vectors = backend.embed_batch(&texts).unwrap();
        prop_assert_eq!(vectors.len(), texts.len());
        for vector in vectors {
            prop_assert_eq!(vector.len(), 96);
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            prop_assert!((norm - 1.0).abs() < 1e-4, "norm {} out of bounds", norm);
        }
    }

    /// Content sanitization is idempotent: a second pass never changes the
    /// first pass's output, and the output never carries stripped controls.
    #[test]
    fn sanitization_is_idempotent(text in ".{1,200}") {
        if let Ok(clean) = codemem::validation::validate_content(&text) {
            let again = codemem::validation::validate_content(&clean).unwrap();
            prop_assert_eq!(&again, &clean);
            prop_assert!(!clean.chars().any(|c| c.is_control() && c != '\n' && c != '\t'));
        }
    }
}

/// Retrieval results are always non-ascending in score and bounded by
/// min(k, corpus size).
#[tokio::test]
async fn result_lists_are_bounded_and_sorted() {
    use codemem::services::StoreMemoryInput;

    let engine = common::test_engine().await;
    for i in 0..7 {
        engine
            .store_memory(StoreMemoryInput {
                content: format!("retry budget note {i} for the ingest path"),
                ..StoreMemoryInput::default()
            })
            .await
            .unwrap();
    }

    for k in [0usize, 1, 3, 7, 20] {
        let outcome = engine
            .retrieve_memories("retry budget ingest", k, None, None)
            .await
            .unwrap();
        assert!(outcome.results.len() <= k.min(7));
        for pair in outcome.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
