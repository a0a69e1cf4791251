//! Incremental indexing flows: change detection, deterministic ids,
//! cache reuse, and unit-count reconciliation.

mod common;

use std::fs;
use std::path::Path;

use codemem::services::IndexOutcome;
use codemem::{Filter, SearchMode, UnitId};

/// Write a small python tree: `files` modules, `funcs_per_file` functions
/// each.
fn write_tree(root: &Path, files: usize, funcs_per_file: usize) {
    for f in 0..files {
        let mut source = String::from("import os\n\n");
        for g in 0..funcs_per_file {
            source.push_str(&format!(
                "def handler_{f}_{g}(payload):\n    return payload.get('field_{g}')\n\n"
            ));
        }
        fs::write(root.join(format!("module_{f}.py")), source).unwrap();
    }
}

fn completed(outcome: IndexOutcome) -> codemem::IndexingStats {
    match outcome {
        IndexOutcome::Completed(stats) => stats,
        IndexOutcome::Background(handle) => panic!("unexpected background job: {handle:?}"),
    }
}

#[tokio::test]
async fn full_then_incremental_reindex() {
    let engine = common::test_engine().await;
    let dir = tempfile::TempDir::new().unwrap();
    write_tree(dir.path(), 20, 5);

    // Run 1: everything is new.
    let run1 = completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    assert_eq!(run1.files_total, 20);
    assert_eq!(run1.files_indexed, 20);
    assert_eq!(run1.units_indexed, 100);
    assert_eq!(run1.cache_misses, 100);

    // Run 2: untouched tree, no work beyond hashing.
    let run2 = completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    assert_eq!(run2.files_indexed, 0);
    assert_eq!(run2.files_unchanged, 20);
    assert_eq!(run2.cache_misses, 0);

    // Touch one file, changing one function body.
    let target = dir.path().join("module_3.py");
    let source = fs::read_to_string(&target).unwrap();
    let patched = source.replace("payload.get('field_0')", "payload['field_0']");
    assert_ne!(source, patched);
    fs::write(&target, patched).unwrap();

    // Run 3: only the touched file re-embeds, and only the changed unit
    // misses the cache.
    let run3 = completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    assert_eq!(run3.files_indexed, 1);
    assert_eq!(run3.files_unchanged, 19);
    assert_eq!(run3.units_indexed, 5);
    assert_eq!(run3.cache_misses, 1, "unchanged units must hit the cache");
    assert_eq!(run3.cache_hits, 4);

    // Unit counts reconcile after all three runs.
    let stats = engine.get_stats().await.unwrap();
    assert_eq!(stats.stored_units, 100);
}

#[tokio::test]
async fn ids_are_stable_across_reindexes() {
    let engine = common::test_engine().await;
    let dir = tempfile::TempDir::new().unwrap();
    write_tree(dir.path(), 3, 4);

    async fn collect_ids(engine: &codemem::MemoryEngine) -> Vec<UnitId> {
        let page = engine
            .list_memories(
                Some(Filter::eq("kind", "code")),
                codemem::services::ListSort::CreatedDesc,
                0,
                1000,
            )
            .await
            .unwrap();
        let mut ids: Vec<UnitId> = page.items.iter().map(|u| u.id).collect();
        ids.sort();
        ids
    }

    completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    let first = collect_ids(&engine).await;
    assert_eq!(first.len(), 12);

    completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    let second = collect_ids(&engine).await;
    assert_eq!(first, second, "re-extracting unchanged units must keep ids");
}

#[tokio::test]
async fn changed_files_replace_their_old_units() {
    let engine = common::test_engine().await;
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(
        dir.path().join("api.py"),
        "def alpha_handler(x):\n    return x + 1\n",
    )
    .unwrap();

    completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );

    fs::write(
        dir.path().join("api.py"),
        "def beta_processor(x):\n    return x + 2\n",
    )
    .unwrap();
    completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );

    // The stale unit is gone from both retrieval legs.
    let outcome = engine
        .search_code(
            "alpha_handler",
            codemem::services::CodeSearchRequest {
                project: Some("acme".into()),
                limit: 10,
                mode: SearchMode::Keyword,
                ..codemem::services::CodeSearchRequest::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.results.is_empty(), "stale unit still searchable");

    let outcome = engine
        .search_code(
            "beta_processor",
            codemem::services::CodeSearchRequest {
                project: Some("acme".into()),
                limit: 10,
                mode: SearchMode::Keyword,
                ..codemem::services::CodeSearchRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
}

#[tokio::test]
async fn ignore_rules_exclude_noise_directories() {
    let engine = common::test_engine().await;
    let dir = tempfile::TempDir::new().unwrap();
    write_tree(dir.path(), 2, 2);
    let noise = dir.path().join("node_modules");
    fs::create_dir_all(&noise).unwrap();
    fs::write(noise.join("dep.py"), "def hidden():\n    return 0\n").unwrap();

    let stats = completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    assert_eq!(stats.files_total, 2, "node_modules leaked into the walk");
}

#[tokio::test]
async fn custom_ignore_file_is_honored() {
    let engine = common::test_engine().await;
    let dir = tempfile::TempDir::new().unwrap();
    write_tree(dir.path(), 2, 2);
    fs::write(dir.path().join(".cmignore"), "module_0.py\n").unwrap();

    let stats = completed(
        engine
            .index_directory("acme", dir.path(), true)
            .await
            .unwrap(),
    );
    assert_eq!(stats.files_total, 1);
}
