//! Hybrid search flows over an indexed corpus: keyword, semantic, and
//! fused modes (S4), plus file-pattern and language filtering.

mod common;

use std::fs;

use codemem::services::CodeSearchRequest;
use codemem::{Language, SearchMode};

/// Corpus: an authentication module plus unrelated code. One function is
/// named `authenticate_user`; another mentions "login" only in its
/// docstring.
async fn indexed_engine() -> (codemem::MemoryEngine, tempfile::TempDir) {
    let engine = common::test_engine().await;
    let dir = tempfile::TempDir::new().unwrap();

    fs::write(
        dir.path().join("auth.py"),
        r#"def authenticate_user(username, password):
    record = load_credentials(username)
    return record is not None and record.check(password)

def start_flow(request):
    """Begin the user login flow and issue a session token."""
    session = issue_session(request.user)
    return session
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("render.py"),
        r#"def render_chart(points):
    return [scale(p) for p in points]

def scale(point):
    return point * 2
"#,
    )
    .unwrap();

    match engine
        .index_directory("acme", dir.path(), true)
        .await
        .unwrap()
    {
        codemem::services::IndexOutcome::Completed(stats) => {
            assert_eq!(stats.units_indexed, 4)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    (engine, dir)
}

fn request(limit: usize, mode: SearchMode) -> CodeSearchRequest {
    CodeSearchRequest {
        project: Some("acme".into()),
        limit,
        mode,
        ..CodeSearchRequest::default()
    }
}

fn unit_names(outcome: &codemem::RetrievalOutcome) -> Vec<String> {
    outcome
        .results
        .iter()
        .filter_map(|r| r.payload.code().map(|c| c.unit_name.clone()))
        .collect()
}

#[tokio::test]
async fn keyword_mode_ranks_the_exact_identifier_first() {
    let (engine, _dir) = indexed_engine().await;
    let outcome = engine
        .search_code("authenticate_user", request(3, SearchMode::Keyword))
        .await
        .unwrap();
    assert_eq!(unit_names(&outcome)[0], "authenticate_user");
    assert!(outcome.results[0].bm25_score > 0.0);
    assert_eq!(outcome.results[0].similarity, 0.0);
}

#[tokio::test]
async fn semantic_mode_surfaces_the_docstring_function() {
    let (engine, _dir) = indexed_engine().await;
    let outcome = engine
        .search_code("user login flow", request(3, SearchMode::Semantic))
        .await
        .unwrap();
    let names = unit_names(&outcome);
    assert!(
        names.contains(&"start_flow".to_string()),
        "docstring function missing from top-3: {names:?}"
    );
}

#[tokio::test]
async fn hybrid_mode_combines_both_signals() {
    let (engine, _dir) = indexed_engine().await;
    let outcome = engine
        .search_code("authenticate_user login", request(3, SearchMode::Hybrid))
        .await
        .unwrap();
    let names = unit_names(&outcome);
    assert_eq!(names[0], "authenticate_user");
    assert!(
        names.contains(&"start_flow".to_string()),
        "login-docstring function missing from top-3: {names:?}"
    );
    assert!(!outcome.diagnostics.matched_keywords.is_empty());
}

#[tokio::test]
async fn file_pattern_restricts_results() {
    let (engine, _dir) = indexed_engine().await;
    let mut req = request(10, SearchMode::Keyword);
    req.file_pattern = Some("render.py".into());
    let outcome = engine.search_code("render_chart points", req).await.unwrap();
    assert!(!outcome.results.is_empty());
    assert!(outcome
        .results
        .iter()
        .all(|r| r.payload.code().unwrap().file_path == "render.py"));
}

#[tokio::test]
async fn language_filter_excludes_other_languages() {
    let (engine, dir) = indexed_engine().await;
    fs::write(
        dir.path().join("auth.rs"),
        "pub fn authenticate_user(name: &str) -> bool {\n    !name.is_empty()\n}\n",
    )
    .unwrap();
    match engine
        .index_directory("acme", dir.path(), true)
        .await
        .unwrap()
    {
        codemem::services::IndexOutcome::Completed(_) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    let mut req = request(10, SearchMode::Keyword);
    req.language = Some(Language::Rust);
    let outcome = engine.search_code("authenticate_user", req).await.unwrap();
    assert!(!outcome.results.is_empty());
    assert!(outcome
        .results
        .iter()
        .all(|r| r.payload.code().unwrap().language == Language::Rust));
}

#[tokio::test]
async fn find_similar_code_matches_by_shape() {
    let (engine, _dir) = indexed_engine().await;
    let outcome = engine
        .find_similar_code(
            "def check_user(username, password):\n    record = load_credentials(username)\n    return record.check(password)\n",
            request(2, SearchMode::Semantic),
        )
        .await
        .unwrap();
    let names = unit_names(&outcome);
    assert_eq!(
        names[0], "authenticate_user",
        "closest unit should be the credential checker: {names:?}"
    );
}
