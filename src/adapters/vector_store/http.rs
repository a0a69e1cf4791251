//! Remote ANN service provider
//!
//! Talks to an HNSW-based vector service over its JSON REST API (qdrant
//! wire conventions): collection lifecycle, payload index declaration,
//! batched point operations, filtered search, and paginated scroll.
//!
//! The provider performs no retries. Connection problems surface as
//! `DependencyMissing`, timeouts and 5xx responses as `Transient`; retry
//! policy lives at the indexer and retrieval layers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::domain::error::{Error, Result};
use crate::domain::filter::{Filter, Scalar};
use crate::domain::ports::vector_store::{ScrollPage, VectorStoreProvider};
use crate::domain::types::{MemoryUnit, ScoredPoint, UnitId, VectorPoint};

use super::pool::{ConnectionPool, PoolConfig};

/// Keyword payload fields indexed at collection creation.
const KEYWORD_INDICES: &[&str] = &[
    "kind",
    "context_level",
    "scope",
    "project",
    "details.unit_type",
    "details.language",
];

/// Range payload fields indexed at collection creation.
const RANGE_INDICES: &[&str] = &["importance", "last_accessed"];

/// Vector store provider over a remote ANN service.
pub struct HttpVectorStore {
    pool: Arc<ConnectionPool>,
}

impl HttpVectorStore {
    /// Connect with the given pool configuration.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Ok(Self {
            pool: ConnectionPool::init(config)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.pool.base_url())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let guard = Arc::clone(&self.pool).checkout().await?;
        let mut request = guard.client().request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("malformed ANN response: {e}")))?;
        if status.is_success() {
            Ok(payload)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::not_found(path.to_string()))
        } else if status.is_server_error() {
            Err(Error::transient(format!(
                "ANN service returned {status}: {payload}"
            )))
        } else {
            Err(Error::invalid_filter(format!(
                "ANN service rejected request ({status}): {payload}"
            )))
        }
    }
}

fn classify_reqwest(err: reqwest::Error) -> Error {
    if err.is_connect() {
        Error::dependency("ann-service", err.to_string())
    } else if err.is_timeout() {
        Error::transient(format!("ANN request timed out: {err}"))
    } else {
        Error::transient(err.to_string())
    }
}

/// Map a filter field onto its key in the stored payload document.
fn remote_key(field: &str) -> String {
    match field {
        "unit_type" | "language" | "file_path" | "unit_name" | "start_line" | "end_line" => {
            format!("details.{field}")
        }
        other => other.to_string(),
    }
}

fn scalar_json(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Str(s) => json!(s),
        Scalar::Int(v) => json!(v),
        Scalar::Float(v) => json!(v),
        Scalar::Bool(v) => json!(v),
    }
}

/// Compile the predicate tree to the service's filter JSON.
pub fn compile_filter(filter: &Filter) -> Value {
    match filter {
        Filter::And(children) => json!({
            "must": children.iter().map(compile_filter).collect::<Vec<_>>()
        }),
        Filter::Or(children) => json!({
            "should": children.iter().map(compile_filter).collect::<Vec<_>>()
        }),
        Filter::Not(child) => json!({ "must_not": [compile_filter(child)] }),
        Filter::Eq { field, value } => json!({
            "key": remote_key(field),
            "match": { "value": scalar_json(value) }
        }),
        Filter::In { field, values } => json!({
            "key": remote_key(field),
            "match": { "any": values.iter().map(scalar_json).collect::<Vec<_>>() }
        }),
        Filter::Range { field, lo, hi } => {
            let mut range = serde_json::Map::new();
            if let Some(lo) = lo {
                range.insert("gte".into(), json!(lo));
            }
            if let Some(hi) = hi {
                range.insert("lte".into(), json!(hi));
            }
            json!({ "key": remote_key(field), "range": Value::Object(range) })
        }
        Filter::HasAny { field, values } => json!({
            "key": remote_key(field),
            "match": { "any": values }
        }),
    }
}

fn parse_point(value: &Value) -> Result<VectorPoint> {
    let id: UnitId = value
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::internal("ANN point without parseable id"))?;
    let payload: MemoryUnit = serde_json::from_value(
        value
            .get("payload")
            .cloned()
            .ok_or_else(|| Error::internal("ANN point without payload"))?,
    )?;
    let vector = value
        .get("vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect()
        })
        .unwrap_or_default();
    Ok(VectorPoint {
        id,
        vector,
        payload,
    })
}

#[async_trait]
impl VectorStoreProvider for HttpVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": dimension,
                "distance": "Cosine",
                "quantization_config": { "scalar": { "type": "int8" } }
            }
        });
        match self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{collection}"),
                Some(body),
            )
            .await
        {
            Ok(_) => {}
            // Re-creating an existing collection is fine; the service
            // answers 4xx for a duplicate name.
            Err(Error::InvalidFilter { .. }) => {}
            Err(other) => return Err(other),
        }

        for field in KEYWORD_INDICES {
            let body = json!({ "field_name": field, "field_schema": "keyword" });
            let _ = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/collections/{collection}/index"),
                    Some(body),
                )
                .await;
        }
        for field in RANGE_INDICES {
            let body = json!({ "field_name": field, "field_schema": "float" });
            let _ = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/collections/{collection}/index"),
                    Some(body),
                )
                .await;
        }
        Ok(())
    }

    async fn upsert_batch(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let encoded: Vec<Value> = points
            .iter()
            .map(|p| {
                Ok(json!({
                    "id": p.id.to_string(),
                    "vector": p.vector,
                    "payload": serde_json::to_value(&p.payload)?,
                }))
            })
            .collect::<Result<_>>()?;
        self.request(
            reqwest::Method::PUT,
            &format!("/collections/{collection}/points"),
            Some(json!({ "points": encoded })),
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut body = json!({
            "vector": query,
            "limit": limit,
            "with_payload": true,
            "with_vector": with_vectors,
        });
        if let Some(filter) = filter {
            body["filter"] = compile_filter(filter);
        }
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/search"),
                Some(body),
            )
            .await?;
        let hits = response
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::internal("ANN search response without result array"))?;
        hits.iter()
            .map(|hit| {
                let point = parse_point(hit)?;
                let score = hit
                    .get("score")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| Error::internal("ANN hit without score"))?;
                Ok(ScoredPoint {
                    id: point.id,
                    score: score as f32,
                    vector: with_vectors.then_some(point.vector),
                    payload: point.payload,
                })
            })
            .collect()
    }

    async fn get_by_id(&self, collection: &str, id: UnitId) -> Result<Option<VectorPoint>> {
        match self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{collection}/points/{id}"),
                None,
            )
            .await
        {
            Ok(response) => {
                let result = response
                    .get("result")
                    .ok_or_else(|| Error::internal("ANN get response without result"))?;
                Ok(Some(parse_point(result)?))
            }
            Err(Error::NotFound { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[UnitId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let encoded: Vec<String> = ids.iter().map(UnitId::to_string).collect();
        self.request(
            reqwest::Method::POST,
            &format!("/collections/{collection}/points/delete"),
            Some(json!({ "points": encoded })),
        )
        .await?;
        Ok(ids.len())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let matched = self.count(collection, Some(filter)).await?;
        self.request(
            reqwest::Method::POST,
            &format!("/collections/{collection}/points/delete"),
            Some(json!({ "filter": compile_filter(filter) })),
        )
        .await?;
        Ok(matched)
    }

    async fn update_payloads(
        &self,
        collection: &str,
        updates: Vec<(UnitId, MemoryUnit)>,
    ) -> Result<usize> {
        let applied = updates.len();
        for (id, payload) in updates {
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/payload"),
                Some(json!({
                    "payload": serde_json::to_value(&payload)?,
                    "points": [id.to_string()],
                })),
            )
            .await?;
        }
        Ok(applied)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        cursor: Option<UnitId>,
        limit: usize,
    ) -> Result<ScrollPage> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(filter) = filter {
            body["filter"] = compile_filter(filter);
        }
        if let Some(cursor) = cursor {
            body["offset"] = json!(cursor.to_string());
        }
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/scroll"),
                Some(body),
            )
            .await?;
        let result = response
            .get("result")
            .ok_or_else(|| Error::internal("ANN scroll response without result"))?;
        let points = result
            .get("points")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::internal("ANN scroll response without points"))?
            .iter()
            .map(parse_point)
            .collect::<Result<Vec<_>>>()?;
        let next = result
            .get("next_page_offset")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        Ok(ScrollPage { points, next })
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = compile_filter(filter);
        }
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/count"),
                Some(body),
            )
            .await?;
        response
            .get("result")
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .ok_or_else(|| Error::internal("ANN count response without count"))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_compilation_covers_all_predicates() {
        let filter = Filter::And(vec![
            Filter::eq("kind", "code"),
            Filter::Or(vec![
                Filter::eq("language", "rust"),
                Filter::eq("language", "go"),
            ]),
            Filter::Not(Box::new(Filter::eq("project", "sandbox"))),
            Filter::range("importance", Some(0.5), None),
            Filter::has_any_tag(vec!["auth".into()]),
        ]);
        let compiled = compile_filter(&filter);
        let must = compiled["must"].as_array().unwrap();
        assert_eq!(must.len(), 5);
        assert_eq!(must[0]["key"], "kind");
        // Code-extension fields live under the details payload object.
        assert_eq!(must[1]["should"][0]["key"], "details.language");
        assert_eq!(must[2]["must_not"][0]["key"], "project");
        assert_eq!(must[3]["range"]["gte"], 0.5);
        assert_eq!(must[4]["match"]["any"][0], "auth");
    }

    #[test]
    fn range_bounds_are_optional() {
        let compiled = compile_filter(&Filter::range("last_accessed", None, Some(99.0)));
        assert!(compiled["range"].get("gte").is_none());
        assert_eq!(compiled["range"]["lte"], 99.0);
    }
}
