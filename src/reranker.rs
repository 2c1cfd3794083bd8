//! Optional cross-encoder-style rescoring of the top-N fused results.
//!
//! It's an external capability per spec.md §6, consumed the same way the
//! HTTP-backed embedding providers in `embedding.rs` are: a synchronous
//! `ureq` call wrapped in `spawn_blocking` to fit the async trait. Failure
//! handling (log, fall back to fused order) reuses `debug_log!`, matching
//! the teacher's existing warn-and-continue style for schema-mismatch
//! rebuilds in `vector_store.rs`.

use serde::Deserialize;
use serde_json::json;

use crate::error::RerankError;

#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    /// One score per candidate, in the same order as `candidates`.
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, RerankError>;
}

/// Cross-encoder endpoint expecting `{query, candidates}` and returning
/// `{scores: [f32, ...]}`, one score per candidate in order.
pub struct HttpReranker {
    endpoint: String,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

#[derive(Deserialize)]
struct HttpRerankResponse {
    scores: Vec<f32>,
}

#[async_trait::async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, RerankError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = self.endpoint.clone();
        let query = query.to_string();
        let candidates = candidates.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Vec<f32>, RerankError> {
            let body = json!({ "query": query, "candidates": candidates });
            let resp: HttpRerankResponse = ureq::post(&endpoint)
                .send_json(body)
                .map_err(|e| RerankError(format!("rerank request failed: {e}")))?
                .into_json()
                .map_err(|e| RerankError(format!("rerank response decode failed: {e}")))?;
            if resp.scores.len() != candidates.len() {
                return Err(RerankError(format!("reranker returned {} scores for {} candidates", resp.scores.len(), candidates.len())));
            }
            Ok(resp.scores)
        })
        .await
        .map_err(|e| RerankError(format!("rerank task panicked: {e}")))?
    }
}

#[cfg(test)]
pub struct EchoLengthReranker;

#[cfg(test)]
#[async_trait::async_trait]
impl Reranker for EchoLengthReranker {
    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>, RerankError> {
        Ok(candidates.iter().map(|c| c.len() as f32).collect())
    }
}

#[cfg(test)]
pub struct FailingReranker;

#[cfg(test)]
#[async_trait::async_trait]
impl Reranker for FailingReranker {
    async fn rerank(&self, _query: &str, _candidates: &[String]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError("reranker endpoint unreachable".to_string()))
    }
}
