//! Embedding providers consumed as opaque capabilities.
//!
//! The core never implements an embedding model itself; it calls one of a
//! closed set of provider variants, all behind `EmbeddingProvider`. A local
//! static-embedding path reuses the teacher's existing `model2vec-rs`
//! integration; the two HTTP-backed variants are new, grounded in the
//! teacher's already-declared (if previously dormant) `ureq` dependency.

use model2vec_rs::model::StaticModel;
use serde::Deserialize;
use serde_json::json;

use crate::error::EmbedError;

/// `embed_batch` preserves input order; on any error none of the batch is
/// considered embedded.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// The provider's own batch size ceiling; callers split larger
    /// requests accordingly. `usize::MAX` means "no limit known".
    fn max_batch_size(&self) -> usize {
        usize::MAX
    }
}

/// Splits `texts` into provider-sized batches, calls `embed_one_batch` for
/// each, and reassembles the order-preserved result. Shared by every HTTP
/// provider below; the local provider has no batch ceiling so it bypasses
/// this helper entirely.
async fn embed_in_batches<F, Fut>(texts: &[String], batch_size: usize, embed_one_batch: F) -> Result<Vec<Vec<f32>>, EmbedError>
where
    F: Fn(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Vec<f32>>, EmbedError>>,
{
    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size.max(1)) {
        let embedded = embed_one_batch(chunk.to_vec()).await?;
        if embedded.len() != chunk.len() {
            return Err(EmbedError(format!(
                "provider returned {} vectors for a batch of {}",
                embedded.len(),
                chunk.len()
            )));
        }
        out.extend(embedded);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Local static embedder (model2vec-rs)
// ---------------------------------------------------------------------------

/// Wraps the teacher's existing embedding path (`StaticModel::encode_single`
/// in `vector_store.rs`), generalized to the trait's batch signature.
pub struct LocalStaticEmbedder {
    model: StaticModel,
    dimensions: usize,
}

impl LocalStaticEmbedder {
    pub fn load(model_id: &str, dimensions: usize) -> Result<Self, EmbedError> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .map_err(|e| EmbedError(format!("failed to load static model {model_id}: {e}")))?;
        Ok(Self { model, dimensions })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LocalStaticEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(texts.iter().map(|t| self.model.encode_single(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// Ollama-style local HTTP endpoint
// ---------------------------------------------------------------------------

/// Synchronous-transport provider over a local Ollama-style `/api/embed`
/// endpoint. `ureq` is 100% synchronous, same as the teacher's rationale
/// for it elsewhere, so calls run inside `spawn_blocking` to fit the async
/// trait without blocking the executor.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self { base_url: base_url.into(), model: model.into(), dimensions, batch_size: 64 }
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let model = self.model.clone();

        embed_in_batches(texts, self.batch_size, |batch| {
            let url = url.clone();
            let model = model.clone();
            async move {
                tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, EmbedError> {
                    let body = json!({ "model": model, "input": batch });
                    let resp: OllamaEmbedResponse = ureq::post(&url)
                        .send_json(body)
                        .map_err(|e| EmbedError(format!("ollama embed request failed: {e}")))?
                        .into_json()
                        .map_err(|e| EmbedError(format!("ollama embed response decode failed: {e}")))?;
                    Ok(resp.embeddings)
                })
                .await
                .map_err(|e| EmbedError(format!("ollama embed task panicked: {e}")))?
            }
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP endpoint
// ---------------------------------------------------------------------------

pub struct OpenAiCompatibleEmbedder {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self { base_url: base_url.into(), api_key, model: model.into(), dimensions, batch_size: 64 }
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingRow {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbeddingRow>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiCompatibleEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let model = self.model.clone();
        let api_key = self.api_key.clone();

        embed_in_batches(texts, self.batch_size, |batch| {
            let url = url.clone();
            let model = model.clone();
            let api_key = api_key.clone();
            async move {
                tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, EmbedError> {
                    let body = json!({ "model": model, "input": batch });
                    let mut req = ureq::post(&url);
                    if let Some(key) = &api_key {
                        req = req.set("Authorization", &format!("Bearer {key}"));
                    }
                    let mut resp: OpenAiEmbedResponse = req
                        .send_json(body)
                        .map_err(|e| EmbedError(format!("openai-compatible embed request failed: {e}")))?
                        .into_json()
                        .map_err(|e| EmbedError(format!("openai-compatible embed response decode failed: {e}")))?;
                    resp.data.sort_by_key(|row| row.index);
                    Ok(resp.data.into_iter().map(|row| row.embedding).collect())
                })
                .await
                .map_err(|e| EmbedError(format!("openai-compatible embed task panicked: {e}")))?
            }
        })
        .await
    }
}
