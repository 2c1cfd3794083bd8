//! Persistent associative store from chunk id to (vector, metadata).
//!
//! Grounded directly on the teacher's `CodebaseIndex`/`IndexStore` in this
//! same file: flat-file JSON persistence, no external database, generalized
//! from file-path-keyed single-vector-per-file rows to chunk-id-keyed
//! one-row-per-chunk rows with the id/dimension/batch-atomicity contract
//! this module now needs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-:.]{1,256}$").expect("static regex is valid"))
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(StoreError(format!("invalid vector store id: {id:?}")))
    }
}

/// One row to upsert: a chunk id, its embedding, and opaque stored metadata.
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// A single nearest-neighbor hit. `score` is monotonically increasing in
/// similarity (larger = more similar).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Insert-or-replace by id. Either every row in the batch is applied or
    /// the call reports a store-error with no partial effect.
    async fn upsert(&mut self, rows: Vec<VectorRow>) -> Result<(), StoreError>;

    /// Up to `top_k` rows whose stored vectors are closest to `query`,
    /// read-consistent with the most recently completed upsert.
    async fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError>;

    async fn delete(&mut self, ids: &[String]) -> Result<(), StoreError>;

    async fn count(&self) -> usize;

    /// Flushes any buffered state. A no-op for stores that write through.
    async fn close(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    vector: Vec<f32>,
    metadata: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    dimensions: usize,
    rows: HashMap<String, StoredRow>,
}

/// The one shipped `VectorStore` implementation: a brute-force cosine scan
/// over a flat JSON file, exactly the teacher's `IndexStore` persistence
/// model (`load`/`save`, schema-mismatch-triggers-rebuild) applied to
/// chunk-id-keyed rows instead of file-path-keyed ones.
pub struct FlatFileVectorStore {
    path: PathBuf,
    dimensions: usize,
    rows: HashMap<String, StoredRow>,
    dirty: bool,
}

impl FlatFileVectorStore {
    /// Opens (or creates) the store at `path`. If a file exists but its
    /// declared dimensions don't match, it's discarded and rebuilt empty —
    /// same warn-and-rebuild posture as the teacher's `IndexStore::load`.
    pub fn open(path: impl Into<PathBuf>, dimensions: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let rows = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<IndexDocument>(&text) {
                Ok(doc) if doc.dimensions == dimensions => doc.rows,
                Ok(_doc) => {
                    crate::debug_log!("[coderag] vector store dimension mismatch at {}, rebuilding", path.display());
                    HashMap::new()
                }
                Err(e) => {
                    crate::debug_log!("[coderag] vector store schema changed or corrupted ({e}), rebuilding");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Ok(Self { path, dimensions, rows, dirty: false })
    }

    fn save(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError(format!("failed to create store dir: {e}")))?;
        }
        let doc = IndexDocument { dimensions: self.dimensions, rows: self.rows.clone() };
        let text = serde_json::to_string(&doc).map_err(|e| StoreError(format!("failed to serialize vector store: {e}")))?;
        std::fs::write(&self.path, text).map_err(|e| StoreError(format!("failed to write vector store: {e}")))?;
        self.dirty = false;
        Ok(())
    }
}

/// Distance→score transform, picked per spec.md's Open Question: the only
/// binding property is monotonicity, and `1/(1+d)` is the transform
/// spec.md itself suggests as "reasonable".
fn cosine_to_score(cosine: f32) -> f32 {
    let d = 1.0 - cosine;
    1.0 / (1.0 + d)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait::async_trait]
impl VectorStore for FlatFileVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&mut self, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        // Validate the whole batch before mutating anything.
        for row in &rows {
            validate_id(&row.id)?;
            if row.vector.len() != self.dimensions {
                return Err(StoreError(format!(
                    "dimension mismatch for id {}: expected {}, got {}",
                    row.id,
                    self.dimensions,
                    row.vector.len()
                )));
            }
        }
        for row in rows {
            self.rows.insert(row.id, StoredRow { vector: row.vector, metadata: row.metadata });
        }
        self.dirty = true;
        self.save()
    }

    async fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(StoreError(format!("query dimension mismatch: expected {}, got {}", self.dimensions, query.len())));
        }

        let mut scored: Vec<VectorHit> = self
            .rows
            .iter()
            .map(|(id, row)| VectorHit { id: id.clone(), score: cosine_to_score(cosine_similarity(query, &row.vector)), metadata: row.metadata.clone() })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&mut self, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            validate_id(id)?;
        }
        let mut changed = false;
        for id in ids {
            if self.rows.remove(id).is_some() {
                changed = true;
            }
        }
        if changed {
            self.dirty = true;
            self.save()?;
        }
        Ok(())
    }

    async fn count(&self) -> usize {
        self.rows.len()
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, v: Vec<f32>) -> VectorRow {
        VectorRow { id: id.to_string(), vector: v, metadata: json!({}) }
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_id_before_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatFileVectorStore::open(dir.path().join("store.json"), 2).unwrap();
        let err = store.upsert(vec![row("valid", vec![1.0, 0.0]), row("bad id!", vec![0.0, 1.0])]).await;
        assert!(err.is_err());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn upsert_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatFileVectorStore::open(dir.path().join("store.json"), 2).unwrap();
        let err = store.upsert(vec![row("a", vec![1.0, 0.0, 0.0])]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn query_returns_nearest_by_cosine() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatFileVectorStore::open(dir.path().join("store.json"), 2).unwrap();
        store.upsert(vec![row("a", vec![1.0, 0.0]), row("b", vec![0.0, 1.0])]).await.unwrap();
        let hits = store.query(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatFileVectorStore::open(dir.path().join("store.json"), 2).unwrap();
        store.upsert(vec![row("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(vec![VectorRow { id: "a".to_string(), vector: vec![0.0, 1.0], metadata: json!({"v": 1}) }]).await.unwrap();
        assert_eq!(store.count().await, 1);
        let hits = store.query(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].metadata, json!({"v": 1}));
    }

    #[tokio::test]
    async fn delete_missing_id_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatFileVectorStore::open(dir.path().join("store.json"), 2).unwrap();
        store.upsert(vec![row("a", vec![1.0, 0.0])]).await.unwrap();
        store.delete(&["nonexistent".to_string()]).await.unwrap();
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn reopen_reloads_persisted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let mut store = FlatFileVectorStore::open(&path, 2).unwrap();
            store.upsert(vec![row("a", vec![1.0, 0.0])]).await.unwrap();
            store.close().await.unwrap();
        }
        let reopened = FlatFileVectorStore::open(&path, 2).unwrap();
        assert_eq!(reopened.count().await, 1);
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty_with_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatFileVectorStore::open(dir.path().join("store.json"), 2).unwrap();
        store.upsert(vec![row("a", vec![1.0, 0.0])]).await.unwrap();
        let hits = store.query(&[1.0, 0.0], 0).await.unwrap();
        assert!(hits.is_empty());
    }
}
