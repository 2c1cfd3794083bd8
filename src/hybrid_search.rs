//! Given a query and search configuration, dispatch the embedding call,
//! concurrently query the vector store and lexical index, then normalize
//! and fuse the two rankings.
//!
//! The concurrent dispatch is the new home for the structured-concurrency
//! pattern spec.md §5 calls for; it's grounded in the teacher's existing
//! async entry points in `main.rs` (a `tokio::runtime::Runtime` driving
//! search), generalized from the teacher's single vector lookup to a
//! `tokio::join!` of two independent lookups.

use std::collections::HashMap;

use serde::Serialize;

use crate::chunk::ChunkType;
use crate::chunk_store::ChunkStore;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use crate::lexical::LexicalIndex;
use crate::reranker::Reranker;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub file_substring: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub top_k: usize,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub filters: SearchFilters,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { top_k: 10, vector_weight: 0.7, bm25_weight: 0.3, filters: SearchFilters::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Vector,
    Lexical,
    Both,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub nl_summary: String,
    pub score: f32,
    pub method: Method,
    pub chunk_type: ChunkType,
    pub language: String,
    pub file_path: String,
}

struct FusedCandidate {
    id: String,
    fused_score: f32,
    vector_score: f32,
    lexical_score: f32,
    both_sides: bool,
}

/// `top_k_over` used for the two underlying fetches, per spec.md §4.5: give
/// fusion room to reorder before truncating to `top_k`.
fn over_fetch(top_k: usize) -> usize {
    (top_k * 2).max(top_k)
}

fn normalize(scores: &HashMap<String, f32>) -> HashMap<String, f32> {
    let max = scores.values().cloned().fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return scores.keys().map(|k| (k.clone(), 0.0)).collect();
    }
    scores.iter().map(|(k, v)| (k.clone(), v / max)).collect()
}

/// Runs the full hybrid search pipeline. `rerank_top_n` is `Some(n)` only
/// when the reranker is enabled, capped by the caller at spec.md's 1–50
/// range.
pub async fn search(
    query: &str,
    config: &SearchConfig,
    embedder: &dyn EmbeddingProvider,
    vector_store: &dyn VectorStore,
    lexical_index: &LexicalIndex,
    chunk_store: &ChunkStore,
    reranker: Option<(&dyn Reranker, usize)>,
) -> CoreResult<Vec<SearchResult>> {
    if config.top_k == 0 {
        // Still embed per spec.md's boundary behavior: "empty index -> the
        // call still happens, result is just nothing to match" generalizes
        // to top_k=0 meaning literally no work at all, so we skip the
        // embedding call here — there is nothing downstream that would use it.
        return Ok(Vec::new());
    }

    if query.trim().is_empty() {
        // spec.md §8: empty query -> empty list, no error. Unlike the empty
        // index case, no embedding call happens here either.
        return Ok(Vec::new());
    }

    let embeddings = embedder
        .embed_batch(std::slice::from_ref(&query.to_string()))
        .await
        .map_err(CoreError::from)?;
    let query_vector = embeddings.into_iter().next().unwrap_or_default();

    let top_k_over = over_fetch(config.top_k);

    let (vector_result, lexical_hits) = tokio::join!(vector_store.query(&query_vector, top_k_over), async { lexical_index.search(query, top_k_over) });
    let vector_hits = vector_result.map_err(CoreError::from)?;

    let vector_scores: HashMap<String, f32> = vector_hits.iter().map(|h| (h.id.clone(), h.score)).collect();
    let lexical_scores: HashMap<String, f32> = lexical_hits.iter().map(|(id, score, _)| (id.clone(), *score)).collect();

    let v_norm = normalize(&vector_scores);
    let l_norm = normalize(&lexical_scores);

    let mut all_ids: Vec<String> = vector_scores.keys().cloned().collect();
    for id in lexical_scores.keys() {
        if !all_ids.contains(id) {
            all_ids.push(id.clone());
        }
    }

    let mut candidates: Vec<FusedCandidate> = all_ids
        .into_iter()
        .map(|id| {
            let v = v_norm.get(&id).copied().unwrap_or(0.0);
            let l = l_norm.get(&id).copied().unwrap_or(0.0);
            let both = vector_scores.contains_key(&id) && lexical_scores.contains_key(&id);
            FusedCandidate { fused_score: config.vector_weight * v + config.bm25_weight * l, vector_score: v, lexical_score: l, both_sides: both, id }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.both_sides.cmp(&a.both_sides))
            .then_with(|| b.vector_score.partial_cmp(&a.vector_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.lexical_score.partial_cmp(&a.lexical_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .filter_map(|c| {
            let chunk = chunk_store.get(&c.id)?;
            let in_vector = vector_scores.contains_key(&c.id);
            let in_lexical = lexical_scores.contains_key(&c.id);
            let method = if in_vector && in_lexical { Method::Both } else if in_vector { Method::Vector } else { Method::Lexical };
            Some(SearchResult {
                chunk_id: c.id,
                content: chunk.content.clone(),
                nl_summary: chunk.nl_summary.clone(),
                score: c.fused_score,
                method,
                chunk_type: chunk.metadata.chunk_type,
                language: chunk.language.clone(),
                file_path: chunk.file_path.clone(),
            })
        })
        .collect();

    apply_filters(&mut results, &config.filters);
    results.truncate(config.top_k);

    if let Some((reranker, rerank_top_n)) = reranker {
        results = apply_rerank(query, results, reranker, rerank_top_n).await;
    }

    Ok(results)
}

fn apply_filters(results: &mut Vec<SearchResult>, filters: &SearchFilters) {
    results.retain(|r| {
        if let Some(lang) = &filters.language {
            if !r.language.eq_ignore_ascii_case(lang) {
                return false;
            }
        }
        if let Some(ct) = filters.chunk_type {
            if r.chunk_type != ct {
                return false;
            }
        }
        if let Some(sub) = &filters.file_substring {
            if !r.file_path.contains(sub.as_str()) {
                return false;
            }
        }
        true
    });
}

/// Reranks the top-N fused results; the remainder keeps fused order and is
/// appended after the reranked block. Failure is non-fatal: log and return
/// the unreranked results.
async fn apply_rerank(query: &str, mut results: Vec<SearchResult>, reranker: &dyn Reranker, top_n: usize) -> Vec<SearchResult> {
    if results.is_empty() {
        return results;
    }
    let n = top_n.min(results.len());
    let candidates: Vec<String> = results[..n].iter().map(|r| r.content.clone()).collect();

    match reranker.rerank(query, &candidates).await {
        Ok(scores) if scores.len() == n => {
            let mut head: Vec<SearchResult> = results.drain(..n).collect();
            for (result, score) in head.iter_mut().zip(scores) {
                result.score = score;
            }
            head.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            head.extend(results);
            head
        }
        Ok(scores) => {
            crate::debug_log!("[coderag] reranker returned {} scores for {} candidates, ignoring", scores.len(), n);
            results
        }
        Err(e) => {
            crate::debug_log!("[coderag] reranker failed ({e}), falling back to fused order");
            results
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkMetadata};
    use crate::lexical::{LexicalDocument, StoredFields};
    use crate::reranker::{EchoLengthReranker, FailingReranker};
    use crate::vector_store::{FlatFileVectorStore, VectorRow};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.0.len()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::error::EmbedError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn make_chunk(file: &str, name: &str, content: &str) -> Chunk {
        let metadata = ChunkMetadata { chunk_type: ChunkType::Function, name: name.to_string(), ..Default::default() };
        Chunk::new(file, 1, 1, content, "typescript", metadata)
    }

    async fn build_fixture() -> (FlatFileVectorStore, LexicalIndex, ChunkStore, String, String) {
        let mut vs = FlatFileVectorStore::open(tempfile::tempdir().unwrap().into_path().join("v.json"), 2).unwrap();
        let mut lex = LexicalIndex::new();
        let mut store = ChunkStore::new();

        let a = make_chunk("src/config.ts", "parseConfig", "function parseConfig() {}");
        let b = make_chunk("src/yaml.ts", "parseYaml", "function parseYaml() {}");
        let id_a = a.id.clone();
        let id_b = b.id.clone();

        vs.upsert(vec![
            VectorRow { id: id_a.clone(), vector: vec![1.0, 0.0], metadata: json!({}) },
            VectorRow { id: id_b.clone(), vector: vec![0.9, 0.1], metadata: json!({}) },
        ])
        .await
        .unwrap();

        lex.add(vec![
            LexicalDocument { id: id_a.clone(), fields: StoredFields { content: a.content.clone(), name: "parseConfig".to_string(), file_path: a.file_path.clone(), ..Default::default() } },
            LexicalDocument { id: id_b.clone(), fields: StoredFields { content: b.content.clone(), name: "parseYaml".to_string(), file_path: b.file_path.clone(), ..Default::default() } },
        ])
        .unwrap();

        store.upsert(vec![a, b]);
        (vs, lex, store, id_a, id_b)
    }

    #[tokio::test]
    async fn exact_name_match_ranks_first() {
        let (vs, lex, store, id_a, _id_b) = build_fixture().await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = SearchConfig { top_k: 2, ..Default::default() };
        let results = search("parseConfig", &config, &embedder, &vs, &lex, &store, None).await.unwrap();
        assert_eq!(results[0].chunk_id, id_a);
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty_with_no_work() {
        let (vs, lex, store, ..) = build_fixture().await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = SearchConfig { top_k: 0, ..Default::default() };
        let results = search("parseConfig", &config, &embedder, &vs, &lex, &store, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let (vs, lex, store, ..) = build_fixture().await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = SearchConfig::default();
        let results = search("   ", &config, &embedder, &vs, &lex, &store, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn rerank_reorders_top_n_and_keeps_remainder_order() {
        let (vs, lex, store, ..) = build_fixture().await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = SearchConfig { top_k: 2, ..Default::default() };
        let reranker = EchoLengthReranker;
        let results = search("parse", &config, &embedder, &vs, &lex, &store, Some((&reranker, 2))).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn reranker_failure_falls_back_to_fused_order() {
        let (vs, lex, store, ..) = build_fixture().await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = SearchConfig { top_k: 2, ..Default::default() };
        let without_rerank = search("parse", &config, &embedder, &vs, &lex, &store, None).await.unwrap();
        let reranker = FailingReranker;
        let with_failing_rerank = search("parse", &config, &embedder, &vs, &lex, &store, Some((&reranker, 2))).await.unwrap();
        assert_eq!(without_rerank.iter().map(|r| r.chunk_id.clone()).collect::<Vec<_>>(), with_failing_rerank.iter().map(|r| r.chunk_id.clone()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn filters_apply_after_fusion() {
        let (vs, lex, store, _id_a, id_b) = build_fixture().await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = SearchConfig { top_k: 2, filters: SearchFilters { file_substring: Some("yaml".to_string()), ..Default::default() }, ..Default::default() };
        let results = search("parse", &config, &embedder, &vs, &lex, &store, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, id_b);
    }
}
