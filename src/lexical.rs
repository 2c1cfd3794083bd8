//! Field-weighted BM25-style sparse index.
//!
//! The teacher has no lexical side of its own — it's pure vector search
//! plus an exact-symbol "sniper" boost. This module is new, but stays in
//! the teacher's stated "no external DB, flat JSON" philosophy
//! (`vector_store.rs`'s own header comment) rather than reaching for a
//! segment-file engine like `tantivy`: the on-disk format is pinned to a
//! single JSON blob, which a hand-rolled in-memory inverted index
//! satisfies directly and tantivy's own segment files would not.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Okapi BM25 defaults. spec.md leaves the exact variant open and only
/// pins field weights and boost ordering as binding, so standard k1/b are
/// used here.
const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

const FIELD_NAMES: [&str; 4] = ["content", "nl_summary", "file_path", "name"];

fn field_weight(field: &str) -> f32 {
    match field {
        "nl_summary" => 2.0,
        "name" => 1.5,
        "content" => 1.0,
        "file_path" => 0.5,
        _ => 0.0,
    }
}

/// The stored fields of one lexical document, kept alongside its tokens so
/// `search` can hand back the original text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredFields {
    pub content: String,
    pub nl_summary: String,
    pub file_path: String,
    pub name: String,
    pub chunk_type: String,
    pub language: String,
}

/// Input to `add`: a chunk id plus the four tokenizable fields and the
/// fields stored verbatim for display.
#[derive(Debug, Clone)]
pub struct LexicalDocument {
    pub id: String,
    pub fields: StoredFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Posting {
    doc_id: String,
    term_freq: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FieldIndex {
    /// term -> postings, insertion order preserved for stable tie-breaks.
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: HashMap<String, u32>,
    total_length: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexedDocument {
    fields: StoredFields,
    insertion_order: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LexicalIndex {
    fields: HashMap<String, FieldIndex>,
    documents: HashMap<String, IndexedDocument>,
    next_insertion_order: u64,
}

fn boundary_tokenize(text: &str) -> Vec<String> {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex is valid"));

    let mut tokens = Vec::new();
    for raw in separators.split(text) {
        if raw.is_empty() {
            continue;
        }
        for word in split_case_boundaries(raw) {
            let lower = word.to_ascii_lowercase();
            if !lower.is_empty() {
                tokens.push(lower);
            }
        }
    }
    tokens
}

/// Splits `fooBar`, `FooBar`, `foo_bar` and `foo-bar` into `["foo", "bar"]`.
/// Separator-based splitting (snake_case/kebab-case/path separators)
/// already happened in the caller; this only handles camelCase/PascalCase.
fn split_case_boundaries(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() && chars[i - 1].is_lowercase() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else if i > 0 && i + 1 < chars.len() && c.is_uppercase() && chars[i - 1].is_uppercase() && chars[i + 1].is_lowercase() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn levenshtein_within(a: &str, b: &str, max_distance: usize) -> bool {
    if a == b {
        return true;
    }
    let (a_len, b_len) = (a.chars().count(), b.chars().count());
    if a_len.abs_diff(b_len) > max_distance {
        return false;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0usize; b_len + 1];
    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len] <= max_distance
}

fn field_text<'a>(fields: &'a StoredFields, field: &str) -> &'a str {
    match field {
        "content" => &fields.content,
        "nl_summary" => &fields.nl_summary,
        "file_path" => &fields.file_path,
        "name" => &fields.name,
        _ => "",
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.documents.len()
    }

    /// Adds documents. Not required to be atomic across the whole call, but
    /// a failure partway leaves the index coherent: each document is
    /// indexed and committed individually.
    pub fn add(&mut self, docs: Vec<LexicalDocument>) -> Result<(), StoreError> {
        for doc in docs {
            self.remove(&[doc.id.clone()]);

            let order = self.next_insertion_order;
            self.next_insertion_order += 1;

            for &field_name in &FIELD_NAMES {
                let text = field_text(&doc.fields, field_name);
                let tokens = boundary_tokenize(text);
                if tokens.is_empty() {
                    continue;
                }
                let field_index = self.fields.entry(field_name.to_string()).or_default();
                let mut term_freqs: HashMap<String, u32> = HashMap::new();
                for token in &tokens {
                    *term_freqs.entry(token.clone()).or_insert(0) += 1;
                }
                for (term, freq) in term_freqs {
                    field_index.postings.entry(term).or_default().push(Posting { doc_id: doc.id.clone(), term_freq: freq });
                }
                field_index.doc_lengths.insert(doc.id.clone(), tokens.len() as u32);
                field_index.total_length += tokens.len() as u64;
            }

            self.documents.insert(doc.id.clone(), IndexedDocument { fields: doc.fields, insertion_order: order });
        }
        Ok(())
    }

    /// Removes documents by id. Removing an absent id is a no-op.
    pub fn remove(&mut self, ids: &[String]) {
        for id in ids {
            if self.documents.remove(id).is_none() {
                continue;
            }
            for field_index in self.fields.values_mut() {
                for postings in field_index.postings.values_mut() {
                    if let Some(pos) = postings.iter().position(|p| &p.doc_id == id) {
                        let removed = postings.remove(pos);
                        field_index.total_length = field_index.total_length.saturating_sub(removed.term_freq as u64);
                    }
                }
                field_index.doc_lengths.remove(id);
            }
        }
    }

    fn avg_doc_length(field_index: &FieldIndex) -> f32 {
        if field_index.doc_lengths.is_empty() {
            return 0.0;
        }
        field_index.total_length as f32 / field_index.doc_lengths.len() as f32
    }

    fn bm25_term_score(field_index: &FieldIndex, term: &str, doc_id: &str) -> f32 {
        let Some(postings) = field_index.postings.get(term) else { return 0.0 };
        let Some(posting) = postings.iter().find(|p| p.doc_id == doc_id) else { return 0.0 };

        let n = field_index.doc_lengths.len() as f32;
        let df = postings.len() as f32;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

        let tf = posting.term_freq as f32;
        let doc_len = *field_index.doc_lengths.get(doc_id).unwrap_or(&0) as f32;
        let avg_len = Self::avg_doc_length(field_index).max(1.0);

        idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / avg_len)))
    }

    /// Scores every candidate document against `query`'s tokens, summing
    /// BM25 per matched field times that field's weight; prefix and fuzzy
    /// matches contribute a reduced fraction of the exact-match score.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32, StoredFields)> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let query_tokens = boundary_tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scores: HashMap<String, f32> = HashMap::new();

        for &field_name in &FIELD_NAMES {
            let Some(field_index) = self.fields.get(field_name) else { continue };
            let weight = field_weight(field_name);

            for q_term in &query_tokens {
                let max_edits = ((q_term.chars().count() as f32 * 0.2).floor() as usize).max(1);
                let mut matched_terms: Vec<(String, f32)> = Vec::new();

                if field_index.postings.contains_key(q_term) {
                    matched_terms.push((q_term.clone(), 1.0));
                }
                for term in field_index.postings.keys() {
                    if term == q_term {
                        continue;
                    }
                    if term.starts_with(q_term.as_str()) {
                        matched_terms.push((term.clone(), 0.6));
                    } else if levenshtein_within(term, q_term, max_edits) {
                        matched_terms.push((term.clone(), 0.4));
                    }
                }

                for (term, match_weight) in matched_terms {
                    let Some(postings) = field_index.postings.get(&term) else { continue };
                    for posting in postings {
                        let base = Self::bm25_term_score(field_index, &term, &posting.doc_id);
                        *scores.entry(posting.doc_id.clone()).or_insert(0.0) += base * weight * match_weight;
                    }
                }
            }
        }

        let mut results: Vec<(String, f32, u64)> = scores
            .into_iter()
            .filter_map(|(id, score)| self.documents.get(&id).map(|d| (id, score, d.insertion_order)))
            .collect();

        // Ties broken by insertion order (stable), per spec.
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.2.cmp(&b.2)));
        results.truncate(top_k);

        results
            .into_iter()
            .map(|(id, score, _)| {
                let fields = self.documents.get(&id).map(|d| d.fields.clone()).unwrap_or_default();
                (id, score, fields)
            })
            .collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError(format!("lexical index serialize failed: {e}")))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError(format!("lexical index deserialize failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str, content: &str) -> LexicalDocument {
        LexicalDocument {
            id: id.to_string(),
            fields: StoredFields { content: content.to_string(), nl_summary: String::new(), file_path: format!("src/{name}.ts"), name: name.to_string(), chunk_type: "function".to_string(), language: "typescript".to_string() },
        }
    }

    #[test]
    fn tokenizer_splits_on_case_and_separators() {
        assert_eq!(boundary_tokenize("fooBar baz_qux"), vec!["foo", "bar", "baz", "qux"]);
        assert_eq!(boundary_tokenize("HTTPServer"), vec!["http", "server"]);
        assert_eq!(boundary_tokenize("src/parser.ts"), vec!["src", "parser", "ts"]);
    }

    #[test]
    fn exact_name_match_ranks_above_unrelated() {
        let mut idx = LexicalIndex::new();
        idx.add(vec![
            doc("a", "parseConfig", "reads configuration from disk"),
            doc("b", "parseYaml", "reads yaml documents"),
            doc("c", "unrelated", "does something else entirely"),
        ])
        .unwrap();

        let results = idx.search("parseConfig", 3);
        assert_eq!(results[0].0, "a");
        let score_a = results.iter().find(|r| r.0 == "a").unwrap().1;
        let score_c = results.iter().find(|r| r.0 == "c").map(|r| r.1).unwrap_or(0.0);
        assert!(score_a > score_c);
    }

    #[test]
    fn round_trips_through_serialize() {
        let mut idx = LexicalIndex::new();
        idx.add(vec![doc("a", "parseConfig", "reads configuration")]).unwrap();
        let bytes = idx.serialize().unwrap();
        let restored = LexicalIndex::deserialize(&bytes).unwrap();
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.search("parseConfig", 1).len(), 1);
    }

    #[test]
    fn remove_missing_id_is_a_no_op() {
        let mut idx = LexicalIndex::new();
        idx.add(vec![doc("a", "parseConfig", "reads configuration")]).unwrap();
        idx.remove(&["missing".to_string()]);
        assert_eq!(idx.count(), 1);
    }

    #[test]
    fn empty_query_returns_empty_results() {
        let mut idx = LexicalIndex::new();
        idx.add(vec![doc("a", "parseConfig", "reads configuration")]).unwrap();
        assert!(idx.search("", 10).is_empty());
    }
}
