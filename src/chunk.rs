//! The atomic retrieval unit and its content-addressed identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One of the closed set of structural roles a chunk can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Interface,
    TypeAlias,
    Module,
    Doc,
    ImportBlock,
    ConfigBlock,
    Other,
}

impl Default for ChunkType {
    fn default() -> Self {
        ChunkType::Other
    }
}

/// Metadata attached to a chunk. `links`/`tags`/`aliases`/`doc_title` are
/// only ever populated for the markdown/documentation variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_type: ChunkType,
    pub name: String,
    #[serde(default)]
    pub declarations: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_title: Option<String>,
}

/// A bounded, content-addressed slice of a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub nl_summary: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Builds a chunk, deriving `id` from `(file_path, start_line, content)`.
    ///
    /// Two chunks with identical file path, start line and content always
    /// collide on this id regardless of when they were produced; changing
    /// any of the three yields a different id.
    pub fn new(
        file_path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        content: impl Into<String>,
        language: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        let file_path = file_path.into();
        let content = content.into();
        let id = chunk_id(&file_path, start_line, &content);
        Self {
            id,
            content,
            nl_summary: String::new(),
            file_path,
            start_line,
            end_line,
            language: language.into(),
            metadata,
        }
    }
}

/// Content-addressed id: SHA-256 hex digest over `file_path\0start_line\0content`.
///
/// NUL-separated so that a boundary shift between fields (e.g. a file path
/// ending in a digit that could be mistaken for a line number) can never
/// produce a collision that a naive concatenation would allow.
pub fn chunk_id(file_path: &str, start_line: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(start_line.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Approximate token count: byte length divided by 4, rounded up.
pub fn approx_token_count(content: &str) -> usize {
    (content.len() + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_for_identical_inputs() {
        let a = chunk_id("src/x.ts", 1, "fn f(){}");
        let b = chunk_id("src/x.ts", 1, "fn f(){}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn id_changes_with_content() {
        let a = chunk_id("src/x.ts", 1, "fn f(){}");
        let b = chunk_id("src/x.ts", 1, "fn g(){}");
        assert_ne!(a, b);
    }

    #[test]
    fn id_changes_with_start_line_or_path() {
        let base = chunk_id("src/x.ts", 1, "fn f(){}");
        assert_ne!(base, chunk_id("src/x.ts", 2, "fn f(){}"));
        assert_ne!(base, chunk_id("src/y.ts", 1, "fn f(){}"));
    }

    #[test]
    fn token_count_rounds_up() {
        assert_eq!(approx_token_count(""), 0);
        assert_eq!(approx_token_count("ab"), 1);
        assert_eq!(approx_token_count("abcd"), 1);
        assert_eq!(approx_token_count("abcde"), 2);
    }
}
