use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenEstimatorConfig {
    pub chars_per_token: usize,
    pub max_file_bytes: u64,
}

/// Controls workspace scanning behavior (what to skip).
///
/// Note: `.gitignore` is always respected by the scanner; these are additional
/// hard skips for noisy monorepo directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree (e.g. "generated", "tmp").
    ///
    /// These are compared against path components, not full paths.
    pub exclude_dir_names: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
        }
    }
}

/// Hard safety ceiling: files larger than this are **always** skipped, regardless of config.
/// This protects low-RAM machines from trying to Tree-sitter-parse a 10 MB minified bundle.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_000_000; // 1 MB

impl Default for TokenEstimatorConfig {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            // 512 KB default — enough for any real source file, blocks log/generated bloat.
            max_file_bytes: 512 * 1024,
        }
    }
}

/// `embedding.*` config recognized by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Must equal the embedding provider's own `dimensions()`; validated at
    /// startup, never at query time.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

/// `ingestion.*` config: chunk budget and chunker exclusions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub max_tokens_per_chunk: usize,
    /// Path globs skipped by the chunker, independent of `.gitignore`.
    pub exclude: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self { max_tokens_per_chunk: 512, exclude: vec![] }
    }
}

/// `search.*` defaults consumed by `hybrid_search::SearchConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaultsConfig {
    pub top_k: usize,
    pub vector_weight: f32,
    pub bm25_weight: f32,
}

impl Default for SearchDefaultsConfig {
    fn default() -> Self {
        Self { top_k: 10, vector_weight: 0.7, bm25_weight: 0.3 }
    }
}

/// `reranker.*` config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    /// Clamped to 1–50 by `RerankerConfig::top_n_clamped`.
    pub top_n: usize,
    /// Cross-encoder HTTP endpoint, consulted only when `enabled` is true.
    pub endpoint: String,
}

impl RerankerConfig {
    pub fn top_n_clamped(&self) -> usize {
        self.top_n.clamp(1, 50)
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { enabled: false, top_n: 20, endpoint: String::new() }
    }
}

/// `storage.*` config: where flat-file indexes live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: PathBuf::from(".coderag") }
    }
}

impl StorageConfig {
    /// Resolves `path` under `project_root`, rejecting any resolution that
    /// escapes it (e.g. `../../etc`). Returns the joined, non-canonicalized
    /// path — the directory need not exist yet.
    pub fn resolve_under(&self, project_root: &Path) -> Result<PathBuf, crate::error::CoreError> {
        if self.path.is_absolute() {
            return Err(crate::error::CoreError::config("storage.path must be relative to the project root"));
        }
        let joined = project_root.join(&self.path);
        let mut depth: i64 = 0;
        for component in self.path.components() {
            match component {
                std::path::Component::ParentDir => depth -= 1,
                std::path::Component::Normal(_) => depth += 1,
                _ => {}
            }
            if depth < 0 {
                return Err(crate::error::CoreError::config(format!("storage.path {:?} escapes the project root", self.path)));
            }
        }
        Ok(joined)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory (relative to the repo root) reserved for generated output;
    /// always excluded from scanning so a build never re-indexes its own leftovers.
    pub output_dir: PathBuf,
    /// Settings that govern file discovery and exclusion.
    pub scan: ScanConfig,
    pub token_estimator: TokenEstimatorConfig,
    /// Which embedding model to load.
    pub vector_search: VectorSearchConfig,
    pub embedding: EmbeddingConfig,
    pub ingestion: IngestionConfig,
    pub search: SearchDefaultsConfig,
    pub reranker: RerankerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSearchConfig {
    /// HuggingFace model repo ID used by Model2Vec-RS.
    pub model: String,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self { model: "minishlab/potion-retrieval-32M".to_string() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".cortexast"),
            scan: ScanConfig::default(),
            token_estimator: TokenEstimatorConfig::default(),
            vector_search: VectorSearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingestion: IngestionConfig::default(),
            search: SearchDefaultsConfig::default(),
            reranker: RerankerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".cortexast.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_resolves_under_project_root() {
        let storage = StorageConfig { path: PathBuf::from(".coderag") };
        let root = PathBuf::from("/repo");
        assert_eq!(storage.resolve_under(&root).unwrap(), PathBuf::from("/repo/.coderag"));
    }

    #[test]
    fn storage_path_rejects_escape() {
        let storage = StorageConfig { path: PathBuf::from("../../etc") };
        let root = PathBuf::from("/repo");
        assert!(storage.resolve_under(&root).is_err());
    }

    #[test]
    fn storage_path_rejects_absolute() {
        let storage = StorageConfig { path: PathBuf::from("/etc/passwd") };
        let root = PathBuf::from("/repo");
        assert!(storage.resolve_under(&root).is_err());
    }

    #[test]
    fn reranker_top_n_is_clamped() {
        assert_eq!(RerankerConfig { enabled: true, top_n: 0, endpoint: String::new() }.top_n_clamped(), 1);
        assert_eq!(RerankerConfig { enabled: true, top_n: 500, endpoint: String::new() }.top_n_clamped(), 50);
    }
}
