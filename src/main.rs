use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ignore::overrides::OverrideBuilder;
use rayon::prelude::*;
use serde_json::json;
use xxhash_rust::xxh3::xxh3_64;

use coderag::chunk::Chunk;
use coderag::chunk_store::ChunkStore;
use coderag::chunker::{chunk_file, ParsedFile};
use coderag::config::{load_config, Config};
use coderag::context_expander;
use coderag::embedding::{EmbeddingProvider, LocalStaticEmbedder};
use coderag::graph::{DependencyGraph, EdgeType, Node};
use coderag::hybrid_search::{self, SearchConfig, SearchFilters};
use coderag::inspector::language_name_for_path;
use coderag::lexical::{LexicalDocument, LexicalIndex, StoredFields};
use coderag::reranker::{HttpReranker, Reranker};
use coderag::scanner::{scan_workspace, FileEntry, ScanOptions};
use coderag::vector_store::{FlatFileVectorStore, VectorRow, VectorStore};

#[derive(Debug, Parser)]
#[command(name = "coderag")]
#[command(version)]
#[command(about = "Codebase-aware hybrid retrieval engine")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chunk, embed, and index a workspace (or subdirectory of it).
    Build {
        /// Directory to index, relative to the current directory.
        #[arg(default_value = ".")]
        target: PathBuf,
    },
    /// Run a hybrid search against a previously built index.
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        file_contains: Option<String>,
        /// Pull in structurally related chunks via the dependency graph.
        #[arg(long)]
        expand: bool,
        #[arg(long, default_value_t = 10)]
        max_related: usize,
    },
}

fn storage_paths(cfg: &Config, repo_root: &Path) -> Result<(PathBuf, PathBuf, PathBuf, PathBuf, PathBuf)> {
    let dir = cfg.storage.resolve_under(repo_root)?;
    Ok((dir.join("vectors.json"), dir.join("lexical.json"), dir.join("chunks.json"), dir.join("graph.json"), dir.join("manifest.json")))
}

fn load_manifest(path: &Path) -> HashMap<String, u64> {
    std::fs::read_to_string(path).ok().and_then(|t| serde_json::from_str(&t).ok()).unwrap_or_default()
}

/// Hashes every surviving scan entry in parallel so an incremental build can
/// tell which files actually changed without re-parsing or re-embedding them.
fn hash_entries(entries: &[FileEntry]) -> HashMap<String, u64> {
    entries
        .par_iter()
        .filter_map(|entry| {
            let bytes = std::fs::read(&entry.abs_path).ok()?;
            let rel_path = entry.rel_path.to_string_lossy().replace('\\', "/");
            Some((rel_path, xxh3_64(&bytes)))
        })
        .collect()
}

fn exclude_override(repo_root: &Path, patterns: &[String]) -> Result<ignore::overrides::Override> {
    let mut ob = OverrideBuilder::new(repo_root);
    for pattern in patterns {
        ob.add(pattern).with_context(|| format!("invalid ingestion.exclude glob: {pattern}"))?;
    }
    Ok(ob.build()?)
}

fn chunk_to_result(store: &ChunkStore, id: &str) -> Option<hybrid_search::SearchResult> {
    let chunk = store.get(id)?;
    Some(hybrid_search::SearchResult {
        chunk_id: chunk.id.clone(),
        content: chunk.content.clone(),
        nl_summary: chunk.nl_summary.clone(),
        // Not a fused score — the chunk was reached via the graph, not search.
        score: 0.0,
        method: hybrid_search::Method::Vector,
        chunk_type: chunk.metadata.chunk_type,
        language: chunk.language.clone(),
        file_path: chunk.file_path.clone(),
    })
}

fn chunk_type_name(chunk: &Chunk) -> String {
    serde_json::to_value(chunk.metadata.chunk_type).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

/// Best-effort edges: a chunk that imports a name exported by another
/// chunk's declarations (same workspace) gets an `Imports` edge to it.
fn link_imports(graph: &mut DependencyGraph, chunks: &[Chunk]) {
    let mut exporters: HashMap<&str, &str> = HashMap::new();
    for chunk in chunks {
        for decl in &chunk.metadata.declarations {
            exporters.entry(decl.as_str()).or_insert(chunk.id.as_str());
        }
    }
    for chunk in chunks {
        for name in &chunk.metadata.imports {
            if let Some(&target_id) = exporters.get(name.as_str()) {
                if target_id != chunk.id {
                    let _ = graph.add_edge(chunk.id.clone(), target_id.to_string(), EdgeType::Imports);
                }
            }
        }
    }
}

async fn run_build(target: PathBuf) -> Result<()> {
    let repo_root = std::env::current_dir().context("failed to get current dir")?;
    let cfg = load_config(&repo_root);
    let (vector_path, lexical_path, chunk_path, graph_path, manifest_path) = storage_paths(&cfg, &repo_root)?;

    let mut exclude_dir_names = vec![".git".to_string(), "node_modules".to_string(), "target".to_string(), cfg.output_dir.to_string_lossy().to_string()];
    exclude_dir_names.extend(cfg.scan.exclude_dir_names.iter().cloned());
    let scan_opts = ScanOptions { repo_root: repo_root.clone(), target, max_file_bytes: cfg.token_estimator.max_file_bytes, exclude_dir_names };
    let entries = scan_workspace(&scan_opts)?;

    let ingestion_ov = exclude_override(&repo_root, &cfg.ingestion.exclude)?;
    let entries: Vec<FileEntry> = entries.into_iter().filter(|e| !ingestion_ov.matched(&e.abs_path, false).is_ignore()).collect();

    let embedder = LocalStaticEmbedder::load(&cfg.vector_search.model, cfg.embedding.dimensions).context("failed to load embedding model")?;

    let mut vector_store = FlatFileVectorStore::open(&vector_path, cfg.embedding.dimensions)?;
    let mut lexical = std::fs::read(&lexical_path).ok().and_then(|b| LexicalIndex::deserialize(&b).ok()).unwrap_or_else(LexicalIndex::new);
    let mut chunk_store = ChunkStore::open(&chunk_path)?;
    let mut graph = std::fs::read_to_string(&graph_path).ok().and_then(|t| DependencyGraph::from_json(&t).ok()).unwrap_or_else(DependencyGraph::new);

    // Incremental refresh: only files whose content hash changed (or is new)
    // get re-chunked and re-embedded; files dropped from the scan have their
    // chunks evicted from every index that carries them.
    let old_manifest = load_manifest(&manifest_path);
    let new_manifest = hash_entries(&entries);

    let stale_paths: Vec<&String> = old_manifest.keys().filter(|p| new_manifest.get(*p) != old_manifest.get(*p)).collect();
    for rel_path in stale_paths {
        let ids = chunk_store.ids_for_file(rel_path);
        if ids.is_empty() {
            continue;
        }
        chunk_store.remove(&ids);
        vector_store.delete(&ids).await?;
        lexical.remove(&ids);
        for id in &ids {
            graph.remove_node(id);
        }
    }

    let changed_entries: Vec<&FileEntry> = entries.iter().filter(|e| {
        let rel_path = e.rel_path.to_string_lossy().replace('\\', "/");
        new_manifest.get(&rel_path) != old_manifest.get(&rel_path)
    }).collect();

    let mut all_chunks: Vec<Chunk> = Vec::new();
    for entry in &changed_entries {
        let content = match std::fs::read_to_string(&entry.abs_path) {
            Ok(c) => c,
            Err(_) => continue, // binary or unreadable; skip rather than fail the whole build
        };
        let rel_path = entry.rel_path.to_string_lossy().replace('\\', "/");
        let language = language_name_for_path(&entry.abs_path);
        let parsed = ParsedFile::discover(rel_path, language, content);
        let chunks = chunk_file(&parsed, cfg.ingestion.max_tokens_per_chunk)?;
        all_chunks.extend(chunks);
    }

    coderag::debug_log!("[coderag] refresh delta: {} changed, {} unchanged, {} evicted", changed_entries.len(), entries.len() - changed_entries.len(), old_manifest.len().saturating_sub(new_manifest.len()));
    println!("{} files changed; chunked into {} chunks ({} files unchanged)", changed_entries.len(), all_chunks.len(), entries.len() - changed_entries.len());

    for batch in all_chunks.chunks(64) {
        let texts: Vec<String> = batch.iter().map(|c| if c.nl_summary.is_empty() { c.content.clone() } else { format!("{}\n{}", c.nl_summary, c.content) }).collect();
        let vectors = embedder.embed_batch(&texts).await.context("embedding failed")?;

        let rows: Vec<VectorRow> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRow { id: chunk.id.clone(), vector, metadata: json!({"file_path": chunk.file_path, "chunk_type": chunk_type_name(chunk)}) })
            .collect();
        vector_store.upsert(rows).await?;

        let docs: Vec<LexicalDocument> = batch
            .iter()
            .map(|chunk| LexicalDocument {
                id: chunk.id.clone(),
                fields: StoredFields {
                    content: chunk.content.clone(),
                    nl_summary: chunk.nl_summary.clone(),
                    file_path: chunk.file_path.clone(),
                    name: chunk.metadata.name.clone(),
                    chunk_type: chunk_type_name(chunk),
                    language: chunk.language.clone(),
                },
            })
            .collect();
        lexical.add(docs)?;
    }

    for chunk in &all_chunks {
        let node = Node { id: chunk.id.clone(), file_path: chunk.file_path.clone(), symbols: chunk.metadata.declarations.clone(), node_type: chunk_type_name(chunk) };
        graph.add_node(node);
    }
    chunk_store.upsert(all_chunks);

    // Re-link imports over the full surviving chunk set, not just this
    // build's changed files: an unchanged file's declarations are still
    // valid import targets.
    let full_chunks: Vec<Chunk> = chunk_store.all().cloned().collect();
    link_imports(&mut graph, &full_chunks);

    chunk_store.save()?;
    vector_store.close().await?;
    std::fs::write(&lexical_path, lexical.serialize()?)?;
    std::fs::write(&graph_path, graph.to_json()?)?;
    std::fs::write(&manifest_path, serde_json::to_string(&new_manifest)?)?;

    println!("index written to {}", vector_path.parent().unwrap_or(&vector_path).display());
    Ok(())
}

async fn run_search(query: String, top_k: Option<usize>, language: Option<String>, file_contains: Option<String>, expand: bool, max_related: usize) -> Result<()> {
    let repo_root = std::env::current_dir().context("failed to get current dir")?;
    let cfg = load_config(&repo_root);
    let (vector_path, lexical_path, chunk_path, graph_path, _manifest_path) = storage_paths(&cfg, &repo_root)?;

    let embedder = LocalStaticEmbedder::load(&cfg.vector_search.model, cfg.embedding.dimensions).context("failed to load embedding model")?;
    let vector_store = FlatFileVectorStore::open(&vector_path, cfg.embedding.dimensions)?;
    let lexical = std::fs::read(&lexical_path).ok().and_then(|b| LexicalIndex::deserialize(&b).ok()).unwrap_or_else(LexicalIndex::new);
    let chunk_store = ChunkStore::open(&chunk_path)?;

    let config = SearchConfig {
        top_k: top_k.unwrap_or(cfg.search.top_k),
        vector_weight: cfg.search.vector_weight,
        bm25_weight: cfg.search.bm25_weight,
        filters: SearchFilters { language, chunk_type: None, file_substring: file_contains },
    };

    let reranker = (cfg.reranker.enabled && !cfg.reranker.endpoint.is_empty()).then(|| HttpReranker::new(cfg.reranker.endpoint.clone()));
    let rerank_arg = reranker.as_ref().map(|r| (r as &dyn Reranker, cfg.reranker.top_n_clamped()));

    let results = hybrid_search::search(&query, &config, &embedder, &vector_store, &lexical, &chunk_store, rerank_arg).await?;

    if expand {
        let graph = std::fs::read_to_string(&graph_path).ok().and_then(|t| DependencyGraph::from_json(&t).ok()).unwrap_or_else(DependencyGraph::new);
        let outcome = context_expander::expand(results, &graph, max_related, |id| chunk_to_result(&chunk_store, id));
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.cmd {
        Command::Build { target } => rt.block_on(run_build(target)),
        Command::Search { query, top_k, language, file_contains, expand, max_related } => rt.block_on(run_search(query, top_k, language, file_contains, expand, max_related)),
    }
}
