//! Typed errors for the retrieval core.
//!
//! The four kinds below are errors-as-values: every fallible boundary in
//! `chunker`, `embedding`, `vector_store`, and `lexical` returns one of
//! these (or a `Result` wrapping one), never panics. The CLI binary is the
//! only place that converts these into `anyhow::Error` for display.

use thiserror::Error;

/// A single top-level error kind, each carrying a message and tagging the
/// component that raised it.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("parse error in {component}: {message}")]
    Parse { component: String, message: String },

    #[error("chunk error in {component}: {message}")]
    Chunk { component: String, message: String },

    #[error("embed error in {component}: {message}")]
    Embed { component: String, message: String },

    #[error("store error in {component}: {message}")]
    Store { component: String, message: String },

    #[error("config error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn parse(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse { component: component.into(), message: message.into() }
    }

    pub fn chunk(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Chunk { component: component.into(), message: message.into() }
    }

    pub fn embed(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Embed { component: component.into(), message: message.into() }
    }

    pub fn store(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store { component: component.into(), message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Embedding provider failure — network, model, or dimension mismatch.
#[derive(Debug, Error, Clone)]
#[error("embed provider error: {0}")]
pub struct EmbedError(pub String);

impl From<EmbedError> for CoreError {
    fn from(e: EmbedError) -> Self {
        CoreError::embed("embedding_provider", e.0)
    }
}

/// Reranker provider failure — downgraded to a warning by the hybrid
/// searcher, never fatal.
#[derive(Debug, Error, Clone)]
#[error("rerank provider error: {0}")]
pub struct RerankError(pub String);

/// Vector store / lexical index failure — bad id, dimension mismatch, I/O.
#[derive(Debug, Error, Clone)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::store("store", e.0)
    }
}
