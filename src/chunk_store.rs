//! Owns the chunks themselves, keyed by id — the chunk store side of the
//! four-way ownership split spec.md §3 describes (chunk store / vector
//! store / lexical index / graph, all keyed by the same id namespace).
//!
//! Same flat-file JSON persistence as the vector store and lexical index;
//! no separate database for chunk content.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::chunk::Chunk;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct ChunkStore {
    path: Option<PathBuf>,
    chunks: HashMap<String, Chunk>,
    dirty: bool,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let chunks = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, Chunk>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    crate::debug_log!("[coderag] chunk store schema changed or corrupted ({e}), rebuilding");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Ok(Self { path: Some(path), chunks, dirty: false })
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn upsert(&mut self, chunks: Vec<Chunk>) {
        for chunk in chunks {
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        self.dirty = true;
    }

    pub fn remove(&mut self, ids: &[String]) {
        for id in ids {
            if self.chunks.remove(id).is_some() {
                self.dirty = true;
            }
        }
    }

    pub fn ids_for_file(&self, file_path: &str) -> Vec<String> {
        self.chunks.values().filter(|c| c.file_path == file_path).map(|c| c.id.clone()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError(format!("failed to create chunk store dir: {e}")))?;
        }
        let text = serde_json::to_string(&self.chunks).map_err(|e| StoreError(format!("failed to serialize chunk store: {e}")))?;
        std::fs::write(path, text).map_err(|e| StoreError(format!("failed to write chunk store: {e}")))?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;

    fn chunk(id_seed: &str) -> Chunk {
        Chunk::new(format!("src/{id_seed}.rs"), 1, 1, "fn f(){}", "rust", ChunkMetadata::default())
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let mut store = ChunkStore::new();
        let c = chunk("a");
        let id = c.id.clone();
        store.upsert(vec![c]);
        assert!(store.get(&id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reopen_reloads_persisted_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        let id = {
            let mut store = ChunkStore::open(&path).unwrap();
            let c = chunk("a");
            let id = c.id.clone();
            store.upsert(vec![c]);
            store.save().unwrap();
            id
        };
        let reopened = ChunkStore::open(&path).unwrap();
        assert!(reopened.get(&id).is_some());
    }
}
