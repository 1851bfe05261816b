//! Chunk registry - in-memory metadata and embedding store
//!
//! The registry owns the chunk records the pipeline consults for
//! dedup embeddings, lifecycle eligibility and final materialization.
//! All methods take `&self`; interior mutability keeps the registry
//! shareable as `Arc<ChunkRegistry>` across concurrent queries.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{EngramError, Result};
use crate::lifecycle::LifecycleStage;
use crate::memory::Chunk;

/// Shared store of indexed chunks
#[derive(Debug, Default)]
pub struct ChunkRegistry {
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl ChunkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Chunk>>> {
        self.chunks
            .read()
            .map_err(|_| EngramError::Internal("chunk registry lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Chunk>>> {
        self.chunks
            .write()
            .map_err(|_| EngramError::Internal("chunk registry lock poisoned".into()))
    }

    /// Insert a chunk. Returns `false` (and leaves the stored record
    /// untouched) when the id is already registered; chunks are
    /// immutable once indexed.
    pub fn insert(&self, chunk: Chunk) -> Result<bool> {
        let mut chunks = self.write()?;
        if chunks.contains_key(&chunk.id) {
            return Ok(false);
        }
        chunks.insert(chunk.id.clone(), chunk);
        Ok(true)
    }

    /// Fetch a chunk by id
    pub fn get(&self, id: &str) -> Result<Option<Chunk>> {
        Ok(self.read()?.get(id).cloned())
    }

    /// Fetch several chunks, skipping unknown ids
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let chunks = self.read()?;
        Ok(ids.iter().filter_map(|id| chunks.get(id).cloned()).collect())
    }

    /// Embedding of a chunk, if registered
    pub fn embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.read()?.get(id).map(|c| c.embedding.clone()))
    }

    /// Current lifecycle stage of a chunk
    pub fn stage(&self, id: &str) -> Result<Option<LifecycleStage>> {
        Ok(self.read()?.get(id).map(|c| c.stage))
    }

    /// Whether an id is registered
    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    /// Number of registered chunks
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// All chunk ids, sorted for deterministic iteration
    pub fn ids_sorted(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Apply a mutation to a chunk in place. Returns `false` for
    /// unknown ids.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Chunk),
    {
        let mut chunks = self.write()?;
        match chunks.get_mut(id) {
            Some(chunk) => {
                mutate(chunk);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record an access on a chunk
    pub fn record_access(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.update(id, |chunk| chunk.record_access(now))
    }

    /// Chunk count per lifecycle stage
    pub fn stage_counts(&self) -> Result<HashMap<LifecycleStage, usize>> {
        let chunks = self.read()?;
        let mut counts = HashMap::new();
        for chunk in chunks.values() {
            *counts.entry(chunk.stage).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

// ============================================================================
// TESTS
// ============================================================================
