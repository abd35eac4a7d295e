use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::Result;
use crate::format::{ChunkHeader, HEADER_LEN};

/// Backing storage for super-chunk entries that are not held in memory.
///
/// Chunks are addressed by an opaque key chosen by the super-chunk. Keys are
/// not positions: the position order lives in a separate index record that
/// the super-chunk rewrites on every mutation, before it changes its own
/// state.
pub trait ChunkStore: Send + Sync {
    fn read_chunk(&self, key: u64) -> Result<Vec<u8>>;

    fn write_chunk(&self, key: u64, chunk: &[u8]) -> Result<()>;

    /// Every key currently holding a chunk, ascending.
    fn keys(&self) -> Result<Vec<u64>>;

    /// Keys in position order, as last written by [`ChunkStore::write_index`].
    /// `None` when no index has been written yet.
    fn read_index(&self) -> Result<Option<Vec<u64>>>;

    fn write_index(&self, keys: &[u64]) -> Result<()>;

    fn chunk_count(&self) -> Result<u64> {
        Ok(self.keys()?.len() as u64)
    }

    /// Forget `key`. Stores that never reclaim space may keep the default.
    fn remove_chunk(&self, _key: u64) -> Result<()> {
        Ok(())
    }

    /// Header of the chunk at `key`, used to size entries without a full read.
    fn chunk_header(&self, key: u64) -> Result<ChunkHeader> {
        ChunkHeader::read(&self.read_chunk(key)?)
    }
}

fn missing(key: u64) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no chunk stored under key {key}"))
}

/// In-memory [`ChunkStore`] that counts full chunk reads.
#[derive(Debug, Default)]
pub struct MemStore {
    chunks: RwLock<BTreeMap<u64, Vec<u8>>>,
    index: RwLock<Option<Vec<u64>>>,
    reads: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read_chunk` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }
}

impl ChunkStore for MemStore {
    fn read_chunk(&self, key: u64) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks.get(&key).ok_or_else(|| missing(key))?.clone())
    }

    fn write_chunk(&self, key: u64, chunk: &[u8]) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        chunks.insert(key, chunk.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<u64>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks.keys().copied().collect())
    }

    fn read_index(&self) -> Result<Option<Vec<u64>>> {
        Ok(self.index.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn write_index(&self, keys: &[u64]) -> Result<()> {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(keys.to_vec());
        Ok(())
    }

    fn chunk_count(&self) -> Result<u64> {
        Ok(self.chunks.read().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }

    fn remove_chunk(&self, key: u64) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        chunks.remove(&key).map(|_| ()).ok_or_else(|| missing(key).into())
    }

    fn chunk_header(&self, key: u64) -> Result<ChunkHeader> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let chunk = chunks.get(&key).ok_or_else(|| missing(key))?;
        ChunkHeader::read(&chunk[..chunk.len().min(HEADER_LEN)])
    }
}
