//! Super-chunk: an ordered, mutable sequence of chunks with shared
//! compression settings and metadata.

use std::borrow::Cow;
use std::sync::{Arc, PoisonError, RwLock};

use crate::context::{CParams, CompressContext, DParams, DecompressContext};
use crate::error::{alloc_with_capacity, alloc_zeroed, Error, Result};
use crate::meta::{Metalayers, SharedMetalayers, VlMetalayers};
use crate::reader::ChunkReader;
use crate::store::ChunkStore;
use crate::writer::chunk_zeros;

/// How a super-chunk is created.
#[derive(Clone, Default)]
pub struct Storage {
    pub cparams: CParams,
    pub dparams: DParams,
    /// Nominal raw bytes per chunk; 0 takes the size of the first append.
    pub chunksize: usize,
    /// Where chunk bytes live. `None` keeps every chunk in memory.
    pub store: Option<Arc<dyn ChunkStore>>,
}

impl Storage {
    pub fn new(cparams: CParams, dparams: DParams) -> Self {
        Self { cparams, dparams, ..Self::default() }
    }

    pub fn with_chunksize(mut self, chunksize: usize) -> Self {
        self.chunksize = chunksize;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ChunkStore>) -> Self {
        self.store = Some(store);
        self
    }
}

enum ChunkData {
    InMemory(Vec<u8>),
    Stored(u64),
}

struct ChunkEntry {
    nbytes: usize,
    cbytes: usize,
    data: ChunkData,
}

impl ChunkEntry {
    fn key(&self) -> Option<u64> {
        match self.data {
            ChunkData::Stored(key) => Some(key),
            ChunkData::InMemory(_) => None,
        }
    }
}

/// First key above every key the store holds or indexes.
fn next_free_key(store: &dyn ChunkStore) -> Result<u64> {
    let stored = store.keys()?.last().copied();
    let indexed = store.read_index()?.and_then(|keys| keys.into_iter().max());
    Ok(stored.max(indexed).map_or(0, |key| key + 1))
}

pub struct SuperChunk {
    chunks: Vec<ChunkEntry>,
    cctx: CompressContext,
    dctx: DecompressContext,
    typesize: usize,
    chunksize: usize,
    nbytes: u64,
    cbytes: u64,
    metalayers: SharedMetalayers,
    vlmetalayers: VlMetalayers,
    store: Option<Arc<dyn ChunkStore>>,
    next_key: u64,
}

impl SuperChunk {
    /// An empty super-chunk.
    ///
    /// With a store, the store's index is reset to an empty sequence. Chunks
    /// already in the store are not touched, and new chunks get keys above
    /// all of them.
    pub fn new(storage: Storage) -> Result<Self> {
        let mut schunk = Self::detached(storage)?;
        if let Some(store) = &schunk.store {
            schunk.next_key = next_free_key(store.as_ref())?;
            store.write_index(&[])?;
        }
        Ok(schunk)
    }

    /// Contexts and metadata only; the store is neither read nor written.
    fn detached(storage: Storage) -> Result<Self> {
        let Storage { mut cparams, mut dparams, chunksize, store } = storage;
        let metalayers: SharedMetalayers = Arc::new(RwLock::new(Metalayers::new()));
        cparams.metalayers = Some(Arc::clone(&metalayers));
        dparams.metalayers = Some(Arc::clone(&metalayers));
        let typesize = cparams.typesize;
        let cctx = CompressContext::new(cparams)?;
        let dctx = DecompressContext::new(dparams)?;
        Ok(Self {
            chunks: Vec::new(),
            cctx,
            dctx,
            typesize,
            chunksize,
            nbytes: 0,
            cbytes: 0,
            metalayers,
            vlmetalayers: VlMetalayers::default(),
            store,
            next_key: 0,
        })
    }

    /// Adopt the chunks of `storage.store` in the order of its index, or in
    /// ascending key order when no index was ever written. Only chunk headers
    /// are read here; payloads are fetched when first needed.
    pub fn open(storage: Storage) -> Result<Self> {
        let store = storage
            .store
            .clone()
            .ok_or_else(|| Error::InvalidParameter("open needs a chunk store".into()))?;
        let mut schunk = Self::detached(storage)?;
        let keys = match store.read_index()? {
            Some(keys) => keys,
            None => store.keys()?,
        };
        let count = keys.len();
        for key in keys {
            let header = store.chunk_header(key)?;
            if header.typesize as usize != schunk.typesize {
                return Err(Error::InvalidInput(format!(
                    "stored chunk {key} has typesize {}, super-chunk uses {}",
                    header.typesize, schunk.typesize
                )));
            }
            let entry = ChunkEntry {
                nbytes: header.nbytes as usize,
                cbytes: header.cbytes as usize,
                data: ChunkData::Stored(key),
            };
            schunk.account_added(&entry);
            schunk.chunks.push(entry);
        }
        if schunk.chunksize == 0 {
            schunk.chunksize = schunk.chunks.first().map_or(0, |e| e.nbytes);
        }
        schunk.next_key = next_free_key(store.as_ref())?;
        log::debug!("opened super-chunk with {count} stored chunks, {} bytes", schunk.nbytes);
        Ok(schunk)
    }

    // ── Totals ─────────────────────────────────────────────────────────────

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Uncompressed bytes across all chunks.
    pub fn nbytes(&self) -> u64 {
        self.nbytes
    }

    /// Compressed bytes across all chunks.
    pub fn cbytes(&self) -> u64 {
        self.cbytes
    }

    pub fn typesize(&self) -> usize {
        self.typesize
    }

    pub fn chunksize(&self) -> usize {
        self.chunksize
    }

    pub fn cratio(&self) -> f64 {
        if self.cbytes == 0 {
            return 1.0;
        }
        self.nbytes as f64 / self.cbytes as f64
    }

    pub fn compress_context(&self) -> &CompressContext {
        &self.cctx
    }

    pub fn decompress_context(&self) -> &DecompressContext {
        &self.dctx
    }

    fn account_added(&mut self, entry: &ChunkEntry) {
        self.nbytes += entry.nbytes as u64;
        self.cbytes += entry.cbytes as u64;
    }

    fn account_removed(&mut self, entry: &ChunkEntry) {
        self.nbytes -= entry.nbytes as u64;
        self.cbytes -= entry.cbytes as u64;
    }

    fn check_index(&self, pos: usize) -> Result<&ChunkEntry> {
        self.chunks
            .get(pos)
            .ok_or(Error::IndexOutOfRange { index: pos, len: self.chunks.len() })
    }

    // ── Mutation ───────────────────────────────────────────────────────────

    /// Validate `chunk` and turn it into an entry, writing it to the store
    /// when there is one. Nothing in `self` changes except the next store key.
    fn make_entry(&mut self, chunk: Cow<'_, [u8]>) -> Result<ChunkEntry> {
        let (nbytes, cbytes, typesize) = {
            let reader = ChunkReader::new(&chunk)?;
            (reader.nbytes(), reader.cbytes(), reader.typesize())
        };
        if typesize != self.typesize {
            return Err(Error::InvalidInput(format!(
                "chunk has typesize {typesize}, super-chunk uses {}",
                self.typesize
            )));
        }
        let data = match &self.store {
            Some(store) => {
                let key = self.next_key;
                store.write_chunk(key, &chunk[..cbytes])?;
                self.next_key += 1;
                ChunkData::Stored(key)
            }
            None => ChunkData::InMemory(match chunk {
                Cow::Owned(mut owned) => {
                    owned.truncate(cbytes);
                    owned
                }
                Cow::Borrowed(borrowed) => {
                    let mut copy = alloc_with_capacity(cbytes)?;
                    copy.extend_from_slice(&borrowed[..cbytes]);
                    copy
                }
            }),
        };
        Ok(ChunkEntry { nbytes, cbytes, data })
    }

    /// Write the position order that `edit` makes of the current one.
    /// Nothing to do without a store.
    fn persist_index(&self, edit: impl FnOnce(&mut Vec<u64>)) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut keys: Vec<u64> = self.chunks.iter().filter_map(ChunkEntry::key).collect();
        edit(&mut keys);
        store.write_index(&keys)
    }

    fn release(&self, entry: ChunkEntry) {
        if let (ChunkData::Stored(key), Some(store)) = (entry.data, &self.store) {
            if let Err(e) = store.remove_chunk(key) {
                log::warn!("could not release stored chunk {key}: {e}");
            }
        }
    }

    /// Compress `buf` with the default context and append it as a new chunk.
    pub fn append_buffer(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() % self.typesize != 0 {
            return Err(Error::InvalidInput(format!(
                "buffer of {} bytes is not a multiple of typesize {}",
                buf.len(),
                self.typesize
            )));
        }
        let chunk = self.cctx.compress(buf)?;
        self.append_chunk(chunk)
    }

    /// Append an already compressed chunk.
    pub fn append_chunk<'c>(&mut self, chunk: impl Into<Cow<'c, [u8]>>) -> Result<usize> {
        self.insert_chunk(self.chunks.len(), chunk)
    }

    /// Insert a compressed chunk at `pos`, shifting later chunks up by one.
    ///
    /// A `Vec<u8>` is taken over as is; a borrowed slice is copied. The first
    /// chunk of a super-chunk without a chunksize sets it.
    pub fn insert_chunk<'c>(&mut self, pos: usize, chunk: impl Into<Cow<'c, [u8]>>) -> Result<usize> {
        if pos > self.chunks.len() {
            return Err(Error::IndexOutOfRange { index: pos, len: self.chunks.len() });
        }
        let entry = self.make_entry(chunk.into())?;
        let persisted = self.persist_index(|keys| {
            if let Some(key) = entry.key() {
                keys.insert(pos, key);
            }
        });
        if let Err(e) = persisted {
            self.release(entry);
            return Err(e);
        }
        if self.chunksize == 0 {
            self.chunksize = entry.nbytes;
        }
        self.account_added(&entry);
        self.chunks.insert(pos, entry);
        Ok(self.chunks.len())
    }

    /// Replace the chunk at `pos`. The old chunk is released only after the
    /// new one is in place.
    pub fn update_chunk<'c>(&mut self, pos: usize, chunk: impl Into<Cow<'c, [u8]>>) -> Result<usize> {
        self.check_index(pos)?;
        let entry = self.make_entry(chunk.into())?;
        let persisted = self.persist_index(|keys| {
            if let (Some(key), Some(slot)) = (entry.key(), keys.get_mut(pos)) {
                *slot = key;
            }
        });
        if let Err(e) = persisted {
            self.release(entry);
            return Err(e);
        }
        self.account_added(&entry);
        let old = std::mem::replace(&mut self.chunks[pos], entry);
        self.account_removed(&old);
        self.release(old);
        Ok(self.chunks.len())
    }

    /// Remove the chunk at `pos`, shifting later chunks down by one.
    pub fn delete_chunk(&mut self, pos: usize) -> Result<usize> {
        self.check_index(pos)?;
        self.persist_index(|keys| {
            if pos < keys.len() {
                keys.remove(pos);
            }
        })?;
        let old = self.chunks.remove(pos);
        self.account_removed(&old);
        self.release(old);
        Ok(self.chunks.len())
    }

    /// Reorder chunks so that new position `p` holds the chunk previously at
    /// `order[p]`. `order` must be a permutation of `0..chunk_count()`.
    pub fn reorder_offsets(&mut self, order: &[usize]) -> Result<()> {
        let n = self.chunks.len();
        if order.len() != n {
            return Err(Error::InvalidInput(format!(
                "order has {} entries for {n} chunks",
                order.len()
            )));
        }
        let mut rank = vec![usize::MAX; n];
        for (new_pos, &old_pos) in order.iter().enumerate() {
            match rank.get_mut(old_pos) {
                Some(slot) if *slot == usize::MAX => *slot = new_pos,
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "order is not a permutation of 0..{n} (entry {old_pos})"
                    )))
                }
            }
        }
        self.persist_index(|keys| {
            let reordered: Vec<u64> = order.iter().filter_map(|&old| keys.get(old).copied()).collect();
            *keys = reordered;
        })?;
        let mut entries: Vec<(usize, ChunkEntry)> = std::mem::take(&mut self.chunks)
            .into_iter()
            .enumerate()
            .collect();
        entries.sort_by_key(|(old_pos, _)| rank[*old_pos]);
        self.chunks = entries.into_iter().map(|(_, entry)| entry).collect();
        Ok(())
    }

    /// Append zero chunks holding `nitems` items, split at `chunksize`.
    pub fn fill_zeros(&mut self, nitems: usize) -> Result<usize> {
        let total = nitems
            .checked_mul(self.typesize)
            .ok_or_else(|| Error::InvalidInput(format!("{nitems} items overflow")))?;
        let step = if self.chunksize > 0 { self.chunksize } else { total };
        let mut chunks = Vec::new();
        let mut left = total;
        while left > 0 {
            let n = left.min(step);
            chunks.push(chunk_zeros(n, self.typesize)?);
            left -= n;
        }
        for chunk in chunks {
            self.append_chunk(chunk)?;
        }
        Ok(self.chunks.len())
    }

    // ── Reading ────────────────────────────────────────────────────────────

    /// The compressed bytes of chunk `pos`, fetched from the store if needed.
    pub fn get_chunk(&self, pos: usize) -> Result<Cow<'_, [u8]>> {
        let entry = self.check_index(pos)?;
        match &entry.data {
            ChunkData::InMemory(bytes) => Ok(Cow::Borrowed(bytes)),
            ChunkData::Stored(key) => match &self.store {
                Some(store) => Ok(Cow::Owned(store.read_chunk(*key)?)),
                None => Err(Error::corrupt(format!("chunk {pos} refers to a store that is gone"))),
            },
        }
    }

    /// Decompress chunk `pos` into `dst` with the default context.
    pub fn decompress_chunk(&self, pos: usize, dst: &mut [u8]) -> Result<usize> {
        self.decompress_chunk_with(&self.dctx, pos, dst)
    }

    /// Decompress chunk `pos` into `dst` with a caller-supplied context.
    pub fn decompress_chunk_with(&self, ctx: &DecompressContext, pos: usize, dst: &mut [u8]) -> Result<usize> {
        let nbytes = self.check_index(pos)?.nbytes;
        if dst.len() < nbytes {
            return Err(Error::BufferTooSmall { needed: nbytes, available: dst.len() });
        }
        let chunk = self.get_chunk(pos)?;
        ctx.decompress_into(&chunk, dst)
    }

    pub fn decompress_chunk_vec(&self, pos: usize) -> Result<Vec<u8>> {
        let mut out = alloc_zeroed(self.check_index(pos)?.nbytes)?;
        self.decompress_chunk(pos, &mut out)?;
        Ok(out)
    }

    /// Items `[start, stop)` counted across the whole super-chunk.
    pub fn get_slice_buffer(&self, start: usize, stop: usize) -> Result<Vec<u8>> {
        let typesize = self.typesize;
        let total = (self.nbytes / typesize as u64) as usize;
        if start > stop || stop > total {
            return Err(Error::IndexOutOfRange { index: stop.max(start), len: total });
        }
        let mut out = alloc_with_capacity((stop - start) * typesize)?;
        let mut first_item = 0;
        for pos in 0..self.chunks.len() {
            if first_item >= stop {
                break;
            }
            let nitems = self.chunks[pos].nbytes / typesize;
            let lo = start.max(first_item);
            let hi = stop.min(first_item + nitems);
            if lo < hi {
                let chunk = self.get_chunk(pos)?;
                out.extend_from_slice(&self.dctx.get_items(&chunk, lo - first_item, hi - lo)?);
            }
            first_item += nitems;
        }
        Ok(out)
    }

    // ── Metalayers ─────────────────────────────────────────────────────────

    fn meta_read(&self) -> std::sync::RwLockReadGuard<'_, Metalayers> {
        self.metalayers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn meta_write(&self) -> std::sync::RwLockWriteGuard<'_, Metalayers> {
        self.metalayers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a fixed-size metalayer. Its size cannot change afterwards.
    pub fn add_metalayer(&mut self, name: &str, content: &[u8]) -> Result<usize> {
        self.meta_write().add(name, content)
    }

    pub fn update_metalayer(&mut self, name: &str, content: &[u8]) -> Result<usize> {
        self.meta_write().update(name, content)
    }

    pub fn metalayer(&self, name: &str) -> Option<Vec<u8>> {
        self.meta_read().get(name).map(<[u8]>::to_vec)
    }

    pub fn metalayer_names(&self) -> Vec<String> {
        self.meta_read().names().map(str::to_string).collect()
    }

    /// The shared metalayers handle that filters of this super-chunk see.
    pub fn metalayers(&self) -> SharedMetalayers {
        Arc::clone(&self.metalayers)
    }

    /// Insert or replace a variable-length metalayer, stored compressed.
    pub fn set_vlmetalayer(&mut self, name: &str, content: &[u8]) -> Result<usize> {
        let chunk = self.cctx.compress(content)?;
        self.vlmetalayers.set(name, chunk)
    }

    pub fn vlmetalayer(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.vlmetalayers
            .get(name)
            .map(|chunk| self.dctx.decompress(chunk))
            .transpose()
    }

    /// Remove a variable-length metalayer; returns how many remain.
    pub fn delete_vlmetalayer(&mut self, name: &str) -> Result<usize> {
        self.vlmetalayers.delete(name)
    }

    pub fn vlmetalayer_names(&self) -> Vec<String> {
        self.vlmetalayers.names().map(str::to_string).collect()
    }

    pub fn vlmetalayer_count(&self) -> usize {
        self.vlmetalayers.len()
    }
}
