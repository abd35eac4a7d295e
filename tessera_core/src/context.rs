use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLockReadGuard};

use crate::codec::{Codec, Filter};
use crate::error::{Error, Result};
use crate::format::{
    CodecId, FilterId, FilterSlot, DEFAULT_MAX_BLOCKSIZE, L1, MAX_CLEVEL, MAX_FILTERS, MAX_TYPESIZE,
};
use crate::meta::{Metalayers, SharedMetalayers};
use crate::pool::WorkerPool;
use crate::registry::{self, Registry};

/// Whether a chunk's payload is divided into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// One record covering the whole chunk.
    Never,
    /// Always divide into blocks, even if only one results.
    Always,
    /// Divide when the chunk spans enough blocks and more than one thread
    /// is available to work on them.
    #[default]
    Auto,
}

/// Tuning for the automatic block size and split decisions.
///
/// These only change chunk layout, never decompressed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPolicy {
    /// Base block size for low compression levels.
    pub l1_block_size: usize,
    /// Upper bound for any block, explicit or automatic.
    pub max_block_size: usize,
    /// `Auto` splits once a chunk spans at least this many blocks.
    pub split_min_blocks: usize,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            l1_block_size: L1,
            max_block_size: DEFAULT_MAX_BLOCKSIZE,
            split_min_blocks: 2,
        }
    }
}

impl BlockPolicy {
    /// Automatic block size for a chunk of `nbytes`, before typesize rounding.
    fn auto_blocksize(&self, clevel: u8, typesize: usize) -> usize {
        let scale = match clevel {
            0..=3 => 1,
            4..=6 => 2,
            _ => 4,
        };
        // Wide elements shuffle into fewer, longer byte planes; give them room.
        let wide = if typesize >= 8 { 2 } else { 1 };
        (self.l1_block_size * scale * wide).min(self.max_block_size)
    }
}

/// Compression parameters.
#[derive(Debug, Clone)]
pub struct CParams {
    pub codec: CodecId,
    pub codec_meta: u8,
    /// 0 stores the data uncompressed, 9 compresses hardest.
    pub clevel: u8,
    /// Element width in bytes, 1..=255.
    pub typesize: usize,
    /// Filters applied in order before the codec. At most `MAX_FILTERS`.
    pub filters: Vec<FilterSlot>,
    /// Raw bytes per block; 0 picks one automatically.
    pub blocksize: usize,
    pub nthreads: usize,
    pub splitmode: SplitMode,
    pub policy: BlockPolicy,
    /// Metadata of the owning super-chunk, visible to filters.
    pub metalayers: Option<SharedMetalayers>,
}

impl Default for CParams {
    fn default() -> Self {
        Self {
            codec: CodecId::Zstd,
            codec_meta: 0,
            clevel: 5,
            typesize: 8,
            filters: vec![FilterSlot::new(FilterId::Shuffle)],
            blocksize: 0,
            nthreads: 1,
            splitmode: SplitMode::Auto,
            policy: BlockPolicy::default(),
            metalayers: None,
        }
    }
}

impl CParams {
    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clevel(mut self, clevel: u8) -> Self {
        self.clevel = clevel;
        self
    }

    pub fn with_typesize(mut self, typesize: usize) -> Self {
        self.typesize = typesize;
        self
    }

    pub fn with_filters(mut self, filters: &[FilterSlot]) -> Self {
        self.filters = filters.to_vec();
        self
    }

    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize;
        self
    }

    pub fn with_nthreads(mut self, nthreads: usize) -> Self {
        self.nthreads = nthreads;
        self
    }

    pub fn with_splitmode(mut self, splitmode: SplitMode) -> Self {
        self.splitmode = splitmode;
        self
    }

    pub fn with_policy(mut self, policy: BlockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metalayers(mut self, metalayers: SharedMetalayers) -> Self {
        self.metalayers = Some(metalayers);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.clevel > MAX_CLEVEL {
            return Err(Error::InvalidParameter(format!(
                "clevel {} is outside 0..={MAX_CLEVEL}",
                self.clevel
            )));
        }
        if self.typesize == 0 || self.typesize > MAX_TYPESIZE {
            return Err(Error::InvalidParameter(format!(
                "typesize {} is outside 1..={MAX_TYPESIZE}",
                self.typesize
            )));
        }
        if self.filters.len() > MAX_FILTERS {
            return Err(Error::InvalidParameter(format!(
                "filter chain has {} entries, capacity is {MAX_FILTERS}",
                self.filters.len()
            )));
        }
        if self.nthreads == 0 {
            return Err(Error::InvalidParameter("nthreads must be at least 1".into()));
        }
        let policy = &self.policy;
        if policy.l1_block_size == 0 || policy.max_block_size == 0 || policy.split_min_blocks == 0 {
            return Err(Error::InvalidParameter(format!("degenerate block policy {policy:?}")));
        }
        if self.blocksize > policy.max_block_size {
            return Err(Error::InvalidParameter(format!(
                "blocksize {} exceeds the maximum {}",
                self.blocksize, policy.max_block_size
            )));
        }
        Ok(())
    }

    /// The chain padded to `MAX_FILTERS` slots, as written to the header.
    pub(crate) fn filter_slots(&self) -> [FilterSlot; MAX_FILTERS] {
        let mut slots = [FilterSlot::EMPTY; MAX_FILTERS];
        for (slot, filter) in slots.iter_mut().zip(&self.filters) {
            *slot = *filter;
        }
        slots
    }
}

/// Decompression parameters. Everything else comes from the chunk header.
#[derive(Debug, Clone)]
pub struct DParams {
    pub nthreads: usize,
    pub metalayers: Option<SharedMetalayers>,
}

impl Default for DParams {
    fn default() -> Self {
        Self { nthreads: 1, metalayers: None }
    }
}

impl DParams {
    pub fn with_nthreads(mut self, nthreads: usize) -> Self {
        self.nthreads = nthreads;
        self
    }

    pub fn with_metalayers(mut self, metalayers: SharedMetalayers) -> Self {
        self.metalayers = Some(metalayers);
        self
    }
}

/// State shared by both context flavours: a lazily started worker pool and
/// the lock that keeps calls on one context from overlapping.
struct Engine {
    nthreads: usize,
    pool: OnceLock<Option<WorkerPool>>,
    call_lock: Mutex<()>,
}

impl Engine {
    fn new(nthreads: usize) -> Self {
        Self { nthreads, pool: OnceLock::new(), call_lock: Mutex::new(()) }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.call_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The worker pool, started on first use. `None` means run inline.
    fn pool(&self) -> Option<&WorkerPool> {
        if self.nthreads <= 1 {
            return None;
        }
        self.pool
            .get_or_init(|| match WorkerPool::new(self.nthreads) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("running inline, worker pool unavailable: {e}");
                    None
                }
            })
            .as_ref()
    }

    fn pool_started(&self) -> bool {
        matches!(self.pool.get(), Some(Some(pool)) if pool.nthreads() == self.nthreads)
    }
}

fn read_metalayers(shared: &Option<SharedMetalayers>) -> Option<RwLockReadGuard<'_, Metalayers>> {
    shared
        .as_ref()
        .map(|m| m.read().unwrap_or_else(PoisonError::into_inner))
}

/// A compression context: validated parameters, resolved codec and filters,
/// and a private worker pool.
///
/// One call runs at a time per context; concurrent callers are serialized.
/// Use [`CompressContext::try_clone`] to get an independent context for
/// parallel callers.
pub struct CompressContext {
    pub(crate) params: CParams,
    pub(crate) codec: Arc<dyn Codec>,
    /// Non-noop filters in forward order, with their header slot.
    pub(crate) filters: Vec<(Arc<dyn Filter>, FilterSlot)>,
    engine: Engine,
}

impl CompressContext {
    /// Validate `params` and resolve its codec and filters in the global registry.
    pub fn new(params: CParams) -> Result<Self> {
        Self::with_registry(params, registry::global())
    }

    pub fn with_registry(params: CParams, registry: &Registry) -> Result<Self> {
        params.validate()?;
        let codec = registry.codec(params.codec.code())?;
        let filters = params
            .filters
            .iter()
            .filter(|slot| !slot.id.is_noop())
            .map(|slot| Ok((registry.filter(slot.id.code())?, *slot)))
            .collect::<Result<Vec<_>>>()?;
        log::debug!(
            "compress context: codec {} clevel {} typesize {} filters {:?} threads {}",
            codec.name(),
            params.clevel,
            params.typesize,
            filters.iter().map(|(f, _)| f.name()).collect::<Vec<_>>(),
            params.nthreads
        );
        let engine = Engine::new(params.nthreads);
        Ok(Self { params, codec, filters, engine })
    }

    /// A fresh context with the same parameters and resolved plugins.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            params: self.params.clone(),
            codec: Arc::clone(&self.codec),
            filters: self.filters.clone(),
            engine: Engine::new(self.params.nthreads),
        })
    }

    pub fn params(&self) -> &CParams {
        &self.params
    }

    pub fn typesize(&self) -> usize {
        self.params.typesize
    }

    pub fn nthreads(&self) -> usize {
        self.params.nthreads
    }

    /// Whether the worker pool has been started.
    pub fn pool_started(&self) -> bool {
        self.engine.pool_started()
    }

    /// Block size used for a chunk of `nbytes` (before the split decision).
    pub fn blocksize_for(&self, nbytes: usize) -> usize {
        let p = &self.params;
        let typesize = p.typesize;
        let mut blocksize = if p.blocksize > 0 {
            p.blocksize
        } else {
            p.policy.auto_blocksize(p.clevel, typesize)
        };
        blocksize = blocksize.min(nbytes);
        if blocksize >= typesize {
            blocksize -= blocksize % typesize;
        }
        blocksize.max(1)
    }

    /// Whether a chunk of `nbytes` with `blocksize` blocks gets split.
    pub fn splits(&self, nbytes: usize, blocksize: usize) -> bool {
        match self.params.splitmode {
            SplitMode::Always => true,
            SplitMode::Never => false,
            SplitMode::Auto => {
                self.params.nthreads > 1
                    && nbytes >= blocksize.saturating_mul(self.params.policy.split_min_blocks)
            }
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.engine.lock()
    }

    pub(crate) fn pool(&self) -> Option<&WorkerPool> {
        self.engine.pool()
    }

    pub(crate) fn metalayers(&self) -> Option<RwLockReadGuard<'_, Metalayers>> {
        read_metalayers(&self.params.metalayers)
    }
}

/// A decompression context. Codec and filters are taken from each chunk's
/// header, so one context decodes chunks written with any parameters.
pub struct DecompressContext {
    pub(crate) params: DParams,
    pub(crate) registry: Arc<Registry>,
    engine: Engine,
}

impl DecompressContext {
    /// A context resolving chunk headers against the global registry.
    pub fn new(params: DParams) -> Result<Self> {
        Self::with_registry(params, Arc::clone(registry::shared()))
    }

    /// A context resolving chunk headers against `registry`, for chunks
    /// written with [`CompressContext::with_registry`].
    pub fn with_registry(params: DParams, registry: Arc<Registry>) -> Result<Self> {
        if params.nthreads == 0 {
            return Err(Error::InvalidParameter("nthreads must be at least 1".into()));
        }
        let engine = Engine::new(params.nthreads);
        Ok(Self { params, registry, engine })
    }

    pub fn try_clone(&self) -> Result<Self> {
        Self::with_registry(self.params.clone(), Arc::clone(&self.registry))
    }

    pub fn params(&self) -> &DParams {
        &self.params
    }

    pub fn nthreads(&self) -> usize {
        self.params.nthreads
    }

    pub fn pool_started(&self) -> bool {
        self.engine.pool_started()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.engine.lock()
    }

    pub(crate) fn pool(&self) -> Option<&WorkerPool> {
        self.engine.pool()
    }

    pub(crate) fn metalayers(&self) -> Option<RwLockReadGuard<'_, Metalayers>> {
        read_metalayers(&self.params.metalayers)
    }
}
