pub mod codec;
pub mod context;
pub mod error;
pub mod filters;
pub mod format;
pub mod meta;
mod pipeline;
mod pool;
pub mod reader;
pub mod registry;
pub mod schunk;
pub mod store;
pub mod writer;

#[cfg(test)]
mod testing;

pub use codec::{Codec, CodecParams, Filter, FilterParams};
pub use context::{BlockPolicy, CParams, CompressContext, DParams, DecompressContext, SplitMode};
pub use error::{Error, PluginKind, Result};
pub use format::{cbuffer_sizes, ChunkHeader, CodecId, FilterId, FilterSlot, HEADER_LEN, MAX_OVERHEAD};
pub use meta::{Metalayers, SharedMetalayers};
pub use reader::ChunkReader;
pub use registry::{PluginInfo, Registry};
pub use schunk::{Storage, SuperChunk};
pub use store::{ChunkStore, MemStore};
pub use writer::chunk_zeros;

/// Initialize the process-wide registry with the built-in filters.
///
/// Safe to call any number of times from any thread. Codec bodies are not
/// part of this crate; `tessera_codecs::init()` loads them and calls this.
pub fn init() -> &'static Registry {
    registry::global()
}
