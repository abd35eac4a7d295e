use crate::meta::Metalayers;

/// Parameters handed to a codec for every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    /// Compression level, 1-9. Level 0 never reaches a codec.
    pub clevel: u8,
    /// Codec-specific meta byte from the chunk header.
    pub meta: u8,
    pub typesize: u8,
}

/// Core compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by a stable numeric `id()` stored in the chunk header.
/// - Must compress/decompress individual blocks independently. No cross-block
///   state is permitted; this is what lets blocks run on any worker.
/// - Is shared across worker threads, so it must be `Send + Sync`.
pub trait Codec: Send + Sync {
    /// Stable codec id stored in the chunk header.
    fn id(&self) -> u8;

    /// Human-readable codec name for logs and the CLI.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    ///
    /// Returning more bytes than `raw.len()` is allowed; the pipeline then
    /// stores the block uncompressed.
    fn compress_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent block.
    ///
    /// `raw_len` is the exact size the block had before compression.
    fn decompress_block(
        &self,
        compressed: &[u8],
        raw_len: usize,
        params: &CodecParams,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Parameters handed to a filter for every block.
#[derive(Clone, Copy)]
pub struct FilterParams<'a> {
    pub typesize: usize,
    /// Per-slot meta byte from the chunk header.
    pub meta: u8,
    /// Position of the block within its chunk.
    pub block_index: usize,
    /// Metadata of the owning super-chunk, when the context has one.
    pub metalayers: Option<&'a Metalayers>,
}

/// A reversible, length-preserving block transform.
///
/// `forward` runs before the codec during compression and `backward` undoes
/// it after decompression. `dst` always has the same length as `src`.
pub trait Filter: Send + Sync {
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    fn forward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()>;

    fn backward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()>;
}
