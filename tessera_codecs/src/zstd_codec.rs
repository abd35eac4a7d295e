use tessera_core::codec::{Codec, CodecParams};
use tessera_core::format::CodecId;

/// Zstandard block codec.
///
/// Each block is compressed independently. The 1-9 `clevel` scale is spread
/// over zstd's own levels as `2 * clevel - 1`, with 9 mapped to 19.
///
/// Best for: general numeric arrays where ratio matters more than speed.
pub struct ZstdCodec;

impl ZstdCodec {
    /// zstd level used for a given `clevel`.
    pub fn level(clevel: u8) -> i32 {
        match clevel {
            0 => 1,
            9.. => 19,
            n => 2 * n as i32 - 1,
        }
    }
}

impl Codec for ZstdCodec {
    fn id(&self) -> u8 {
        CodecId::Zstd.code()
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(zstd::bulk::compress(raw, Self::level(params.clevel))?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize, _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        // bulk::decompress treats raw_len as a hard capacity, so a frame that
        // claims more content fails here instead of growing the buffer.
        Ok(zstd::bulk::decompress(compressed, raw_len)?)
    }
}
