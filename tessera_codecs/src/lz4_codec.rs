use tessera_core::codec::{Codec, CodecParams};
use tessera_core::format::CodecId;

/// LZ4 block codec.
///
/// Fastest decompression of the bundled codecs. `clevel` only decides
/// whether compression runs at all; lz4_flex has a single speed setting.
///
/// Best for: hot data, low-latency random access workloads.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> u8 {
        CodecId::Lz4.code()
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_block(&self, raw: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        // The raw length is already in the chunk, so no size prefix.
        Ok(lz4_flex::block::compress(raw))
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize, _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let raw = lz4_flex::block::decompress(compressed, raw_len)
            .map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))?;
        Ok(raw)
    }
}
