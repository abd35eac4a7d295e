use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tessera_core::codec::{Codec, CodecParams};
use tessera_core::format::CodecId;

/// zlib (deflate) block codec. `clevel` is used as the deflate level.
pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn id(&self) -> u8 {
        CodecId::Zlib.code()
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let level = Compression::new(u32::from(params.clevel.min(9)));
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize, _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(raw_len);
        // One byte past raw_len is enough to notice an oversized stream.
        ZlibDecoder::new(compressed)
            .take(raw_len as u64 + 1)
            .read_to_end(&mut raw)?;
        if raw.len() != raw_len {
            anyhow::bail!("zlib stream holds {} bytes, expected {raw_len}", raw.len());
        }
        Ok(raw)
    }
}
