//! Helpers for unit tests inside this crate.
//!
//! The codec bodies live in `tessera_codecs`, which this crate cannot call
//! from its own unit tests, so a small run-length codec stands in for them.

use std::sync::{Arc, Once};

use crate::codec::{Codec, CodecParams};
use crate::context::CParams;
use crate::format::CodecId;
use crate::registry;

/// User-range id of [`RleCodec`] in the global registry.
pub const TEST_CODEC: u8 = 250;

/// Byte run-length codec: `(run, byte)` pairs, runs of 1..=255.
pub struct RleCodec;

impl Codec for RleCodec {
    fn id(&self) -> u8 {
        TEST_CODEC
    }

    fn name(&self) -> &'static str {
        "rle"
    }

    fn compress_block(&self, raw: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < raw.len() {
            let byte = raw[i];
            let mut run = 1;
            while i + run < raw.len() && raw[i + run] == byte && run < 255 {
                run += 1;
            }
            out.push(run as u8);
            out.push(byte);
            i += run;
        }
        Ok(out)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize, _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        if compressed.len() % 2 != 0 {
            anyhow::bail!("odd rle stream length {}", compressed.len());
        }
        let mut out = Vec::with_capacity(raw_len);
        for pair in compressed.chunks_exact(2) {
            out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        if out.len() != raw_len {
            anyhow::bail!("rle produced {} bytes, expected {raw_len}", out.len());
        }
        Ok(out)
    }
}

/// Register [`RleCodec`] in the global registry (once per test binary).
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = registry::global().register_codec(Arc::new(RleCodec));
    });
}

/// Default parameters switched to the test codec.
pub fn test_params() -> CParams {
    install();
    CParams::default().with_codec(CodecId::Other(TEST_CODEC))
}
