//! Per-block filter chain + codec.
//!
//! A pipeline is built once per call and shared by every worker that
//! handles a block of that call. It holds no mutable state; each block
//! allocates its own scratch buffers.

use std::borrow::Cow;
use std::sync::Arc;

use crate::codec::{Codec, CodecParams, Filter, FilterParams};
use crate::context::CompressContext;
use crate::error::{alloc_zeroed, Error, Result};
use crate::format::{ChunkHeader, FilterSlot};
use crate::meta::Metalayers;
use crate::registry::Registry;

pub(crate) struct BlockPipeline<'a> {
    codec_id: u8,
    /// `None` when every block of the call is stored uncompressed.
    codec: Option<Arc<dyn Codec>>,
    codec_params: CodecParams,
    filters: Vec<(Arc<dyn Filter>, FilterSlot)>,
    typesize: usize,
    metalayers: Option<&'a Metalayers>,
}

impl<'a> BlockPipeline<'a> {
    pub fn for_compression(ctx: &CompressContext, metalayers: Option<&'a Metalayers>) -> Self {
        let p = ctx.params();
        Self {
            codec_id: p.codec.code(),
            codec: Some(Arc::clone(&ctx.codec)),
            codec_params: CodecParams {
                clevel: p.clevel,
                meta: p.codec_meta,
                typesize: p.typesize as u8,
            },
            filters: ctx.filters.clone(),
            typesize: p.typesize,
            metalayers,
        }
    }

    /// Resolve the filters named in `header`, and its codec when `needs_codec`.
    pub fn for_decompression(
        registry: &Registry,
        header: &ChunkHeader,
        needs_codec: bool,
        metalayers: Option<&'a Metalayers>,
    ) -> Result<Self> {
        let codec = if needs_codec {
            Some(registry.codec(header.codec)?)
        } else {
            None
        };
        let filters = header
            .filter_slots()
            .into_iter()
            .filter(|slot| !slot.id.is_noop())
            .map(|slot| Ok((registry.filter(slot.id.code())?, slot)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            codec_id: header.codec,
            codec,
            codec_params: CodecParams {
                clevel: header.clevel,
                meta: header.codec_meta,
                typesize: header.typesize,
            },
            filters,
            typesize: header.typesize as usize,
            metalayers,
        })
    }

    /// Name used in error reports.
    pub fn codec_label(&self) -> String {
        match &self.codec {
            Some(codec) => codec.name().to_string(),
            None => format!("codec {}", self.codec_id),
        }
    }

    fn filter_params(&self, slot: &FilterSlot, block_index: usize) -> FilterParams<'a> {
        FilterParams {
            typesize: self.typesize,
            meta: slot.meta,
            block_index,
            metalayers: self.metalayers,
        }
    }

    /// Filter and compress one block, returning its record payload.
    ///
    /// The payload is the codec output when that is strictly smaller than
    /// `raw`, otherwise the filtered bytes themselves.
    pub fn compress_block(&self, index: usize, raw: &[u8]) -> Result<Vec<u8>> {
        let failed = |name: &str, e: anyhow::Error| Error::CompressionFailed {
            codec: name.to_string(),
            reason: format!("block {index}: {e:#}"),
        };

        let filtered: Cow<'_, [u8]> = if self.filters.is_empty() {
            Cow::Borrowed(raw)
        } else {
            let mut cur: Vec<u8> = Vec::new();
            let mut next = alloc_zeroed(raw.len())?;
            for (pos, (filter, slot)) in self.filters.iter().enumerate() {
                let input: &[u8] = if pos == 0 { raw } else { &cur };
                filter
                    .forward(input, &mut next, &self.filter_params(slot, index))
                    .map_err(|e| failed(filter.name(), e))?;
                std::mem::swap(&mut cur, &mut next);
                if next.len() != raw.len() {
                    next = alloc_zeroed(raw.len())?;
                }
            }
            Cow::Owned(cur)
        };

        let codec = self
            .codec
            .as_ref()
            .ok_or(Error::UnsupportedCodec(self.codec_id))?;
        let compressed = codec
            .compress_block(&filtered, &self.codec_params)
            .map_err(|e| failed(codec.name(), e))?;
        if compressed.len() < raw.len() {
            log::trace!("block {index}: {} -> {} bytes", raw.len(), compressed.len());
            Ok(compressed)
        } else {
            log::trace!("block {index}: stored, codec gave {} >= {}", compressed.len(), raw.len());
            Ok(filtered.into_owned())
        }
    }

    /// Decode one record payload back to `expected` raw bytes.
    pub fn decompress_block(&self, index: usize, payload: &[u8], expected: usize) -> Result<Vec<u8>> {
        if payload.len() > expected {
            return Err(Error::corrupt(format!(
                "block {index}: payload {} bytes exceeds raw size {expected}",
                payload.len()
            )));
        }
        let mut cur = if payload.len() == expected {
            payload.to_vec()
        } else {
            let codec = self
                .codec
                .as_ref()
                .ok_or(Error::UnsupportedCodec(self.codec_id))?;
            let out = codec
                .decompress_block(payload, expected, &self.codec_params)
                .map_err(|e| Error::DecompressionFailed {
                    codec: codec.name().to_string(),
                    reason: format!("block {index}: {e:#}"),
                })?;
            if out.len() != expected {
                return Err(Error::corrupt(format!(
                    "block {index}: {} decoded {} bytes, expected {expected}",
                    codec.name(),
                    out.len()
                )));
            }
            out
        };

        if !self.filters.is_empty() {
            let mut next = alloc_zeroed(expected)?;
            for (filter, slot) in self.filters.iter().rev() {
                filter
                    .backward(&cur, &mut next, &self.filter_params(slot, index))
                    .map_err(|e| Error::DecompressionFailed {
                        codec: filter.name().to_string(),
                        reason: format!("block {index}: {e:#}"),
                    })?;
                std::mem::swap(&mut cur, &mut next);
            }
        }
        Ok(cur)
    }
}
