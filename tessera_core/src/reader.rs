use std::ops::Range;

use crate::context::DecompressContext;
use crate::error::{alloc_zeroed, Error, Result};
use crate::format::{read_u32, ChunkHeader, BLOCK_LEN_SIZE, HEADER_LEN, MAX_BUFFERSIZE};
use crate::pipeline::BlockPipeline;
use crate::pool::run_indexed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Zeros,
    Memcpy,
    Blocks,
}

#[derive(Debug, Clone)]
struct BlockRecord {
    payload: Range<usize>,
    raw_len: usize,
}

impl BlockRecord {
    fn is_stored(&self) -> bool {
        self.payload.len() == self.raw_len
    }
}

/// A parsed and validated chunk.
///
/// # Validation
/// Construction checks, in order: the header length and version, a nonzero
/// typesize, `cbytes` against the buffer, the memcopy and zeros sizes, and
/// for compressed layouts the block length table and every record prefix.
/// Nothing is decoded; after `new` succeeds every payload range is known to
/// lie inside the chunk.
#[derive(Debug)]
pub struct ChunkReader<'a> {
    chunk: &'a [u8],
    header: ChunkHeader,
    layout: Layout,
    blocks: Vec<BlockRecord>,
}

impl<'a> ChunkReader<'a> {
    pub fn new(chunk: &'a [u8]) -> Result<Self> {
        let header = ChunkHeader::read(chunk)?;
        if header.typesize == 0 {
            return Err(Error::corrupt("typesize is 0"));
        }
        let cbytes = header.cbytes as usize;
        let nbytes = header.nbytes as usize;
        if cbytes < HEADER_LEN || cbytes > chunk.len() {
            return Err(Error::corrupt(format!(
                "cbytes {cbytes} does not fit a {}-byte buffer",
                chunk.len()
            )));
        }
        if nbytes > MAX_BUFFERSIZE {
            return Err(Error::corrupt(format!("nbytes {nbytes} exceeds {MAX_BUFFERSIZE}")));
        }
        let chunk = &chunk[..cbytes];

        let (layout, blocks) = if header.is_zeros() {
            if cbytes != HEADER_LEN {
                return Err(Error::corrupt(format!("zeros chunk carries {cbytes} bytes")));
            }
            (Layout::Zeros, Vec::new())
        } else if header.is_memcpy() {
            if cbytes != HEADER_LEN + nbytes {
                return Err(Error::corrupt(format!(
                    "memcopy chunk is {cbytes} bytes for {nbytes} raw"
                )));
            }
            (Layout::Memcpy, Vec::new())
        } else if nbytes == 0 {
            return Err(Error::corrupt("compressed chunk with no content"));
        } else if header.is_split() {
            (Layout::Blocks, Self::split_records(chunk, &header)?)
        } else {
            if header.blocksize as usize != nbytes {
                return Err(Error::corrupt(format!(
                    "monolithic chunk has blocksize {} but nbytes {nbytes}",
                    header.blocksize
                )));
            }
            let len = read_u32(chunk, HEADER_LEN)? as usize;
            let start = HEADER_LEN + BLOCK_LEN_SIZE;
            if start + len != cbytes {
                return Err(Error::corrupt(format!(
                    "record of {len} bytes does not end at cbytes {cbytes}"
                )));
            }
            if len > nbytes {
                return Err(Error::corrupt(format!("record of {len} bytes exceeds nbytes {nbytes}")));
            }
            (Layout::Blocks, vec![BlockRecord { payload: start..cbytes, raw_len: nbytes }])
        };

        Ok(Self { chunk, header, layout, blocks })
    }

    fn split_records(chunk: &[u8], header: &ChunkHeader) -> Result<Vec<BlockRecord>> {
        let nbytes = header.nbytes as usize;
        let blocksize = header.blocksize as usize;
        if blocksize == 0 {
            return Err(Error::corrupt("split chunk with blocksize 0"));
        }
        let nblocks = header.nblocks();
        let table_end = nblocks
            .checked_mul(BLOCK_LEN_SIZE)
            .and_then(|t| t.checked_add(HEADER_LEN))
            .filter(|end| *end <= chunk.len())
            .ok_or_else(|| Error::corrupt(format!("table of {nblocks} blocks runs past the chunk")))?;

        let mut blocks = Vec::with_capacity(nblocks);
        let mut offset = table_end;
        for i in 0..nblocks {
            let table_len = read_u32(chunk, HEADER_LEN + i * BLOCK_LEN_SIZE)?;
            let prefix = read_u32(chunk, offset)?;
            if prefix != table_len {
                return Err(Error::corrupt(format!(
                    "block {i}: record prefix {prefix} disagrees with table entry {table_len}"
                )));
            }
            let start = offset + BLOCK_LEN_SIZE;
            let end = start
                .checked_add(table_len as usize)
                .filter(|end| *end <= chunk.len())
                .ok_or_else(|| Error::corrupt(format!("block {i}: record runs past the chunk")))?;
            let raw_len = blocksize.min(nbytes - i * blocksize);
            if end - start > raw_len {
                return Err(Error::corrupt(format!(
                    "block {i}: record of {} bytes exceeds raw size {raw_len}",
                    end - start
                )));
            }
            blocks.push(BlockRecord { payload: start..end, raw_len });
            offset = end;
        }
        if offset != chunk.len() {
            return Err(Error::corrupt(format!(
                "records end at {offset}, cbytes is {}",
                chunk.len()
            )));
        }
        Ok(blocks)
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn nbytes(&self) -> usize {
        self.header.nbytes as usize
    }

    pub fn cbytes(&self) -> usize {
        self.header.cbytes as usize
    }

    pub fn typesize(&self) -> usize {
        self.header.typesize as usize
    }

    /// Number of records in the payload (0 for memcopy and zeros chunks).
    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    /// The chunk bytes, trimmed to `cbytes`.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.chunk
    }

    /// Decoded bytes `[start, end)` of the raw payload, decoding only the
    /// blocks that overlap the range.
    fn read_range(&self, ctx: &DecompressContext, start: usize, end: usize) -> Result<Vec<u8>> {
        let mut out = alloc_zeroed(end - start)?;
        if start == end {
            return Ok(out);
        }
        match self.layout {
            Layout::Zeros => {}
            Layout::Memcpy => {
                out.copy_from_slice(&self.chunk[HEADER_LEN + start..HEADER_LEN + end]);
            }
            Layout::Blocks => {
                let blocksize = self.block_stride();
                let first = start / blocksize;
                let last = (end - 1) / blocksize;
                let decoded = self.decode_blocks(ctx, first..last + 1)?;
                for (k, block) in decoded.iter().enumerate() {
                    let block_start = (first + k) * blocksize;
                    let lo = start.max(block_start);
                    let hi = end.min(block_start + block.len());
                    out[lo - start..hi - start].copy_from_slice(&block[lo - block_start..hi - block_start]);
                }
            }
        }
        Ok(out)
    }

    fn block_stride(&self) -> usize {
        if self.header.is_split() {
            self.header.blocksize as usize
        } else {
            self.nbytes()
        }
    }

    fn decode_blocks(&self, ctx: &DecompressContext, range: Range<usize>) -> Result<Vec<Vec<u8>>> {
        let records = &self.blocks[range.clone()];
        let needs_codec = records.iter().any(|r| !r.is_stored());
        let metalayers = ctx.metalayers();
        let pipeline = BlockPipeline::for_decompression(
            &ctx.registry,
            &self.header,
            needs_codec,
            metalayers.as_deref(),
        )?;
        let pool = if records.len() > 1 { ctx.pool() } else { None };
        run_indexed(
            pool,
            records.len(),
            |k| {
                let record = &records[k];
                pipeline.decompress_block(range.start + k, &self.chunk[record.payload.clone()], record.raw_len)
            },
            |k, msg| Error::DecompressionFailed {
                codec: pipeline.codec_label(),
                reason: format!("block {} panicked: {msg}", range.start + k),
            },
        )
    }
}

impl DecompressContext {
    /// Decompress a chunk into a freshly allocated buffer of `nbytes`.
    pub fn decompress(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        let _call = self.lock();
        let reader = ChunkReader::new(chunk)?;
        reader.read_range(self, 0, reader.nbytes())
    }

    /// Decompress a chunk into `dst` and return the number of bytes written.
    ///
    /// Fails with `BufferTooSmall` before decoding anything when `dst` is
    /// shorter than the chunk's `nbytes`. On any failure `dst` is untouched.
    pub fn decompress_into(&self, chunk: &[u8], dst: &mut [u8]) -> Result<usize> {
        let _call = self.lock();
        let reader = ChunkReader::new(chunk)?;
        let nbytes = reader.nbytes();
        if dst.len() < nbytes {
            return Err(Error::BufferTooSmall { needed: nbytes, available: dst.len() });
        }
        match reader.layout {
            Layout::Zeros => dst[..nbytes].fill(0),
            Layout::Memcpy => dst[..nbytes].copy_from_slice(&reader.chunk[HEADER_LEN..]),
            Layout::Blocks => {
                let decoded = reader.decode_blocks(self, 0..reader.nblocks())?;
                let stride = reader.block_stride();
                for (i, block) in decoded.iter().enumerate() {
                    dst[i * stride..i * stride + block.len()].copy_from_slice(block);
                }
            }
        }
        log::trace!("decompressed {} -> {nbytes} bytes", reader.cbytes());
        Ok(nbytes)
    }

    /// Read `nitems` elements starting at item `start`, decoding only the
    /// blocks that hold them.
    pub fn get_items(&self, chunk: &[u8], start: usize, nitems: usize) -> Result<Vec<u8>> {
        let _call = self.lock();
        let reader = ChunkReader::new(chunk)?;
        let typesize = reader.typesize();
        let total = reader.nbytes() / typesize;
        let stop = start.checked_add(nitems).unwrap_or(usize::MAX);
        if stop > total {
            return Err(Error::IndexOutOfRange { index: stop, len: total });
        }
        reader.read_range(self, start * typesize, stop * typesize)
    }
}
