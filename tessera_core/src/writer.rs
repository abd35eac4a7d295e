use crate::context::CompressContext;
use crate::error::{alloc_with_capacity, Error, Result};
use crate::format::{
    filter_flags, ChunkHeader, BLOCK_LEN_SIZE, FLAG_MEMCPY, FLAG_SPLIT, FLAG_ZEROS, FORMAT_VERSION,
    HEADER_LEN, MAX_BUFFERSIZE, MAX_FILTERS, MAX_OVERHEAD, MAX_TYPESIZE,
};
use crate::pipeline::BlockPipeline;
use crate::pool::run_indexed;

/// Chunk writer.
///
/// # Layout produced
/// ```text
/// [header 32 B]
///   memcopy: [raw bytes]
///   monolithic: [len:u32][payload]
///   split: [len:u32 × nblocks][len:u32][payload] × nblocks
/// ```
///
/// Blocks are compressed independently and may run on any worker; the
/// records are concatenated in block order once every block has finished.
impl CompressContext {
    /// Compress `src` into a freshly allocated chunk.
    pub fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        let _call = self.lock();
        self.compress_chunk(src)
    }

    /// Compress `src` into `dst` and return the chunk length.
    ///
    /// `dst` must hold at least `src.len() + MAX_OVERHEAD` bytes; the check
    /// happens before any work and nothing is written on failure.
    pub fn compress_into(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let needed = src.len().saturating_add(MAX_OVERHEAD);
        if dst.len() < needed {
            return Err(Error::BufferTooSmall { needed, available: dst.len() });
        }
        let chunk = self.compress(src)?;
        dst[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn header(&self, flags: u8, nbytes: usize, blocksize: usize, cbytes: usize) -> ChunkHeader {
        let p = self.params();
        let mut filters = [0u8; MAX_FILTERS];
        let mut filters_meta = [0u8; MAX_FILTERS];
        for (i, slot) in p.filter_slots().iter().enumerate() {
            filters[i] = slot.id.code();
            filters_meta[i] = slot.meta;
        }
        ChunkHeader {
            version: FORMAT_VERSION,
            flags: flags | filter_flags(&p.filters),
            typesize: p.typesize as u8,
            nbytes: nbytes as u32,
            blocksize: blocksize as u32,
            cbytes: cbytes as u32,
            codec: p.codec.code(),
            codec_meta: p.codec_meta,
            clevel: p.clevel,
            filters,
            filters_meta,
        }
    }

    fn memcpy_chunk(&self, src: &[u8]) -> Result<Vec<u8>> {
        let cbytes = HEADER_LEN + src.len();
        let mut chunk = alloc_with_capacity(cbytes)?;
        chunk.extend_from_slice(&self.header(FLAG_MEMCPY, src.len(), src.len(), cbytes).to_bytes());
        chunk.extend_from_slice(src);
        Ok(chunk)
    }

    fn compress_chunk(&self, src: &[u8]) -> Result<Vec<u8>> {
        let nbytes = src.len();
        if nbytes > MAX_BUFFERSIZE {
            return Err(Error::InvalidInput(format!(
                "source is {nbytes} bytes, a chunk holds at most {MAX_BUFFERSIZE}"
            )));
        }
        if nbytes == 0 || self.params().clevel == 0 {
            return self.memcpy_chunk(src);
        }

        let blocksize = self.blocksize_for(nbytes);
        let split = self.splits(nbytes, blocksize);
        let blocksize = if split { blocksize } else { nbytes };
        let nblocks = nbytes.div_ceil(blocksize);
        log::debug!(
            "compressing {nbytes} bytes: {} blocks of {blocksize}",
            if split { nblocks } else { 1 }
        );

        let metalayers = self.metalayers();
        let pipeline = BlockPipeline::for_compression(self, metalayers.as_deref());
        let pool = if nblocks > 1 { self.pool() } else { None };
        let records = run_indexed(
            pool,
            nblocks,
            |i| {
                let start = i * blocksize;
                let end = (start + blocksize).min(nbytes);
                pipeline.compress_block(i, &src[start..end])
            },
            |i, msg| Error::CompressionFailed {
                codec: pipeline.codec_label(),
                reason: format!("block {i} panicked: {msg}"),
            },
        )?;

        let table_len = if split { nblocks * BLOCK_LEN_SIZE } else { 0 };
        let cbytes = HEADER_LEN
            + table_len
            + records.iter().map(|r| BLOCK_LEN_SIZE + r.len()).sum::<usize>();
        if cbytes >= HEADER_LEN + nbytes {
            log::debug!("chunk would be {cbytes} bytes for {nbytes} raw; storing memcopy");
            return self.memcpy_chunk(src);
        }

        let flags = if split { FLAG_SPLIT } else { 0 };
        let mut chunk = alloc_with_capacity(cbytes)?;
        chunk.extend_from_slice(&self.header(flags, nbytes, blocksize, cbytes).to_bytes());
        if split {
            for record in &records {
                chunk.extend_from_slice(&(record.len() as u32).to_le_bytes());
            }
        }
        for record in &records {
            chunk.extend_from_slice(&(record.len() as u32).to_le_bytes());
            chunk.extend_from_slice(record);
        }
        debug_assert_eq!(chunk.len(), cbytes);
        Ok(chunk)
    }
}

/// Build a chunk of `nbytes` zero bytes that carries no payload at all.
pub fn chunk_zeros(nbytes: usize, typesize: usize) -> Result<Vec<u8>> {
    if typesize == 0 || typesize > MAX_TYPESIZE {
        return Err(Error::InvalidParameter(format!(
            "typesize {typesize} is outside 1..={MAX_TYPESIZE}"
        )));
    }
    if nbytes > MAX_BUFFERSIZE {
        return Err(Error::InvalidInput(format!(
            "{nbytes} bytes exceeds the chunk maximum {MAX_BUFFERSIZE}"
        )));
    }
    let header = ChunkHeader {
        version: FORMAT_VERSION,
        flags: FLAG_ZEROS,
        typesize: typesize as u8,
        nbytes: nbytes as u32,
        blocksize: nbytes as u32,
        cbytes: HEADER_LEN as u32,
        codec: 0,
        codec_meta: 0,
        clevel: 0,
        filters: [0; MAX_FILTERS],
        filters_meta: [0; MAX_FILTERS],
    };
    Ok(header.to_bytes().to_vec())
}
