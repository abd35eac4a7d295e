use crate::error::{Error, Result};

/// Chunk layout version written into byte 0 of every header.
pub const FORMAT_VERSION: u8 = 1;

/// Fixed size of the chunk header in bytes.
///   version:u8 + flags:u8 + typesize:u8 + reserved:u8
///   + nbytes:u32 + blocksize:u32 + cbytes:u32
///   + codec:u8 + codec_meta:u8 + clevel:u8 + reserved:u8
///   + filters[6] + filters_meta[6]
///   = 4 + 12 + 4 + 12 = 32
pub const HEADER_LEN: usize = 32;

/// Worst-case growth of a chunk over its raw payload.
/// The memcopy fallback guarantees `cbytes <= nbytes + MAX_OVERHEAD`.
pub const MAX_OVERHEAD: usize = HEADER_LEN;

/// Size of one slot in the block length table, and of each record prefix.
pub const BLOCK_LEN_SIZE: usize = 4;

/// Largest raw payload a single chunk may carry.
pub const MAX_BUFFERSIZE: usize = i32::MAX as usize - MAX_OVERHEAD;

/// Capacity of the filter chain.
pub const MAX_FILTERS: usize = 6;

pub const MAX_TYPESIZE: usize = 255;
pub const MAX_CLEVEL: u8 = 9;

/// Typical L1 data cache size, the unit of the automatic block size.
pub const L1: usize = 32 * 1024;

/// Default upper bound for a block's uncompressed size.
pub const DEFAULT_MAX_BLOCKSIZE: usize = 512 * 1024;

// ── Flags ──────────────────────────────────────────────────────────────────

pub const FLAG_SHUFFLE: u8 = 1 << 0;
pub const FLAG_BITSHUFFLE: u8 = 1 << 1;
/// Payload is the raw uncompressed bytes.
pub const FLAG_MEMCPY: u8 = 1 << 2;
pub const FLAG_DELTA: u8 = 1 << 3;
/// Payload is a block length table followed by one record per block.
pub const FLAG_SPLIT: u8 = 1 << 4;
/// Every byte of the payload is zero; nothing follows the header.
pub const FLAG_ZEROS: u8 = 1 << 5;

// ── Id ranges ──────────────────────────────────────────────────────────────

/// Ids below this value belong to the library itself.
pub const GLOBAL_PLUGIN_START: u8 = 32;
/// Ids at or above this value are free for applications.
pub const USER_PLUGIN_START: u8 = 160;

/// Codec identity as stored in byte 16 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodecId {
    Lz4,
    Zlib,
    Zstd,
    Other(u8),
}

impl CodecId {
    pub const fn code(self) -> u8 {
        match self {
            CodecId::Lz4 => 1,
            CodecId::Zlib => 4,
            CodecId::Zstd => 5,
            CodecId::Other(id) => id,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => CodecId::Lz4,
            4 => CodecId::Zlib,
            5 => CodecId::Zstd,
            other => CodecId::Other(other),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lz4" => Some(CodecId::Lz4),
            "zlib" => Some(CodecId::Zlib),
            "zstd" => Some(CodecId::Zstd),
            _ => None,
        }
    }
}

impl From<u8> for CodecId {
    fn from(code: u8) -> Self {
        Self::from_code(code)
    }
}

/// Filter identity as stored in bytes 20..26 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterId {
    NoShuffle,
    Shuffle,
    BitShuffle,
    Delta,
    ByteDelta,
    Other(u8),
}

impl FilterId {
    pub const fn code(self) -> u8 {
        match self {
            FilterId::NoShuffle => 0,
            FilterId::Shuffle => 1,
            FilterId::BitShuffle => 2,
            FilterId::Delta => 3,
            FilterId::ByteDelta => 35,
            FilterId::Other(id) => id,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => FilterId::NoShuffle,
            1 => FilterId::Shuffle,
            2 => FilterId::BitShuffle,
            3 => FilterId::Delta,
            35 => FilterId::ByteDelta,
            other => FilterId::Other(other),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "noshuffle" | "none" => Some(FilterId::NoShuffle),
            "shuffle" => Some(FilterId::Shuffle),
            "bitshuffle" => Some(FilterId::BitShuffle),
            "delta" => Some(FilterId::Delta),
            "bytedelta" => Some(FilterId::ByteDelta),
            _ => None,
        }
    }

    pub const fn is_noop(self) -> bool {
        matches!(self, FilterId::NoShuffle)
    }
}

impl From<u8> for FilterId {
    fn from(code: u8) -> Self {
        Self::from_code(code)
    }
}

/// One slot of the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSlot {
    pub id: FilterId,
    pub meta: u8,
}

impl FilterSlot {
    pub const EMPTY: FilterSlot = FilterSlot { id: FilterId::NoShuffle, meta: 0 };

    pub const fn new(id: FilterId) -> Self {
        Self { id, meta: 0 }
    }

    pub const fn with_meta(id: FilterId, meta: u8) -> Self {
        Self { id, meta }
    }
}

impl Default for FilterSlot {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Header flag bits implied by a filter chain.
pub fn filter_flags(filters: &[FilterSlot]) -> u8 {
    filters.iter().fold(0, |flags, slot| {
        flags
            | match slot.id {
                FilterId::Shuffle => FLAG_SHUFFLE,
                FilterId::BitShuffle => FLAG_BITSHUFFLE,
                FilterId::Delta => FLAG_DELTA,
                _ => 0,
            }
    })
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 32-byte chunk header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub version: u8,
    pub flags: u8,
    pub typesize: u8,
    /// Uncompressed payload size.
    pub nbytes: u32,
    /// Raw bytes per block (the last block may be smaller).
    pub blocksize: u32,
    /// Total chunk size including this header.
    pub cbytes: u32,
    pub codec: u8,
    pub codec_meta: u8,
    pub clevel: u8,
    pub filters: [u8; MAX_FILTERS],
    pub filters_meta: [u8; MAX_FILTERS],
}

impl ChunkHeader {
    /// Serialize to exactly `HEADER_LEN` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.flags;
        buf[2] = self.typesize;
        // buf[3] reserved
        buf[4..8].copy_from_slice(&self.nbytes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.blocksize.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cbytes.to_le_bytes());
        buf[16] = self.codec;
        buf[17] = self.codec_meta;
        buf[18] = self.clevel;
        // buf[19] reserved
        buf[20..26].copy_from_slice(&self.filters);
        buf[26..32].copy_from_slice(&self.filters_meta);
        buf
    }

    /// Deserialize from the front of `buf`, checking length and version.
    ///
    /// Only the header itself is validated here; payload consistency is
    /// checked by [`crate::reader::ChunkReader`].
    pub fn read(buf: &[u8]) -> Result<Self> {
        let head: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "chunk is {} bytes, shorter than the {HEADER_LEN}-byte header",
                    buf.len()
                ))
            })?;
        if head[0] != FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported chunk format version {} (expected {FORMAT_VERSION})",
                head[0]
            )));
        }
        let mut filters = [0u8; MAX_FILTERS];
        let mut filters_meta = [0u8; MAX_FILTERS];
        filters.copy_from_slice(&head[20..26]);
        filters_meta.copy_from_slice(&head[26..32]);
        Ok(Self {
            version: head[0],
            flags: head[1],
            typesize: head[2],
            nbytes: u32::from_le_bytes([head[4], head[5], head[6], head[7]]),
            blocksize: u32::from_le_bytes([head[8], head[9], head[10], head[11]]),
            cbytes: u32::from_le_bytes([head[12], head[13], head[14], head[15]]),
            codec: head[16],
            codec_meta: head[17],
            clevel: head[18],
            filters,
            filters_meta,
        })
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_memcpy(&self) -> bool {
        self.has_flag(FLAG_MEMCPY)
    }

    pub fn is_split(&self) -> bool {
        self.has_flag(FLAG_SPLIT)
    }

    pub fn is_zeros(&self) -> bool {
        self.has_flag(FLAG_ZEROS)
    }

    pub fn codec_id(&self) -> CodecId {
        CodecId::from_code(self.codec)
    }

    /// The filter chain as slots, in forward order.
    pub fn filter_slots(&self) -> [FilterSlot; MAX_FILTERS] {
        let mut slots = [FilterSlot::EMPTY; MAX_FILTERS];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = FilterSlot::with_meta(FilterId::from_code(self.filters[i]), self.filters_meta[i]);
        }
        slots
    }

    /// Number of blocks the payload is divided into.
    pub fn nblocks(&self) -> usize {
        let nbytes = self.nbytes as usize;
        let blocksize = self.blocksize as usize;
        if nbytes == 0 || blocksize == 0 {
            0
        } else {
            nbytes.div_ceil(blocksize)
        }
    }
}

/// Read `(nbytes, cbytes, blocksize)` from a chunk without validating its payload.
pub fn cbuffer_sizes(chunk: &[u8]) -> Result<(usize, usize, usize)> {
    let header = ChunkHeader::read(chunk)?;
    Ok((
        header.nbytes as usize,
        header.cbytes as usize,
        header.blocksize as usize,
    ))
}

/// Read a little-endian `u32` at `offset`, failing if it runs past `buf`.
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    offset
        .checked_add(4)
        .and_then(|end| buf.get(offset..end))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::corrupt(format!("u32 at offset {offset} runs past {} bytes", buf.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChunkHeader {
        ChunkHeader {
            version: FORMAT_VERSION,
            flags: FLAG_SHUFFLE | FLAG_SPLIT,
            typesize: 8,
            nbytes: 1600,
            blocksize: 512,
            cbytes: 321,
            codec: CodecId::Zstd.code(),
            codec_meta: 0,
            clevel: 5,
            filters: [0, 0, 0, 0, 0, 1],
            filters_meta: [0; MAX_FILTERS],
        }
    }

    #[test]
    fn header_layout_is_little_endian_at_fixed_offsets() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(bytes[1], FLAG_SHUFFLE | FLAG_SPLIT);
        assert_eq!(bytes[2], 8);
        assert_eq!(bytes[3], 0);
        assert_eq!(&bytes[4..8], &1600u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &512u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &321u32.to_le_bytes());
        assert_eq!(bytes[16], 5);
        assert_eq!(bytes[18], 5);
        assert_eq!(bytes[25], 1);
        assert_eq!(ChunkHeader::read(&bytes).unwrap(), sample());
    }

    #[test]
    fn short_or_wrong_version_is_corrupt() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            ChunkHeader::read(&bytes[..HEADER_LEN - 1]),
            Err(Error::CorruptData(_))
        ));
        let mut bad = bytes;
        bad[0] = 99;
        assert!(matches!(ChunkHeader::read(&bad), Err(Error::CorruptData(_))));
    }

    #[test]
    fn nblocks_rounds_up() {
        let h = sample();
        assert_eq!(h.nblocks(), 4);
        let empty = ChunkHeader { nbytes: 0, ..sample() };
        assert_eq!(empty.nblocks(), 0);
    }

    #[test]
    fn ids_round_trip_through_codes() {
        for code in 0..=255u8 {
            assert_eq!(CodecId::from_code(code).code(), code);
            assert_eq!(FilterId::from_code(code).code(), code);
        }
        assert_eq!(CodecId::from_name("zstd"), Some(CodecId::Zstd));
        assert_eq!(FilterId::from_name("bitshuffle"), Some(FilterId::BitShuffle));
    }

    #[test]
    fn flags_follow_filter_chain() {
        let chain = [
            FilterSlot::new(FilterId::Delta),
            FilterSlot::new(FilterId::Shuffle),
        ];
        assert_eq!(filter_flags(&chain), FLAG_DELTA | FLAG_SHUFFLE);
    }

    #[test]
    fn read_u32_is_bounds_checked() {
        let buf = [1u8, 0, 0, 0, 9];
        assert_eq!(read_u32(&buf, 0).unwrap(), 1);
        assert!(read_u32(&buf, 2).is_err());
        assert!(read_u32(&buf, usize::MAX).is_err());
    }
}
