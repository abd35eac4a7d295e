use thiserror::Error;

/// Which registry table an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Codec,
    Filter,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Codec => f.write_str("codec"),
            PluginKind::Filter => f.write_str("filter"),
        }
    }
}

/// Every failure the engine reports.
///
/// Parameter and bounds errors are raised before any block work is
/// dispatched, so a caller that sees them can assume no side effects.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("unsupported codec id {0}")]
    UnsupportedCodec(u8),

    #[error("unsupported filter id {0}")]
    UnsupportedFilter(u8),

    #[error("{kind} id {id} is already registered")]
    IdConflict { kind: PluginKind, id: u8 },

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("{codec} compression failed: {reason}")]
    CompressionFailed { codec: String, reason: String },

    #[error("{codec} decompression failed: {reason}")]
    DecompressionFailed { codec: String, reason: String },

    #[error("failed to allocate {0} bytes")]
    AllocationFailed(usize),

    #[error("chunk store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable negative code for callers that need an integer status.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidParameter(_) => -12,
            Error::InvalidInput(_) => -3,
            Error::IndexOutOfRange { .. } => -24,
            Error::BufferTooSmall { .. } => -5,
            Error::UnsupportedCodec(_) => -7,
            Error::UnsupportedFilter(_) => -8,
            Error::IdConflict { .. } => -30,
            Error::CorruptData(_) => -4,
            Error::CompressionFailed { .. } => -9,
            Error::DecompressionFailed { .. } => -10,
            Error::AllocationFailed(_) => -6,
            Error::Io(_) => -20,
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptData(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Allocate a zeroed buffer, reporting failure instead of aborting.
pub(crate) fn alloc_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailed(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Allocate an empty buffer with room for `len` bytes.
pub(crate) fn alloc_with_capacity(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailed(len))?;
    Ok(buf)
}
