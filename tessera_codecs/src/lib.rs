//! Codec and filter bodies for the ids `tessera_core` reserves.
//!
//! Call [`init`] once before compressing or decompressing with lz4, zlib,
//! zstd or bytedelta; contexts created earlier report those ids as
//! unsupported.

mod bytedelta;
mod lz4_codec;
mod zlib_codec;
mod zstd_codec;

pub use bytedelta::ByteDeltaFilter;
pub use lz4_codec::Lz4Codec;
pub use zlib_codec::ZlibCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::{Arc, Once};

use tessera_core::registry::Registry;
use tessera_core::{Codec, Error, Filter};

pub fn bundled_codecs() -> Vec<Arc<dyn Codec>> {
    vec![Arc::new(Lz4Codec), Arc::new(ZlibCodec), Arc::new(ZstdCodec)]
}

pub fn bundled_filters() -> Vec<Arc<dyn Filter>> {
    vec![Arc::new(ByteDeltaFilter)]
}

/// Load every bundled codec and filter into `registry`.
///
/// Ids that are already loaded are skipped with a warning; any other
/// registration error is returned.
pub fn register_into(registry: &Registry) -> tessera_core::Result<()> {
    let skip_conflict = |res: tessera_core::Result<()>, name: &str| match res {
        Err(Error::IdConflict { kind, id }) => {
            log::warn!("{kind} id {id} already loaded, keeping it instead of bundled {name}");
            Ok(())
        }
        other => other,
    };
    for codec in bundled_codecs() {
        let name = codec.name();
        skip_conflict(registry.register_codec(codec), name)?;
    }
    for filter in bundled_filters() {
        let name = filter.name();
        skip_conflict(registry.register_filter(filter), name)?;
    }
    Ok(())
}

/// Initialize the global registry and load the bundled plugins into it.
/// Idempotent and thread-safe.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Err(e) = register_into(tessera_core::init()) {
            log::error!("failed to load bundled codecs: {e}");
        }
    });
}
