//! Process-wide table of codecs and filters, keyed by their header id.
//!
//! Ids `0..32` are built in, `32..160` are reserved for plugins shipped with
//! the library, and `160..=255` are free for applications. Built-in ids whose
//! bodies live in another crate start out as reserved placeholders and are
//! filled in by that crate's `init()`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::codec::{Codec, Filter};
use crate::error::{Error, PluginKind, Result};
use crate::filters::builtin_filters;
use crate::format::{CodecId, FilterId, USER_PLUGIN_START};

enum Slot<T: ?Sized> {
    Reserved(&'static str),
    Loaded(Arc<T>),
}

/// Summary of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: u8,
    pub name: &'static str,
    pub loaded: bool,
}

struct Table<T: ?Sized> {
    kind: PluginKind,
    slots: RwLock<BTreeMap<u8, Slot<T>>>,
}

impl<T: ?Sized> Table<T> {
    fn new(kind: PluginKind) -> Self {
        Self { kind, slots: RwLock::new(BTreeMap::new()) }
    }

    fn reserve(&self, id: u8, name: &'static str) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entry(id).or_insert(Slot::Reserved(name));
    }

    fn insert(&self, id: u8, value: Arc<T>) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get(&id) {
            Some(Slot::Loaded(_)) => return Err(Error::IdConflict { kind: self.kind, id }),
            Some(Slot::Reserved(_)) => {}
            None if id >= USER_PLUGIN_START => {}
            None => {
                return Err(Error::InvalidParameter(format!(
                    "{} id {id} is outside the user range {USER_PLUGIN_START}..=255",
                    self.kind
                )))
            }
        }
        slots.insert(id, Slot::Loaded(value));
        Ok(())
    }

    fn get(&self, id: u8) -> Option<Arc<T>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        match slots.get(&id) {
            Some(Slot::Loaded(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    fn list(&self, name_of: impl Fn(&T) -> &'static str) -> Vec<PluginInfo> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(id, slot)| match slot {
                Slot::Reserved(name) => PluginInfo { id: *id, name: *name, loaded: false },
                Slot::Loaded(value) => PluginInfo { id: *id, name: name_of(value.as_ref()), loaded: true },
            })
            .collect()
    }
}

/// Codec and filter lookup table.
///
/// Lookups take a read lock only, so many worker threads can resolve ids at
/// once. Registration should finish before concurrent use begins.
pub struct Registry {
    codecs: Table<dyn Codec>,
    filters: Table<dyn Filter>,
}

impl Registry {
    /// A registry with no entries at all.
    pub fn empty() -> Self {
        Self {
            codecs: Table::new(PluginKind::Codec),
            filters: Table::new(PluginKind::Filter),
        }
    }

    /// Built-in filters loaded; built-in codecs and bytedelta reserved.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        for filter in builtin_filters() {
            registry.filters.reserve(filter.id(), filter.name());
            // Reserved just above, so this cannot conflict.
            let _ = registry.filters.insert(filter.id(), filter);
        }
        registry.codecs.reserve(CodecId::Lz4.code(), "lz4");
        registry.codecs.reserve(CodecId::Zlib.code(), "zlib");
        registry.codecs.reserve(CodecId::Zstd.code(), "zstd");
        registry.filters.reserve(FilterId::ByteDelta.code(), "bytedelta");
        registry
    }

    /// Register a codec under its own `id()`.
    ///
    /// Succeeds for a reserved placeholder or a free user id; fails with
    /// `IdConflict` if a codec is already loaded there.
    pub fn register_codec(&self, codec: Arc<dyn Codec>) -> Result<()> {
        let id = codec.id();
        self.codecs.insert(id, codec)?;
        log::debug!("registered codec id {id}");
        Ok(())
    }

    /// Register a filter under its own `id()`. Same rules as codecs.
    pub fn register_filter(&self, filter: Arc<dyn Filter>) -> Result<()> {
        let id = filter.id();
        self.filters.insert(id, filter)?;
        log::debug!("registered filter id {id}");
        Ok(())
    }

    pub fn codec(&self, id: u8) -> Result<Arc<dyn Codec>> {
        self.codecs.get(id).ok_or(Error::UnsupportedCodec(id))
    }

    pub fn filter(&self, id: u8) -> Result<Arc<dyn Filter>> {
        self.filters.get(id).ok_or(Error::UnsupportedFilter(id))
    }

    pub fn has_codec(&self, id: u8) -> bool {
        self.codecs.get(id).is_some()
    }

    pub fn has_filter(&self, id: u8) -> bool {
        self.filters.get(id).is_some()
    }

    pub fn list_codecs(&self) -> Vec<PluginInfo> {
        self.codecs.list(|c| c.name())
    }

    pub fn list_filters(&self) -> Vec<PluginInfo> {
        self.filters.list(|f| f.name())
    }
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// The process-wide registry used by contexts built with `new`.
///
/// Created with [`Registry::with_builtins`] on first access.
pub fn global() -> &'static Registry {
    shared()
}

/// Owning handle to the process-wide registry.
pub fn shared() -> &'static Arc<Registry> {
    GLOBAL.get_or_init(|| Arc::new(Registry::with_builtins()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecParams;

    struct Fake(u8);

    impl Codec for Fake {
        fn id(&self) -> u8 {
            self.0
        }

        fn name(&self) -> &'static str {
            "fake"
        }

        fn compress_block(&self, raw: &[u8], _p: &CodecParams) -> anyhow::Result<Vec<u8>> {
            Ok(raw.to_vec())
        }

        fn decompress_block(&self, c: &[u8], _n: usize, _p: &CodecParams) -> anyhow::Result<Vec<u8>> {
            Ok(c.to_vec())
        }
    }

    #[test]
    fn builtin_filters_are_loaded_and_codecs_reserved() {
        let r = Registry::with_builtins();
        for id in [0u8, 1, 2, 3] {
            assert!(r.has_filter(id), "filter {id}");
        }
        assert!(matches!(r.filter(FilterId::ByteDelta.code()), Err(Error::UnsupportedFilter(35))));
        assert!(matches!(r.codec(CodecId::Zstd.code()), Err(Error::UnsupportedCodec(5))));
        let codecs = r.list_codecs();
        assert_eq!(codecs.len(), 3);
        assert!(codecs.iter().all(|c| !c.loaded));
    }

    #[test]
    fn placeholder_can_be_filled_once() {
        let r = Registry::with_builtins();
        r.register_codec(Arc::new(Fake(CodecId::Zstd.code()))).unwrap();
        assert_eq!(r.codec(5).unwrap().name(), "fake");
        let err = r.register_codec(Arc::new(Fake(5))).unwrap_err();
        assert!(matches!(err, Error::IdConflict { kind: PluginKind::Codec, id: 5 }));
    }

    #[test]
    fn free_ids_only_in_user_range() {
        let r = Registry::with_builtins();
        assert!(matches!(
            r.register_codec(Arc::new(Fake(40))),
            Err(Error::InvalidParameter(_))
        ));
        r.register_codec(Arc::new(Fake(200))).unwrap();
        assert!(r.has_codec(200));
        assert!(matches!(r.codec(201), Err(Error::UnsupportedCodec(201))));
    }

    #[test]
    fn builtin_filters_cannot_be_replaced() {
        let r = Registry::with_builtins();
        let err = r.register_filter(Arc::new(crate::filters::ShuffleFilter)).unwrap_err();
        assert!(matches!(err, Error::IdConflict { kind: PluginKind::Filter, id: 1 }));
    }

    #[test]
    fn concurrent_lookups_see_same_entry() {
        let r = Arc::new(Registry::with_builtins());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || r.filter(1).map(|f| f.name()).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "shuffle");
        }
    }
}
