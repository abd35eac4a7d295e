/// Integration tests: chunks and super-chunks driven through the bundled
/// codecs, checking that
///  1. every codec / filter chain / split mode combination reads back exactly
///  2. chunk bytes do not depend on the thread count
///  3. super-chunk positions stay consistent under insert, update and delete
///  4. failed calls leave buffers and super-chunks untouched
///  5. user-range plugins see the owning super-chunk's metalayers
use std::sync::{Arc, Once};

use tessera_core::format::{CodecId, FilterId, FilterSlot, MAX_OVERHEAD};
use tessera_core::{
    ChunkHeader, ChunkStore, Codec, CodecParams, CParams, CompressContext, DParams, DecompressContext,
    Error, Filter, FilterParams, MemStore, SplitMode, Storage, SuperChunk,
};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Slowly varying little-endian int64 series, the typical numeric payload.
fn int64_series(n: usize, start: i64, step: i64) -> Vec<u8> {
    (0..n as i64).flat_map(|i| (start + i * step).to_le_bytes()).collect()
}

/// Noisy float32 signal: compressible after shuffle, never constant.
fn float32_signal(n: usize, seed: u64) -> Vec<u8> {
    let noise = pseudo_random_bytes(n, seed);
    (0..n)
        .flat_map(|i| ((i as f32 * 0.01).sin() * 100.0 + noise[i] as f32 / 256.0).to_le_bytes())
        .collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn setup() {
    tessera_codecs::init();
}

fn dctx(nthreads: usize) -> DecompressContext {
    DecompressContext::new(DParams::default().with_nthreads(nthreads)).unwrap()
}

fn storage(cparams: CParams) -> Storage {
    Storage::new(cparams, DParams::default())
}

/// Xors every byte with the first byte of the "key" metalayer.
struct KeyedXor;

const KEYED_XOR_ID: u8 = 200;
const PANICKY_CODEC_ID: u8 = 201;

impl KeyedXor {
    fn apply(src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        let key = params
            .metalayers
            .and_then(|m| m.get("key"))
            .and_then(|k| k.first().copied())
            .ok_or_else(|| anyhow::anyhow!("no key metalayer"))?;
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s ^ key;
        }
        Ok(())
    }
}

impl Filter for KeyedXor {
    fn id(&self) -> u8 {
        KEYED_XOR_ID
    }

    fn name(&self) -> &'static str {
        "keyed-xor"
    }

    fn forward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        Self::apply(src, dst, params)
    }

    fn backward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        Self::apply(src, dst, params)
    }
}

/// Panics on the third block it sees in a call.
struct Panicky;

impl Codec for Panicky {
    fn id(&self) -> u8 {
        PANICKY_CODEC_ID
    }

    fn name(&self) -> &'static str {
        "panicky"
    }

    fn compress_block(&self, raw: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        if raw.first() == Some(&2) {
            panic!("block starting with 2");
        }
        Ok(raw[..raw.len() / 2].to_vec())
    }

    fn decompress_block(&self, _c: &[u8], _raw_len: usize, _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("panicky cannot decompress")
    }
}

fn register_test_plugins() {
    static REGISTER: Once = Once::new();
    setup();
    REGISTER.call_once(|| {
        let registry = tessera_core::registry::global();
        registry.register_filter(Arc::new(KeyedXor)).unwrap();
        registry.register_codec(Arc::new(Panicky)).unwrap();
    });
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_codecs_filters_and_split_modes() {
    setup();
    let data = float32_signal(50_000, 7);
    let chains: [&[FilterSlot]; 5] = [
        &[],
        &[FilterSlot::new(FilterId::Shuffle)],
        &[FilterSlot::new(FilterId::BitShuffle)],
        &[FilterSlot::new(FilterId::Delta), FilterSlot::new(FilterId::Shuffle)],
        &[FilterSlot::new(FilterId::Shuffle), FilterSlot::new(FilterId::ByteDelta)],
    ];
    for codec in [CodecId::Lz4, CodecId::Zlib, CodecId::Zstd] {
        for chain in chains {
            for split in [SplitMode::Never, SplitMode::Always, SplitMode::Auto] {
                let cparams = CParams::default()
                    .with_codec(codec)
                    .with_typesize(4)
                    .with_filters(chain)
                    .with_blocksize(16 * 1024)
                    .with_nthreads(2)
                    .with_splitmode(split);
                let chunk = CompressContext::new(cparams).unwrap().compress(&data).unwrap();
                let header = ChunkHeader::read(&chunk).unwrap();
                assert_eq!(header.cbytes as usize, chunk.len());
                assert_eq!(
                    dctx(1).decompress(&chunk).unwrap(),
                    data,
                    "{codec:?} {chain:?} {split:?}"
                );
            }
        }
    }
}

#[test]
fn test_three_int64_buffers() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default())).unwrap();
    let buffers: Vec<Vec<u8>> = (0..3).map(|k| int64_series(200, k * 1_000_000, 3)).collect();
    for (k, buf) in buffers.iter().enumerate() {
        assert_eq!(buf.len(), 1600);
        assert_eq!(schunk.append_buffer(buf).unwrap(), k + 1);
    }
    assert_eq!(schunk.chunk_count(), 3);

    let mut dst = vec![0u8; 1600];
    assert_eq!(schunk.decompress_chunk(1, &mut dst).unwrap(), 1600);
    assert_eq!(dst, buffers[1]);
    assert!(schunk.cbytes() < schunk.nbytes());
}

#[test]
fn test_short_destination_writes_nothing() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default())).unwrap();
    schunk.append_buffer(&int64_series(200, 0, 1)).unwrap();

    let mut dst = vec![0x5Au8; 1599];
    let err = schunk.decompress_chunk(0, &mut dst).unwrap_err();
    assert!(matches!(err, Error::BufferTooSmall { needed: 1600, available: 1599 }));
    assert!(dst.iter().all(|b| *b == 0x5A));
}

#[test]
fn test_insert_shifts_later_chunks() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default())).unwrap();
    let bufs: Vec<Vec<u8>> = (0..4).map(|k| int64_series(128, k * 10_000, 1)).collect();
    for buf in &bufs[..3] {
        schunk.append_buffer(buf).unwrap();
    }
    let inserted = schunk.compress_context().compress(&bufs[3]).unwrap();
    assert_eq!(schunk.insert_chunk(1, &inserted[..]).unwrap(), 4);

    let expected = [&bufs[0], &bufs[3], &bufs[1], &bufs[2]];
    for (pos, want) in expected.iter().enumerate() {
        assert_eq!(&schunk.decompress_chunk_vec(pos).unwrap(), *want, "position {pos}");
    }
}

#[test]
fn test_random_mutations_keep_index_integrity() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default().with_typesize(4))).unwrap();
    let mut model: Vec<Vec<u8>> = Vec::new();
    let mut rng = 0x2545F4914F6CDD1Du64;
    let mut next = |bound: usize| {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((rng >> 33) as usize) % bound.max(1)
    };

    for step in 0..200 {
        let payload = int64_series(16 + next(64), step as i64 * 97, 1 + next(5) as i64);
        let chunk = schunk.compress_context().compress(&payload).unwrap();
        match next(4) {
            0 => {
                let pos = next(model.len() + 1);
                schunk.insert_chunk(pos, chunk).unwrap();
                model.insert(pos, payload);
            }
            1 if !model.is_empty() => {
                let pos = next(model.len());
                schunk.update_chunk(pos, chunk).unwrap();
                model[pos] = payload;
            }
            2 if !model.is_empty() => {
                let pos = next(model.len());
                schunk.delete_chunk(pos).unwrap();
                model.remove(pos);
            }
            _ => {
                schunk.append_chunk(chunk).unwrap();
                model.push(payload);
            }
        }
        assert_eq!(schunk.chunk_count(), model.len());
    }

    let total: usize = model.iter().map(Vec::len).sum();
    assert_eq!(schunk.nbytes(), total as u64);
    for (pos, want) in model.iter().enumerate() {
        assert_eq!(&schunk.decompress_chunk_vec(pos).unwrap(), want, "position {pos}");
    }
}

#[test]
fn test_thread_count_does_not_change_chunks() {
    setup();
    let data = float32_signal(200_000, 11);
    let chunk_for = |nthreads: usize| {
        let cparams = CParams::default()
            .with_typesize(4)
            .with_blocksize(32 * 1024)
            .with_nthreads(nthreads)
            .with_splitmode(SplitMode::Always);
        CompressContext::new(cparams).unwrap().compress(&data).unwrap()
    };
    let single = chunk_for(1);
    assert!(ChunkHeader::read(&single).unwrap().nblocks() > 4);
    for nthreads in [2, 3, 8] {
        assert_eq!(chunk_for(nthreads), single, "{nthreads} threads");
        assert_eq!(dctx(nthreads).decompress(&single).unwrap(), data);
    }
}

#[test]
fn test_compression_is_deterministic() {
    setup();
    let data = int64_series(10_000, -5_000, 7);
    let ctx = CompressContext::new(CParams::default().with_nthreads(4)).unwrap();
    let first = ctx.compress(&data).unwrap();
    assert_eq!(ctx.compress(&data).unwrap(), first);
    assert_eq!(ctx.try_clone().unwrap().compress(&data).unwrap(), first);
}

#[test]
fn test_random_data_never_expands_past_overhead() {
    setup();
    for (len, seed) in [(1usize, 1u64), (31, 2), (4096, 3), (300_001, 4)] {
        let data = pseudo_random_bytes(len, seed);
        for codec in [CodecId::Lz4, CodecId::Zlib, CodecId::Zstd] {
            let cparams = CParams::default().with_codec(codec).with_typesize(1).with_nthreads(2);
            let chunk = CompressContext::new(cparams).unwrap().compress(&data).unwrap();
            assert!(chunk.len() <= len + MAX_OVERHEAD, "{codec:?} len {len}: {}", chunk.len());
            assert_eq!(dctx(1).decompress(&chunk).unwrap(), data);
        }
    }
}

#[test]
fn test_failed_operations_leave_schunk_unchanged() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default())).unwrap();
    schunk.append_buffer(&int64_series(100, 0, 1)).unwrap();
    schunk.append_buffer(&int64_series(100, 1, 1)).unwrap();
    let (count, nbytes, cbytes) = (schunk.chunk_count(), schunk.nbytes(), schunk.cbytes());

    let good = schunk.get_chunk(0).unwrap().into_owned();
    let mut truncated = good.clone();
    truncated.truncate(good.len() - 1);

    assert!(schunk.insert_chunk(5, &good[..]).is_err());
    assert!(schunk.update_chunk(2, &good[..]).is_err());
    assert!(schunk.delete_chunk(9).is_err());
    assert!(schunk.append_chunk(truncated).is_err());
    assert!(schunk.append_buffer(&[0u8; 7]).is_err());
    assert!(schunk.reorder_offsets(&[1, 1]).is_err());

    assert_eq!((schunk.chunk_count(), schunk.nbytes(), schunk.cbytes()), (count, nbytes, cbytes));
    assert_eq!(schunk.decompress_chunk_vec(1).unwrap(), int64_series(100, 1, 1));
}

#[test]
fn test_user_filter_reads_schunk_metalayer() {
    register_test_plugins();
    let cparams = CParams::default()
        .with_typesize(8)
        .with_filters(&[FilterSlot::new(FilterId::Other(KEYED_XOR_ID)), FilterSlot::new(FilterId::Shuffle)]);
    let mut schunk = SuperChunk::new(storage(cparams)).unwrap();

    // Without the metalayer the filter refuses to run.
    let err = schunk.append_buffer(&int64_series(64, 0, 1)).unwrap_err();
    assert!(matches!(err, Error::CompressionFailed { .. }), "{err:?}");
    assert_eq!(schunk.chunk_count(), 0);

    schunk.add_metalayer("key", &[0xA5]).unwrap();
    let data = int64_series(512, 42, 2);
    schunk.append_buffer(&data).unwrap();
    assert_eq!(schunk.decompress_chunk_vec(0).unwrap(), data);

    // A different key decodes to different bytes.
    schunk.update_metalayer("key", &[0x01]).unwrap();
    assert_ne!(schunk.decompress_chunk_vec(0).unwrap(), data);
}

#[test]
fn test_panicking_codec_fails_the_call() {
    register_test_plugins();
    // Blocks of 100 bytes, the third one starting with byte 2.
    let data: Vec<u8> = (0..500).map(|i| (i / 100) as u8).collect();
    let cparams = CParams::default()
        .with_codec(CodecId::Other(PANICKY_CODEC_ID))
        .with_typesize(1)
        .with_filters(&[])
        .with_blocksize(100)
        .with_nthreads(3)
        .with_splitmode(SplitMode::Always);
    let ctx = CompressContext::new(cparams).unwrap();
    match ctx.compress(&data).unwrap_err() {
        Error::CompressionFailed { codec, reason } => {
            assert_eq!(codec, "panicky");
            assert!(reason.contains("block 2"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The context is still usable afterwards.
    assert!(ctx.compress(&[0u8; 50]).is_ok());
}

#[test]
fn test_zero_chunks_and_slices() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default()).with_chunksize(8 * 100)).unwrap();
    schunk.append_buffer(&int64_series(100, 1, 1)).unwrap();
    schunk.fill_zeros(150).unwrap();
    assert_eq!(schunk.chunk_count(), 3);

    let slice = schunk.get_slice_buffer(95, 110).unwrap();
    let mut expected = int64_series(100, 1, 1)[95 * 8..].to_vec();
    expected.extend_from_slice(&[0u8; 10 * 8]);
    assert_eq!(slice, expected);
}

#[test]
fn test_concurrent_readers_share_a_schunk() {
    setup();
    let mut schunk = SuperChunk::new(storage(CParams::default().with_nthreads(2))).unwrap();
    let bufs: Vec<Vec<u8>> = (0..8).map(|k| int64_series(4096, k * 3, 5)).collect();
    for buf in &bufs {
        schunk.append_buffer(buf).unwrap();
    }
    let schunk = &schunk;
    std::thread::scope(|scope| {
        for t in 0..4 {
            let bufs = &bufs;
            scope.spawn(move || {
                let ctx = dctx(1);
                for pos in (t..8).step_by(2) {
                    let mut dst = vec![0u8; bufs[pos].len()];
                    schunk.decompress_chunk_with(&ctx, pos, &mut dst).unwrap();
                    assert_eq!(&dst, &bufs[pos]);
                }
            });
        }
    });
}

#[test]
fn test_reopened_store_matches_after_mutations() {
    setup();
    let store = Arc::new(MemStore::new());
    let bufs: Vec<Vec<u8>> = (0..6).map(|k| int64_series(300, k, 11)).collect();
    {
        let mut schunk = SuperChunk::new(storage(CParams::default()).with_store(store.clone())).unwrap();
        for buf in &bufs[..4] {
            schunk.append_buffer(buf).unwrap();
        }
        // [0 1 2 3] -> [0 4 1 2 3] -> [0 4 5 2 3] -> [4 5 2 3] -> [3 2 5 4]
        let ctx = schunk.compress_context().try_clone().unwrap();
        schunk.insert_chunk(1, ctx.compress(&bufs[4]).unwrap()).unwrap();
        schunk.update_chunk(2, ctx.compress(&bufs[5]).unwrap()).unwrap();
        schunk.delete_chunk(0).unwrap();
        schunk.reorder_offsets(&[3, 2, 1, 0]).unwrap();
    }
    let reopened = SuperChunk::open(storage(CParams::default()).with_store(store.clone())).unwrap();
    assert_eq!(reopened.chunk_count(), 4);
    assert_eq!(reopened.chunksize(), 2400);
    for (pos, k) in [3, 2, 5, 4].into_iter().enumerate() {
        assert_eq!(reopened.decompress_chunk_vec(pos).unwrap(), bufs[k], "position {pos}");
    }
    // The replaced and deleted chunks are gone from the store.
    assert_eq!(store.chunk_count().unwrap(), 4);
}
