use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use tessera_core::format::DEFAULT_MAX_BLOCKSIZE;
use tessera_core::{
    cbuffer_sizes, ChunkHeader, CParams, CodecId, DParams, FilterId, FilterSlot, SplitMode, Storage,
    SuperChunk,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Chunked, filtered, multi-threaded compression of typed binary arrays",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitArg {
    Never,
    Always,
    Auto,
}

impl From<SplitArg> for SplitMode {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::Never => SplitMode::Never,
            SplitArg::Always => SplitMode::Always,
            SplitArg::Auto => SplitMode::Auto,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a chunk stream
    Compress {
        /// Source file ("-" reads stdin)
        input: PathBuf,
        /// Destination chunk-stream file
        output: PathBuf,
        /// Codec: lz4 | zlib | zstd
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Compression level (0 = store, 9 = smallest)
        #[arg(short = 'l', long, default_value_t = 5)]
        clevel: u8,
        /// Element width in bytes
        #[arg(short, long, default_value_t = 8)]
        typesize: usize,
        /// Comma-separated filter chain, applied in order
        #[arg(short, long, default_value = "shuffle", value_delimiter = ',')]
        filters: Vec<String>,
        /// Raw bytes per block (0 = automatic)
        #[arg(short, long, default_value_t = 0)]
        blocksize: usize,
        /// Worker threads per context
        #[arg(short = 'j', long, default_value_t = 1)]
        threads: usize,
        #[arg(long, value_enum, default_value = "auto")]
        splitmode: SplitArg,
        /// Raw bytes per chunk
        #[arg(long, default_value_t = 4 * DEFAULT_MAX_BLOCKSIZE)]
        chunksize: usize,
    },
    /// Decompress a chunk stream back to raw bytes
    Decompress {
        /// Source chunk-stream file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        #[arg(short = 'j', long, default_value_t = 1)]
        threads: usize,
    },
    /// Print header metadata and per-chunk statistics
    Inspect {
        file: PathBuf,
        /// Print one row per chunk
        #[arg(long)]
        chunks: bool,
        /// List registered codecs and filters
        #[arg(long)]
        plugins: bool,
    },
    /// Decode an item range without touching other blocks
    Slice {
        file: PathBuf,
        /// First item (inclusive)
        #[arg(long)]
        start: usize,
        /// Last item (exclusive)
        #[arg(long)]
        stop: usize,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Benchmark random chunk decompression
    Bench {
        file: PathBuf,
        /// Number of random chunks to decode
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(short = 'j', long, default_value_t = 1)]
        threads: usize,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn codec_from_name(name: &str) -> anyhow::Result<CodecId> {
    CodecId::from_name(name)
        .ok_or_else(|| anyhow::anyhow!("unknown codec '{}'. Valid options: lz4, zlib, zstd", name))
}

fn filters_from_names(names: &[String]) -> anyhow::Result<Vec<FilterSlot>> {
    names
        .iter()
        .filter(|n| !n.is_empty())
        .map(|n| {
            FilterId::from_name(n).map(FilterSlot::new).ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown filter '{}'. Valid options: noshuffle, shuffle, bitshuffle, delta, bytedelta",
                    n
                )
            })
        })
        .collect()
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn codec_name(id: u8) -> String {
    match tessera_core::registry::global().codec(id) {
        Ok(codec) => codec.name().to_string(),
        Err(_) => format!("unknown({id})"),
    }
}

fn layout_name(h: &ChunkHeader) -> &'static str {
    if h.is_zeros() {
        "zeros"
    } else if h.is_memcpy() {
        "memcopy"
    } else if h.is_split() {
        "split"
    } else {
        "monolithic"
    }
}

/// Read every chunk of a chunk-stream file into an in-memory super-chunk.
fn load_stream(path: &Path, threads: usize) -> anyhow::Result<SuperChunk> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let typesize = match bytes.get(..tessera_core::HEADER_LEN) {
        Some(head) => ChunkHeader::read(head)?.typesize.max(1) as usize,
        None => 1,
    };
    let storage = Storage::new(
        CParams::default().with_typesize(typesize),
        DParams::default().with_nthreads(threads),
    );
    let mut schunk = SuperChunk::new(storage)?;
    let mut offset = 0;
    while offset < bytes.len() {
        let (_, cbytes, _) = cbuffer_sizes(&bytes[offset..])
            .with_context(|| format!("chunk header at offset {offset}"))?;
        let end = offset + cbytes;
        if cbytes == 0 || end > bytes.len() {
            anyhow::bail!("chunk at offset {} claims {} bytes; stream is truncated", offset, cbytes);
        }
        schunk
            .append_chunk(&bytes[offset..end])
            .with_context(|| format!("chunk {} at offset {offset}", schunk.chunk_count()))?;
        offset = end;
    }
    Ok(schunk)
}

// ── Subcommand implementations ─────────────────────────────────────────────

struct CompressArgs {
    codec: String,
    clevel: u8,
    typesize: usize,
    filters: Vec<String>,
    blocksize: usize,
    threads: usize,
    splitmode: SplitArg,
    chunksize: usize,
}

fn run_compress(input: PathBuf, output: PathBuf, args: CompressArgs) -> anyhow::Result<()> {
    if args.chunksize == 0 {
        anyhow::bail!("--chunksize must be positive");
    }
    let cparams = CParams::default()
        .with_codec(codec_from_name(&args.codec)?)
        .with_clevel(args.clevel)
        .with_typesize(args.typesize)
        .with_filters(&filters_from_names(&args.filters)?)
        .with_blocksize(args.blocksize)
        .with_nthreads(args.threads)
        .with_splitmode(args.splitmode.into());
    // Whole items per chunk.
    let chunksize = (args.chunksize / args.typesize.max(1)).max(1) * args.typesize.max(1);
    let mut schunk = SuperChunk::new(
        Storage::new(cparams, DParams::default().with_nthreads(args.threads)).with_chunksize(chunksize),
    )?;

    let mut src: Box<dyn Read> = if input.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(&input).with_context(|| format!("opening input file {:?}", input))?,
        ))
    };

    let t0 = Instant::now();
    let mut buf = vec![0u8; chunksize];
    loop {
        let n = read_full(&mut src, &mut buf)?;
        if n == 0 {
            break;
        }
        if n % args.typesize == 0 {
            schunk.append_buffer(&buf[..n])?;
        } else {
            // Trailing partial item: compress it directly as a last chunk.
            let chunk = schunk.compress_context().compress(&buf[..n])?;
            schunk.append_chunk(chunk)?;
        }
        if n < chunksize {
            break;
        }
    }
    let elapsed = t0.elapsed();

    let mut dst = BufWriter::new(
        File::create(&output).with_context(|| format!("creating output file {:?}", output))?,
    );
    for pos in 0..schunk.chunk_count() {
        dst.write_all(&schunk.get_chunk(pos)?)?;
    }
    dst.flush()?;

    eprintln!("  codec       : {}", args.codec);
    eprintln!("  clevel      : {}", args.clevel);
    eprintln!("  chunk size  : {}", human_bytes(chunksize as u64));
    eprintln!("  chunks      : {}", schunk.chunk_count());
    eprintln!("  raw size    : {}", human_bytes(schunk.nbytes()));
    eprintln!("  compressed  : {}", human_bytes(schunk.cbytes()));
    eprintln!("  ratio       : {:.2}x", schunk.cratio());
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((schunk.nbytes() as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

/// Fill `buf` as far as the reader allows; short only at end of input.
fn read_full(src: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn run_decompress(input: PathBuf, output: PathBuf, threads: usize) -> anyhow::Result<()> {
    let schunk = load_stream(&input, threads)?;

    let mut dst: Box<dyn Write> = if output.to_str() == Some("-") {
        Box::new(io::stdout())
    } else {
        Box::new(BufWriter::new(
            File::create(&output).with_context(|| format!("creating output file {:?}", output))?,
        ))
    };

    let t0 = Instant::now();
    for pos in 0..schunk.chunk_count() {
        let raw = schunk
            .decompress_chunk_vec(pos)
            .with_context(|| format!("decompressing chunk {pos}"))?;
        dst.write_all(&raw)?;
    }
    dst.flush()?;

    let elapsed = t0.elapsed();
    eprintln!("  chunks      : {}", schunk.chunk_count());
    eprintln!("  raw size    : {}", human_bytes(schunk.nbytes()));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((schunk.nbytes() as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_chunks: bool, show_plugins: bool) -> anyhow::Result<()> {
    let schunk = load_stream(&file, 1)?;
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== Chunk stream: {:?} ===", file);
    println!();
    println!("  chunks         : {}", schunk.chunk_count());
    println!("  typesize       : {}", schunk.typesize());
    println!("  raw size       : {}", human_bytes(schunk.nbytes()));
    println!("  compressed     : {}", human_bytes(schunk.cbytes()));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  ratio          : {:.2}x", schunk.cratio());

    if show_chunks {
        println!();
        println!(
            "  {:>6}  {:>10}  {:>6}  {:>12}  {:>12}  {:>10}  {:>7}",
            "chunk", "layout", "codec", "raw", "compressed", "blocksize", "blocks"
        );
        println!("  {}", "-".repeat(75));
        for pos in 0..schunk.chunk_count() {
            let chunk = schunk.get_chunk(pos)?;
            let h = ChunkHeader::read(&chunk)?;
            println!(
                "  {:>6}  {:>10}  {:>6}  {:>12}  {:>12}  {:>10}  {:>7}",
                pos,
                layout_name(&h),
                codec_name(h.codec),
                human_bytes(h.nbytes as u64),
                human_bytes(h.cbytes as u64),
                h.blocksize,
                if h.is_split() { h.nblocks() } else { 1 }
            );
        }
    }

    if show_plugins {
        let registry = tessera_core::registry::global();
        println!();
        for (kind, list) in [("codec", registry.list_codecs()), ("filter", registry.list_filters())] {
            for info in list {
                println!(
                    "  {:<6}  {:>3}  {:<10}  {}",
                    kind,
                    info.id,
                    info.name,
                    if info.loaded { "loaded" } else { "reserved" }
                );
            }
        }
    }

    Ok(())
}

fn run_slice(file: PathBuf, start: usize, stop: usize, output: Option<PathBuf>) -> anyhow::Result<()> {
    let schunk = load_stream(&file, 1)?;

    let t0 = Instant::now();
    let raw = schunk.get_slice_buffer(start, stop)?;
    let elapsed = t0.elapsed();

    eprintln!(
        "  decoded {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            // Hex dump of the first 256 bytes
            let preview = &raw[..raw.len().min(256)];
            println!("--- items {}..{} ({} bytes, first {} shown) ---", start, stop, raw.len(), preview.len());
            for (i, line) in preview.chunks(16).enumerate() {
                print!("  {:04x}  ", i * 16);
                for b in line {
                    print!("{:02x} ", b);
                }
                for _ in line.len()..16 {
                    print!("   ");
                }
                print!("  |");
                for b in line {
                    if b.is_ascii_graphic() || *b == b' ' {
                        print!("{}", *b as char);
                    } else {
                        print!(".");
                    }
                }
                println!("|");
            }
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }

    Ok(())
}

fn run_bench(file: PathBuf, count: u64, seed: u64, threads: usize) -> anyhow::Result<()> {
    let schunk = load_stream(&file, threads)?;
    let chunk_count = schunk.chunk_count() as u64;
    if chunk_count == 0 {
        anyhow::bail!("stream has no chunks");
    }
    if count == 0 {
        anyhow::bail!("--count must be positive");
    }

    // Simple LCG for reproducible random chunk indices
    let indices: Vec<usize> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((rng >> 33) % chunk_count) as usize
            })
            .collect()
    };

    eprintln!("benchmarking {} random chunk reads across {} chunks...", count, chunk_count);

    let mut dst = vec![0u8; schunk.chunksize().max(1)];
    let t0 = Instant::now();
    let mut total_raw = 0u64;
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);

    for &pos in &indices {
        let t = Instant::now();
        let n = match schunk.decompress_chunk(pos, &mut dst) {
            Ok(n) => n,
            Err(tessera_core::Error::BufferTooSmall { needed, .. }) => {
                dst.resize(needed, 0);
                schunk.decompress_chunk(pos, &mut dst)?
            }
            Err(e) => return Err(e.into()),
        };
        latencies_us.push(t.elapsed().as_micros() as u64);
        total_raw += n as u64;
    }

    let elapsed = t0.elapsed();
    latencies_us.sort_unstable();

    let pick = |q: f64| latencies_us[((latencies_us.len() as f64 * q) as usize).min(latencies_us.len() - 1)];

    println!();
    println!("=== Random Chunk Access Benchmark ===");
    println!("  chunks read : {}", count);
    println!("  threads     : {}", threads);
    println!("  total raw   : {}", human_bytes(total_raw));
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {}/s",
        human_bytes((total_raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    println!("  latency:");
    println!("    min  : {} µs", pick(0.0));
    println!("    p50  : {} µs", pick(0.5));
    println!("    p95  : {} µs", pick(0.95));
    println!("    p99  : {} µs", pick(0.99));
    println!("    max  : {} µs", pick(1.0));

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::init();
    tessera_codecs::init();
    log::debug!("{} codecs registered", tessera_core::registry::global().list_codecs().len());

    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            clevel,
            typesize,
            filters,
            blocksize,
            threads,
            splitmode,
            chunksize,
        } => run_compress(
            input,
            output,
            CompressArgs { codec, clevel, typesize, filters, blocksize, threads, splitmode, chunksize },
        ),
        Commands::Decompress { input, output, threads } => run_decompress(input, output, threads),
        Commands::Inspect { file, chunks, plugins } => run_inspect(file, chunks, plugins),
        Commands::Slice { file, start, stop, output } => run_slice(file, start, stop, output),
        Commands::Bench { file, count, seed, threads } => run_bench(file, count, seed, threads),
    }
}
