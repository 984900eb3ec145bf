use anyhow::Result;
use clap::{Parser, Subcommand};

mod coverage;
mod index;
mod io;
mod kmer;
mod prg;
mod quasimap;
mod search;
mod util;

// jemalloc：多线程比对场景下显著优于默认 allocator
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "vbwt-rust", author, version, about = "Variant-aware BWT read mapper for population reference graphs", arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the PRG index and the kmer index
    Build {
        /// PRG text file (ACGT plus numeric variant markers)
        #[arg(long)]
        prg: String,
        /// Output directory for index artifacts
        #[arg(short, long, default_value = "prg_index")]
        output: String,
        #[arg(long = "kmer-size", default_value_t = 15)]
        kmer_size: usize,
        #[arg(long = "max-read-size", default_value_t = 150)]
        max_read_size: usize,
        /// Index every kmer over {A,C,G,T}^K instead of PRG-guided enumeration
        #[arg(long = "all-kmers", default_value_t = false)]
        all_kmers: bool,
    },
    /// Map reads (FASTQ) against a built index and report coverage
    Map {
        /// Index directory produced by `build`
        #[arg(short = 'i', long = "index")]
        index: String,
        /// Reads FASTQ file
        reads: String,
        /// Output coverage JSON path (stdout if omitted)
        #[arg(short, long)]
        out: Option<String>,
        #[arg(short = 't', long = "threads", default_value_t = 1)]
        threads: usize,
        /// Per-base counter width in bits (8, 16 or 32); counters saturate
        #[arg(long = "counter-width", default_value_t = 16)]
        counter_width: u32,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            prg,
            output,
            kmer_size,
            max_read_size,
            all_kmers,
        } => run_build(&prg, &output, kmer_size, max_read_size, all_kmers),
        Commands::Map {
            index,
            reads,
            out,
            threads,
            counter_width,
        } => {
            let opt = quasimap::MapOpt {
                threads,
                counter_width,
            };
            run_map(&index, &reads, out.as_deref(), &opt)
        }
    }
}

fn run_build(
    prg_path: &str,
    output: &str,
    kmer_size: usize,
    max_read_size: usize,
    all_kmers: bool,
) -> Result<()> {
    if kmer_size == 0 {
        anyhow::bail!("kmer size must be at least 1");
    }
    if max_read_size < kmer_size {
        anyhow::bail!(
            "max read size {} is smaller than kmer size {}",
            max_read_size,
            kmer_size
        );
    }

    let encoded_prg = prg::parse_prg_file(prg_path)?;
    println!("prg: {}", prg_path);
    println!("symbols: {}", encoded_prg.len());
    println!("sites: {}", prg::number_of_sites(prg::max_alphabet_num(&encoded_prg)));

    let meta = index::IndexMeta {
        prg_file: Some(prg_path.to_string()),
        build_args: Some(std::env::args().collect::<Vec<_>>().join(" ")),
        build_timestamp: Some(chrono::Utc::now().to_rfc3339()),
        kmer_size: kmer_size as u32,
        max_read_size: max_read_size as u32,
        all_kmers,
    };

    let idx = index::PrgIndex::build(encoded_prg, meta)?;
    idx.save_to_dir(output)?;

    let kmer_index = kmer::KmerIndex::build(kmer_size, max_read_size, all_kmers, &idx);
    let kmer_index_path = std::path::Path::new(output).join(index::KMER_INDEX_FILE);
    kmer_index.save_to_file(kmer_index_path.to_str().unwrap())?;

    println!("kmers: {}", kmer_index.len());
    println!("index saved: {}", output);
    Ok(())
}

fn run_map(
    index_dir: &str,
    reads_path: &str,
    out_path: Option<&str>,
    opt: &quasimap::MapOpt,
) -> Result<()> {
    let report = quasimap::run_quasimap(index_dir, reads_path, out_path, opt)?;
    println!("reads: {}", report.reads_processed);
    println!("mapped: {}", report.reads_mapped);
    Ok(())
}
