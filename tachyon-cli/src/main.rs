//! Command-line front end for the tachyon storage engine (spec §6's external
//! interfaces, wired to a concrete VCF library at the CLI edge). Two
//! subcommands: `build` ingests an external VCF into an archive, `query`
//! opens an archive back up and either streams it sequentially or filters it
//! to a genomic interval (spec §6 "Reader block-settings").

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tachyon_core::vcf::noodles_adapter;
use tachyon_core::{
    err, Archive, ByteCodec, Config, Deflate, ErrorKind, FieldSelection, FileReader, FileWriter,
    GenotypeSummary, Keychain, Result, Schema,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "tachyon", about = "Columnar storage engine for cohort-scale variant-call data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a VCF file into a tachyon archive.
    Build {
        /// Path to the input VCF.
        #[arg(long)]
        input: PathBuf,
        /// Output path prefix; writes `<prefix>.tyx` (and `<prefix>.key` if encrypted).
        #[arg(long)]
        output: PathBuf,
        /// Load configuration overrides from a JSON file (spec §6 "Configuration (builder)").
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        no_permute_genotypes: bool,
        #[arg(long)]
        encrypt_data: bool,
        #[arg(long)]
        checkpoint_n_variants: Option<u32>,
        #[arg(long)]
        checkpoint_bases: Option<i64>,
        #[arg(long)]
        worker_threads: Option<usize>,
        #[arg(long)]
        compression_level: Option<u32>,
    },
    /// Read an archive back, optionally restricted to a genomic interval.
    Query {
        /// Path to the `.tyx` archive.
        #[arg(long)]
        archive: PathBuf,
        /// Matching `.key` keychain file, required if the archive was encrypted.
        #[arg(long)]
        keychain: Option<PathBuf>,
        /// Interval filter: `CONTIG`, `CONTIG:POS`, or `CONTIG:FROM-TO` (spec §6).
        #[arg(long)]
        region: Option<String>,
        /// Print per-sample genotype summaries instead of individual records.
        #[arg(long)]
        summarize: bool,
        #[arg(long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Build { verbose, .. } => *verbose,
        Command::Query { verbose, .. } => *verbose,
    };
    install_logging(verbose);

    let result = match cli.command {
        Command::Build {
            input,
            output,
            config,
            verbose: _,
            no_permute_genotypes,
            encrypt_data,
            checkpoint_n_variants,
            checkpoint_bases,
            worker_threads,
            compression_level,
        } => run_build(BuildArgs {
            input,
            output,
            config,
            no_permute_genotypes,
            encrypt_data,
            checkpoint_n_variants,
            checkpoint_bases,
            worker_threads,
            compression_level,
        }),
        Command::Query {
            archive,
            keychain,
            region,
            summarize,
            verbose: _,
        } => run_query(archive, keychain, region, summarize),
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

/// Installs `env_logger` as the `tracing`/`log` sink (SPEC_FULL §10.2): the
/// `verbose` flag raises the default filter from `warn` to `debug`, mirroring
/// the builder config field of the same name.
fn install_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

struct BuildArgs {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    no_permute_genotypes: bool,
    encrypt_data: bool,
    checkpoint_n_variants: Option<u32>,
    checkpoint_bases: Option<i64>,
    worker_threads: Option<usize>,
    compression_level: Option<u32>,
}

fn run_build(args: BuildArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| err(ErrorKind::Io, format!("reading config {}: {e}", path.display())))?;
            serde_json::from_str(&text)
                .map_err(|e| err(ErrorKind::InputMalformed, format!("parsing config: {e}")))?
        }
        None => Config::default(),
    };
    config.input_path = args.input.clone();
    config.output_prefix = args.output.clone();
    if args.no_permute_genotypes {
        config.permute_genotypes = false;
    }
    if args.encrypt_data {
        config.encrypt_data = true;
    }
    if let Some(n) = args.checkpoint_n_variants {
        config.checkpoint_n_variants = n;
    }
    if let Some(n) = args.checkpoint_bases {
        config.checkpoint_bases = n;
    }
    if let Some(n) = args.worker_threads {
        config.worker_threads = n;
    }
    if let Some(l) = args.compression_level {
        config.compression_level = l;
    }
    config.validate()?;

    let mut vcf_reader = noodles::vcf::io::reader::Builder::default()
        .build_from_path(&config.input_path)
        .map_err(|e| err(ErrorKind::Io, format!("opening {}: {e}", config.input_path.display())))?;
    let header = vcf_reader
        .read_header()
        .map_err(|e| err(ErrorKind::InputMalformed, format!("reading VCF header: {e}")))?;
    let schema = noodles_adapter::Header(&header).to_schema();

    let keychain = if config.encrypt_data { Some(Keychain::new()) } else { None };

    let codec: Box<dyn ByteCodec> = Box::new(Deflate);
    let archive_path = with_extension(&config.output_prefix, "tyx");
    let mut sink =
        FileWriter::create_new(&archive_path).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
    tachyon_core::write_archive_header(&mut sink, &schema, codec.as_ref(), config.compression_level)?;

    let writer = tachyon_core::Writer::new(sink, codec, config.compression_level);
    let records = vcf_reader.records().map(|r| {
        r.map(|record| noodles_adapter::Record { header: &header, record })
            .map_err(|e| err(ErrorKind::InputMalformed, format!("reading VCF record: {e}")))
    });

    let stats = tachyon_core::run_pipeline(records, &schema, &config, &Deflate, keychain.as_ref(), &writer)?;
    let (mut sink, index, checksums, end) = writer.finish()?;
    tachyon_core::write_eof_region(&mut sink, &index, &checksums, end)?;

    if let Some(keychain) = keychain {
        let key_path = with_extension(&config.output_prefix, "key");
        let mut key_sink =
            FileWriter::create_new(&key_path).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        keychain.write(&mut key_sink)?;
        info!(target: "tachyon::progress", path = %key_path.display(), "wrote keychain");
    }

    info!(
        target: "tachyon::progress",
        blocks = stats.n_blocks,
        records = stats.n_records_loaded,
        archive = %archive_path.display(),
        "build complete",
    );
    println!(
        "wrote {} ({} blocks, {} records)",
        archive_path.display(),
        stats.n_blocks,
        stats.n_records_loaded
    );
    Ok(())
}

fn with_extension(prefix: &std::path::Path, ext: &str) -> PathBuf {
    let mut path = prefix.to_path_buf();
    path.set_extension(ext);
    path
}

fn run_query(
    archive_path: PathBuf,
    keychain_path: Option<PathBuf>,
    region: Option<String>,
    summarize: bool,
) -> Result<()> {
    let keychain = match keychain_path {
        Some(path) => {
            let mut r = FileReader::open_existing(&path).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
            Some(Keychain::read(&mut r)?)
        }
        None => None,
    };

    let source =
        FileReader::open_existing(&archive_path).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
    let mut archive = Archive::open(source, keychain)?;

    let blocks = match &region {
        Some(region) => {
            let (contig, p0, p1) = parse_region(archive.schema(), region)?;
            archive.seek_to_overlap(contig, p0, p1, &FieldSelection::All)?
        }
        None => {
            let mut out = Vec::new();
            while let Some(block) = archive.next_block(&FieldSelection::All)? {
                out.push(block);
            }
            out
        }
    };

    if summarize {
        let n_samples = archive.schema().sample_count();
        let mut summaries = vec![GenotypeSummary::new(); n_samples];
        let mut n_variants = 0u64;
        for block in &blocks {
            let variants = block.materialize_variants()?;
            n_variants += variants.len() as u64;
            for variant in &variants {
                let Some(genotypes) = &variant.genotypes else { continue };
                for (sample, gt) in genotypes.iter().enumerate() {
                    summaries[sample].accumulate(gt);
                }
            }
        }
        println!("{n_variants} variants across {} blocks", blocks.len());
        for (sample, summary) in archive.schema().samples.iter().zip(summaries.iter()) {
            println!(
                "  {sample}: ref={} het={} alt_hom={} missing={}",
                summary.ref_count, summary.het_count, summary.alt_hom_count, summary.missing_count
            );
        }
    } else {
        for block in &blocks {
            for variant in block.materialize_variants()? {
                let contig_name = archive
                    .schema()
                    .contigs
                    .iter()
                    .find(|c| c.external_index as i32 == variant.contig_id)
                    .map(|c| c.name.as_str())
                    .unwrap_or("?");
                println!(
                    "{contig_name}\t{}\t{}\t{}",
                    variant.position + 1,
                    variant.alleles.first().map(String::as_str).unwrap_or("."),
                    variant.alleles[1..].join(",")
                );
            }
        }
    }
    Ok(())
}

/// Parses `CONTIG`, `CONTIG:POS`, or `CONTIG:FROM-TO` (spec §6 "Reader
/// block-settings"), ignoring whitespace and auto-swapping an inverted range.
fn parse_region(schema: &Schema, raw: &str) -> Result<(i32, i64, i64)> {
    let raw: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parts = raw.splitn(2, ':');
    let contig_name = parts.next().unwrap_or_default();
    let contig = schema
        .contigs
        .iter()
        .find(|c| c.name == contig_name)
        .map(|c| c.external_index as i32)
        .ok_or_else(|| err(ErrorKind::InputMalformed, format!("unknown contig {contig_name:?}")))?;

    let (p0, p1) = match parts.next() {
        None => (0, i64::MAX),
        Some(range) => match range.split_once('-') {
            Some((a, b)) => {
                let a = parse_position(a)?;
                let b = parse_position(b)?;
                if a <= b {
                    (a, b)
                } else {
                    (b, a)
                }
            }
            None => {
                let p = parse_position(range)?;
                (p, p)
            }
        },
    };
    Ok((contig, p0, p1))
}

fn parse_position(s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map(|p| p - 1)
        .map_err(|_| err(ErrorKind::InputMalformed, format!("invalid position {s:?}")))
}

