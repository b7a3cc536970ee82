use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rayon::prelude::*;
use tracing::{info, warn};

use modasm_lib::assembly::{assemble, assemble_seeds, Seed};
use modasm_lib::builder::{build_reference, parse_batches, HasherConfig, ModsetBuilder, ReadsetBuilder};
use modasm_lib::classify::{mark_bad_reads, mark_contained};
use modasm_lib::overlap::{find_all_overlaps, find_overlaps, write_pair_details, OverlapScratch};
use modasm_lib::reference::{QueryMap, RefMap};
use modasm_lib::{
    AssemblyConfig, ClassifierConfig, CopyThresholds, MappingConfig, Modset, OverlapConfig, Readset,
    RunContext,
};

#[derive(Parser)]
#[command(name = "modasm")]
#[command(version = "0.1.0")]
#[command(about = "Modimizer read overlaps and draft layout for long reads", long_about = None)]
struct Cli {
    /// Report output ("-" for standard output)
    #[arg(short, long, global = true, default_value = "-")]
    output: PathBuf,

    /// Number of threads (0 = all available cores)
    #[arg(short = 't', long, global = true, default_value = "0")]
    threads: usize,

    /// More detail in reports (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and maintain fingerprint indexes
    #[command(subcommand)]
    Index(IndexCommand),

    /// Build and inspect read sets
    #[command(subcommand)]
    Readset(ReadsetCommand),

    /// Report overlaps of reads in a read set
    Overlaps {
        /// Read set prefix
        root: PathBuf,

        /// Only this read
        #[arg(long)]
        read: Option<u32>,

        /// Shared fingerprints of two reads
        #[arg(long, num_args = 2, value_names = ["X", "Y"])]
        pair: Option<Vec<u32>>,

        #[command(flatten)]
        overlap: OverlapArgs,
    },

    /// Flag bad and contained reads and save the read set
    Mark {
        /// Read set prefix
        root: PathBuf,

        /// Save to this prefix instead of overwriting
        #[arg(long)]
        save: Option<PathBuf>,

        /// Skip the containment pass
        #[arg(long, default_value = "false")]
        no_contained: bool,

        #[command(flatten)]
        overlap: OverlapArgs,

        #[command(flatten)]
        classifier: ClassifierArgs,
    },

    /// Lay reads out along paths from seed reads or fingerprints
    Assemble {
        /// Read set prefix
        root: PathBuf,

        /// Seed from the first single-copy fingerprint of these reads
        #[arg(long = "read")]
        reads: Vec<u32>,

        /// Seed from these single-copy fingerprints
        #[arg(long = "fingerprint")]
        fingerprints: Vec<u32>,

        /// Only walk forward from each seed
        #[arg(long, default_value = "false")]
        one_way: bool,

        #[command(flatten)]
        assembly: AssemblyArgs,
    },

    /// Map query sequences to a reference map
    Map {
        /// Reference map prefix
        root: PathBuf,

        /// Query FASTA/FASTQ files
        #[arg(required = true)]
        queries: Vec<PathBuf>,

        /// Records sampled together
        #[arg(long, default_value = "1024")]
        batch_size: usize,

        #[command(flatten)]
        mapping: MappingArgs,
    },
}

#[derive(Subcommand)]
enum IndexCommand {
    /// Build an index from sequence files
    Build {
        /// Output prefix
        root: PathBuf,

        /// Input FASTA/FASTQ files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        hash: HashArgs,
    },

    /// Merge indexes built with the same parameters
    Merge {
        /// Output prefix
        root: PathBuf,

        /// Input index prefixes
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
    },

    /// Keep only entries with min <= depth < max
    Prune {
        /// Index prefix
        root: PathBuf,

        /// Minimum depth kept
        #[arg(long, default_value = "1")]
        min_depth: u32,

        /// Depth at which entries are dropped (0 = no limit)
        #[arg(long, default_value = "0")]
        max_depth: u32,

        /// Save to this prefix instead of overwriting
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Assign copy numbers from depth
    SetCopy {
        /// Index prefix
        root: PathBuf,

        /// Only set copy M on entries at least this deep
        #[arg(long)]
        multi_above: Option<u32>,

        #[command(flatten)]
        copy: CopyArgs,

        /// Save to this prefix instead of overwriting
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Write the depth histogram
    Hist {
        /// Index prefix
        root: PathBuf,
    },

    /// Write each entry's depth here and in other indexes
    Depths {
        /// Index prefix
        root: PathBuf,

        /// Other index prefixes
        others: Vec<PathBuf>,
    },

    /// Place reference sequences on an index
    Reference {
        /// Index prefix
        root: PathBuf,

        /// Reference FASTA files
        #[arg(required = true)]
        fasta: Vec<PathBuf>,

        /// Skip reference fingerprints missing from the index
        #[arg(long, default_value = "false")]
        no_insert: bool,

        /// Save to this prefix instead of the index prefix
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ReadsetCommand {
    /// Sample reads against an index
    Build {
        /// Index prefix
        index: PathBuf,

        /// Read FASTA/FASTQ files
        #[arg(required = true)]
        reads: Vec<PathBuf>,

        /// Output prefix (defaults to the index prefix)
        #[arg(long)]
        save: Option<PathBuf>,

        /// Keep the index copy numbers instead of recomputing them from read depth
        #[arg(long, default_value = "false")]
        keep_copy: bool,

        #[command(flatten)]
        copy: CopyArgs,

        /// Records sampled together
        #[arg(long, default_value = "4096")]
        batch_size: usize,
    },

    /// Write read and fingerprint statistics
    Stats {
        /// Read set prefix
        root: PathBuf,
    },
}

#[derive(Args)]
struct HashArgs {
    /// K-mer length
    #[arg(short, long, default_value = "19")]
    k: usize,

    /// Sampling modulus
    #[arg(short, long, default_value = "31")]
    w: usize,

    /// Hash seed
    #[arg(long, default_value = "17")]
    seed: u64,

    /// log2 of the table size
    #[arg(long, default_value = "28")]
    table_bits: u32,

    /// Maximum number of entries (0 = default for the table size)
    #[arg(long, default_value = "0")]
    capacity: u32,

    /// Records sampled together
    #[arg(long, default_value = "4096")]
    batch_size: usize,
}

#[derive(Args)]
struct CopyArgs {
    /// Depth below this is copy 0
    #[arg(long, default_value = "10")]
    copy1_min: u32,

    /// Depth below this is copy 1
    #[arg(long, default_value = "50")]
    copy2_min: u32,

    /// Depth below this is copy 2, at or above copy M
    #[arg(long, default_value = "100")]
    copy_m_min: u32,
}

impl CopyArgs {
    fn thresholds(&self) -> Result<CopyThresholds> {
        CopyThresholds::new(self.copy1_min, self.copy2_min, self.copy_m_min).map_err(|e| anyhow!(e))
    }
}

#[derive(Args)]
struct OverlapArgs {
    /// Shared single-copy hits needed for an overlap
    #[arg(long, default_value = "3")]
    min_shared_hits: u32,

    /// Reads with fewer hits are flagged LOW_HIT
    #[arg(long, default_value = "10")]
    low_hit_threshold: u32,

    /// Reads with fewer single-copy hits are flagged LOW_COPY1
    #[arg(long, default_value = "10")]
    low_copy1_threshold: u32,
}

impl OverlapArgs {
    fn config(&self) -> Result<OverlapConfig> {
        let config = OverlapConfig {
            min_shared_hits: self.min_shared_hits,
            low_hit_threshold: self.low_hit_threshold,
            low_copy1_threshold: self.low_copy1_threshold,
        };
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

#[derive(Args)]
struct ClassifierArgs {
    /// Bad overlaps that condemn a read on their own
    #[arg(long, default_value = "10")]
    decisive_bad_overlaps: u32,

    /// Bad overlaps flagged in the second pass
    #[arg(long, default_value = "2")]
    multiple_bad_overlaps: u32,

    /// Bad partners remembered per read
    #[arg(long, default_value = "10")]
    max_bad_partners: usize,
}

impl ClassifierArgs {
    fn config(&self) -> Result<ClassifierConfig> {
        let config = ClassifierConfig {
            decisive_bad_overlaps: self.decisive_bad_overlaps,
            multiple_bad_overlaps: self.multiple_bad_overlaps,
            max_bad_partners: self.max_bad_partners,
        };
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

#[derive(Args)]
struct AssemblyArgs {
    /// Fraction of active reads the next node needs
    #[arg(long, default_value = "0.5")]
    majority_fraction: f64,

    /// Spread of step distances tolerated before a warning
    #[arg(long, default_value = "20")]
    distance_tolerance: u32,

    /// Hits a read may skip to rejoin the path
    #[arg(long, default_value = "3")]
    lookahead: usize,

    /// Disagreements before a read leaves the walk
    #[arg(long, default_value = "2")]
    max_misses: u32,

    /// Do not add reads met along the path
    #[arg(long, default_value = "false")]
    no_new_reads: bool,

    /// Upper bound on path length
    #[arg(long, default_value = "1000000")]
    max_steps: usize,
}

impl AssemblyArgs {
    fn config(&self) -> Result<AssemblyConfig> {
        let config = AssemblyConfig {
            majority_fraction: self.majority_fraction,
            distance_tolerance: self.distance_tolerance,
            lookahead: self.lookahead,
            max_misses: self.max_misses,
            admit_new_reads: !self.no_new_reads,
            max_steps: self.max_steps,
        };
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

#[derive(Args)]
struct MappingArgs {
    /// Slot drift that ends a block
    #[arg(long, default_value = "50")]
    max_block_drift: u32,

    /// Single-copy hits a block must exceed to be reported
    #[arg(long, default_value = "2")]
    min_block_copy1: u32,
}

impl MappingArgs {
    fn config(&self) -> Result<MappingConfig> {
        let config = MappingConfig {
            max_block_drift: self.max_block_drift,
            min_block_copy1: self.min_block_copy1,
        };
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut ctx = RunContext::new(&cli.output, cli.verbose, cli.threads)
        .with_context(|| format!("Failed to open output {}", cli.output.display()))?;

    match cli.command {
        Commands::Index(cmd) => index_command(cmd, &mut ctx)?,
        Commands::Readset(cmd) => readset_command(cmd, &mut ctx)?,
        Commands::Overlaps { root, read, pair, overlap } => {
            overlaps_command(root, read, pair, overlap, &mut ctx)?;
        }
        Commands::Mark { root, save, no_contained, overlap, classifier } => {
            mark_command(root, save, no_contained, overlap, classifier, &ctx)?;
        }
        Commands::Assemble { root, reads, fingerprints, one_way, assembly } => {
            assemble_command(root, reads, fingerprints, one_way, assembly, &mut ctx)?;
        }
        Commands::Map { root, queries, batch_size, mapping } => {
            map_command(root, queries, batch_size, mapping, &mut ctx)?;
        }
    }

    ctx.finish()?;
    Ok(())
}

fn load_modset(root: &PathBuf) -> Result<Modset> {
    let ms = Modset::load(root).with_context(|| format!("Failed to load index {}", root.display()))?;
    info!("{}", ms.summary());
    Ok(ms)
}

fn load_readset(root: &PathBuf) -> Result<Readset> {
    let rs = Readset::load(root).with_context(|| format!("Failed to load read set {}", root.display()))?;
    info!("loaded {} reads from {}", rs.num_reads(), root.display());
    Ok(rs)
}

fn index_command(cmd: IndexCommand, ctx: &mut RunContext) -> Result<()> {
    match cmd {
        IndexCommand::Build { root, inputs, hash } => {
            let config = HasherConfig {
                k: hash.k,
                w: hash.w,
                seed: hash.seed,
                table_bits: hash.table_bits,
                capacity: hash.capacity,
                num_threads: ctx.threads,
                batch_size: hash.batch_size,
            };
            let builder = ModsetBuilder::new(config).map_err(|e| anyhow!(e))?;
            let ms = builder.build_from_files(&inputs)?;
            ms.save(&root)?;
            info!("Index saved to {}", root.display());
        }
        IndexCommand::Merge { root, inputs } => {
            let mut ms = load_modset(&inputs[0])?;
            for path in &inputs[1..] {
                let other = load_modset(path)?;
                ms.merge(&other)
                    .with_context(|| format!("Failed to merge {}", path.display()))?;
            }
            ms.pack();
            info!("{}", ms.summary());
            ms.save(&root)?;
        }
        IndexCommand::Prune { root, min_depth, max_depth, save } => {
            let mut ms = load_modset(&root)?;
            ms.prune(min_depth, max_depth)?;
            ms.pack();
            ms.save(save.as_ref().unwrap_or(&root))?;
        }
        IndexCommand::SetCopy { root, multi_above, copy, save } => {
            let mut ms = load_modset(&root)?;
            match multi_above {
                Some(min_depth) => ms.set_copy_multi_above(min_depth),
                None => {
                    let thresholds = copy.thresholds()?;
                    thresholds.print();
                    ms.set_copy_by_depth(&thresholds);
                }
            }
            info!("{}", ms.summary());
            ms.save(save.as_ref().unwrap_or(&root))?;
        }
        IndexCommand::Hist { root } => {
            let ms = load_modset(&root)?;
            ms.write_histogram(ctx.out())?;
        }
        IndexCommand::Depths { root, others } => {
            let ms = load_modset(&root)?;
            let others = others.iter().map(load_modset).collect::<Result<Vec<_>>>()?;
            for other in &others {
                if !ms.hasher().is_compatible(other.hasher()) {
                    warn!("index sampled with different parameters, depths will not line up");
                }
            }
            ms.write_depth_report(&others, ctx.out())?;
        }
        IndexCommand::Reference { root, fasta, no_insert, save } => {
            let ms = load_modset(&root)?;
            let (refmap, _) = build_reference(ms, !no_insert, &fasta)?;
            refmap.save(save.as_ref().unwrap_or(&root))?;
        }
    }
    Ok(())
}

fn readset_command(cmd: ReadsetCommand, ctx: &mut RunContext) -> Result<()> {
    match cmd {
        ReadsetCommand::Build { index, reads, save, keep_copy, copy, batch_size } => {
            let ms = load_modset(&index)?;
            let config = HasherConfig {
                num_threads: ctx.threads,
                batch_size,
                ..HasherConfig::default()
            };
            let mut builder = ReadsetBuilder::new(config).map_err(|e| anyhow!(e))?;
            if !keep_copy {
                builder = builder.with_copy_thresholds(copy.thresholds()?).map_err(|e| anyhow!(e))?;
            }
            let rs = builder.build_from_files(ms, &reads)?;
            rs.save(save.as_ref().unwrap_or(&index))?;
        }
        ReadsetCommand::Stats { root } => {
            let rs = load_readset(&root)?;
            write!(ctx.out(), "{}", rs.stats())?;
        }
    }
    Ok(())
}

fn overlaps_command(
    root: PathBuf,
    read: Option<u32>,
    pair: Option<Vec<u32>>,
    overlap: OverlapArgs,
    ctx: &mut RunContext,
) -> Result<()> {
    let rs = load_readset(&root)?;
    if let Some(pair) = pair {
        write_pair_details(&rs, pair[0], pair[1], ctx.out())?;
        return Ok(());
    }

    let config = overlap.config()?;
    config.print();
    let level = ctx.verbose.max(1);
    if let Some(ix) = read {
        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, ix, &mut scratch, &config)?;
        report.write(&rs, level.max(2), ctx.out())?;
        return Ok(());
    }

    let reports = ctx.install(|| find_all_overlaps(&rs, &config))??;
    let (mut good, mut bad, mut ambiguous) = (0u64, 0u64, 0u64);
    for report in &reports {
        good += report.n_good as u64;
        bad += report.n_bad as u64;
        ambiguous += report.n_ambiguous as u64;
        report.write(&rs, level, ctx.out())?;
    }
    info!(
        "overlaps over {} reads: {} good, {} bad, {} ambiguous",
        reports.len(),
        good,
        bad,
        ambiguous
    );
    Ok(())
}

fn mark_command(
    root: PathBuf,
    save: Option<PathBuf>,
    no_contained: bool,
    overlap: OverlapArgs,
    classifier: ClassifierArgs,
    ctx: &RunContext,
) -> Result<()> {
    let mut rs = load_readset(&root)?;
    let overlap = overlap.config()?;
    let classifier = classifier.config()?;
    overlap.print();
    classifier.print();

    let pool = ctx.thread_pool()?;
    let summary = pool.install(|| mark_bad_reads(&mut rs, &overlap, &classifier))?;
    info!("MB  {} bad reads of {}", summary.total_bad, rs.num_reads());
    if !no_contained {
        let contained = pool.install(|| mark_contained(&mut rs, &overlap))?;
        info!(
            "MC  {} contained, {} not contained, mean length {:.1}",
            contained.contained, contained.not_contained, contained.mean_len
        );
    }
    rs.save(save.as_ref().unwrap_or(&root))?;
    Ok(())
}

fn assemble_command(
    root: PathBuf,
    reads: Vec<u32>,
    fingerprints: Vec<u32>,
    one_way: bool,
    assembly: AssemblyArgs,
    ctx: &mut RunContext,
) -> Result<()> {
    let seeds: Vec<Seed> = reads
        .into_iter()
        .map(Seed::Read)
        .chain(fingerprints.into_iter().map(Seed::Fingerprint))
        .collect();
    if seeds.is_empty() {
        bail!("no seeds given: use --read or --fingerprint");
    }

    let rs = load_readset(&root)?;
    let config = assembly.config()?;
    config.print();

    let layouts = if one_way {
        ctx.install(|| {
            seeds
                .par_iter()
                .map(|&seed| assemble(&rs, seed, &config))
                .collect::<Result<Vec<_>, _>>()
        })??
    } else {
        ctx.install(|| assemble_seeds(&rs, &seeds, &config))??
    };
    for (seed, layout) in seeds.iter().zip(&layouts) {
        writeln!(ctx.out(), "AS\t{:?}", seed)?;
        layout.write(ctx.out())?;
    }
    Ok(())
}

fn map_command(
    root: PathBuf,
    queries: Vec<PathBuf>,
    batch_size: usize,
    mapping: MappingArgs,
    ctx: &mut RunContext,
) -> Result<()> {
    let config = mapping.config()?;
    config.print();
    let refmap = RefMap::load(&root).with_context(|| format!("Failed to load reference map {}", root.display()))?;
    info!(
        "loaded {} reference sequences, {} slots from {}",
        refmap.names().len(),
        refmap.num_slots(),
        root.display()
    );

    let pool = ctx.thread_pool()?;
    let mut n_queries = 0u64;
    let mut n_blocks = 0u64;
    for path in &queries {
        parse_batches(path, batch_size, |batch| {
            let maps: Vec<QueryMap> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|r| refmap.map_query(&r.codes, &config))
                    .collect()
            });
            for (record, map) in batch.iter().zip(&maps) {
                map.write(record.name(), &refmap, ctx.out())?;
                n_blocks += map.blocks.len() as u64;
            }
            n_queries += batch.len() as u64;
            Ok(())
        })?;
    }
    info!("mapped {} queries, {} blocks", n_queries, n_blocks);
    Ok(())
}
