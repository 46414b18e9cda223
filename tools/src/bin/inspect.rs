//! Split Inspection
//!
//! Runs the train/validation/test split of a T1/T2 directory pair, reports
//! partition sizes and pulls a few batches to print tensor statistics.
//!
//! ## Usage
//!
//! ```bash
//! # Inspect with defaults
//! cargo run --bin inspect -- --t1-dir data/T1 --t2-dir data/T2
//!
//! # Load a config file, inspect validation batches, export previews
//! cargo run --bin inspect -- --config datamodule.json --partition validation \
//!     --export-dir previews
//!
//! # Machine readable report
//! cargo run --bin inspect -- --config datamodule.json --json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use pairprep::{DataModuleConfig, PairedBatch, PairedDataModule, Partition};
use pairprep_tools::{
    common::{
        image::tensor_to_image, init_tracing, StatisticsAccumulator, TensorStats, BACKEND_NAME,
    },
    create_device, SelectedBackend,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data module configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// T1 directory, overrides the config
    #[arg(long)]
    t1_dir: Option<PathBuf>,

    /// T2 directory, overrides the config
    #[arg(long)]
    t2_dir: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    num_workers: Option<usize>,

    /// Split seed
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    factor: Option<usize>,

    /// Proportion of augmented training samples
    #[arg(long)]
    augm_prop: Option<f64>,

    /// Partition whose batches are inspected
    #[arg(long, value_enum, default_value_t = PartitionArg::Train)]
    partition: PartitionArg,

    /// Number of batches to pull
    #[arg(long, default_value = "3")]
    max_batches: usize,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Write the first pair of every inspected batch as PNG files here
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PartitionArg {
    Train,
    Validation,
    Test,
}

impl From<PartitionArg> for Partition {
    fn from(arg: PartitionArg) -> Self {
        match arg {
            PartitionArg::Train => Self::Train,
            PartitionArg::Validation => Self::Validation,
            PartitionArg::Test => Self::Test,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    backend: &'static str,
    t1_dir: PathBuf,
    t2_dir: PathBuf,
    seed: u64,
    partitions: Vec<PartitionReport>,
    inspected: String,
    batches: Vec<BatchReport>,
    t1_summary: StatisticsAccumulator,
    t2_summary: StatisticsAccumulator,
}

#[derive(Debug, Serialize)]
struct PartitionReport {
    partition: String,
    pairs: usize,
    samples: usize,
    augmented: usize,
    batches: usize,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    index: usize,
    shape: [usize; 4],
    t1: TensorStats,
    t2: TensorStats,
    t1_names: Vec<String>,
}

fn main() -> Result<()> {
    init_tracing("inspect");
    let args = Args::parse();

    let config = load_config(&args)?;
    let device = create_device();
    tracing::info!(backend = BACKEND_NAME, "using backend");

    let mut module = PairedDataModule::<SelectedBackend>::new(config, &device)
        .context("Invalid data module configuration")?;
    module.setup().context("Failed to set up the data module")?;

    let mut partitions = Vec::new();
    for partition in [Partition::Train, Partition::Validation, Partition::Test] {
        let dataset = module.dataset(partition)?;
        let loader = module.loader(partition)?;
        partitions.push(PartitionReport {
            partition: partition.to_string(),
            pairs: dataset.num_files(),
            samples: loader.num_items(),
            augmented: dataset.num_augmented(),
            batches: loader.num_batches(),
        });
    }

    if let Some(dir) = &args.export_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;
    }

    let inspected = Partition::from(args.partition);
    let loader = module.loader(inspected)?;
    let mut batches = Vec::new();
    let mut t1_summary = StatisticsAccumulator::new();
    let mut t2_summary = StatisticsAccumulator::new();
    for (index, batch) in loader.iter().take(args.max_batches).enumerate() {
        let batch = batch.with_context(|| format!("Failed to load batch {index}"))?;
        if let Some(dir) = &args.export_dir {
            export_first_pair(&batch, index, dir)?;
        }
        let report = BatchReport {
            index,
            shape: batch.t1.dims(),
            t1: TensorStats::of(batch.t1),
            t2: TensorStats::of(batch.t2),
            t1_names: batch.t1_names,
        };
        t1_summary.add(report.t1);
        t2_summary.add(report.t2);
        batches.push(report);
    }

    let config = module.config();
    let report = Report {
        backend: BACKEND_NAME,
        t1_dir: config.t1_dir.clone(),
        t2_dir: config.t2_dir.clone(),
        seed: config.seed,
        partitions,
        inspected: inspected.to_string(),
        batches,
        t1_summary,
        t2_summary,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Config file first, then command line overrides.
fn load_config(args: &Args) -> Result<DataModuleConfig> {
    let mut config = if let Some(config_path) = &args.config {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str::<DataModuleConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        let (Some(t1_dir), Some(t2_dir)) = (&args.t1_dir, &args.t2_dir) else {
            anyhow::bail!("Either --config or both --t1-dir and --t2-dir are required");
        };
        DataModuleConfig::new(t1_dir.clone(), t2_dir.clone())
    };

    if let Some(t1_dir) = &args.t1_dir {
        config.t1_dir = t1_dir.clone();
    }
    if let Some(t2_dir) = &args.t2_dir {
        config.t2_dir = t2_dir.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(num_workers) = args.num_workers {
        config.num_workers = num_workers;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(factor) = args.factor {
        config.factor = factor;
    }
    if args.augm_prop.is_some() {
        config.augm_prop = args.augm_prop;
    }

    ensure!(
        config.t1_dir.is_dir(),
        "T1 directory does not exist: {}",
        config.t1_dir.display()
    );
    ensure!(
        config.t2_dir.is_dir(),
        "T2 directory does not exist: {}",
        config.t2_dir.display()
    );
    Ok(config)
}

fn export_first_pair(
    batch: &PairedBatch<SelectedBackend>,
    index: usize,
    dir: &Path,
) -> Result<()> {
    for (tensor, names) in [(&batch.t1, &batch.t1_names), (&batch.t2, &batch.t2_names)] {
        let Some(name) = names.first() else {
            continue;
        };
        let first = tensor.clone().slice([0..1]).squeeze::<3>(0);
        let stem = Path::new(name)
            .file_stem()
            .map_or_else(|| name.clone(), |s| s.to_string_lossy().into_owned());
        let path = dir.join(format!("{index:03}_{stem}.png"));
        tensor_to_image(first)?
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "exported preview");
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("Backend: {}", report.backend);
    println!("T1 directory: {}", report.t1_dir.display());
    println!("T2 directory: {}", report.t2_dir.display());
    println!("Split seed: {}", report.seed);

    println!("\n=== Partitions ===");
    for partition in &report.partitions {
        println!(
            "{:<10} pairs={:<6} samples={:<6} augmented={:<6} batches={}",
            partition.partition,
            partition.pairs,
            partition.samples,
            partition.augmented,
            partition.batches
        );
    }

    println!("\n=== Batches ({}) ===", report.inspected);
    for batch in &report.batches {
        println!("Batch {}: shape {:?}", batch.index, batch.shape);
        println!(
            "  T1 stats: min={:.4}, max={:.4}, mean={:.4}",
            batch.t1.min, batch.t1.max, batch.t1.mean
        );
        println!(
            "  T2 stats: min={:.4}, max={:.4}, mean={:.4}",
            batch.t2.min, batch.t2.max, batch.t2.mean
        );
        println!("  Files: {}", batch.t1_names.join(", "));
    }

    for (label, summary) in [("T1", &report.t1_summary), ("T2", &report.t2_summary)] {
        if summary.count > 0 {
            println!(
                "{label} across {} batches: min={:.4}, max={:.4}, mean of means={:.4}",
                summary.count,
                summary.min,
                summary.max,
                summary.avg_mean()
            );
        }
    }
}
