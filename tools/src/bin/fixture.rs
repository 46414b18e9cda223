//! Held-out Fixture
//!
//! Moves a random fraction of T1/T2 pairs out of the source directories into
//! a fixture directory pair, unless the fixture already holds files, and
//! reports what the fixture serves.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin fixture -- --source-t1 data/T1 --source-t2 data/T2 \
//!     --dest-t1 fixture/T1 --dest-t2 fixture/T2 --fraction 0.09 --seed 7
//! ```

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use burn::data::dataset::Dataset;
use clap::Parser;
use pairprep::{ModalityDirs, PairedSource, PairedTestSet};
use pairprep_tools::{common::init_tracing, create_device, SelectedBackend};
use rand::{rngs::StdRng, SeedableRng};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    source_t1: PathBuf,

    #[arg(long)]
    source_t2: PathBuf,

    #[arg(long)]
    dest_t1: PathBuf,

    #[arg(long)]
    dest_t2: PathBuf,

    /// Fraction of the source T1 files to move
    #[arg(long, default_value = "0.09")]
    fraction: f64,

    /// Seed of the file selection; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// List the files the fixture serves
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    init_tracing("fixture");
    let args = Args::parse();

    ensure!(
        (0.0..=1.0).contains(&args.fraction),
        "Fraction must be within [0, 1], got {}",
        args.fraction
    );
    for dir in [&args.source_t1, &args.source_t2] {
        ensure!(dir.is_dir(), "Source directory does not exist: {}", dir.display());
    }

    let source = ModalityDirs::new(&args.source_t1, &args.source_t2);
    let dest = ModalityDirs::new(&args.dest_t1, &args.dest_t2);
    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, fraction = args.fraction, "opening test fixture");

    let device = create_device();
    let test_set = PairedTestSet::<SelectedBackend>::open(
        &source,
        &dest,
        args.fraction,
        &mut StdRng::seed_from_u64(seed),
        &device,
    )
    .context("Failed to materialize the test fixture")?;

    println!(
        "Fixture {} / {} serves {} pairs",
        dest.t1.display(),
        dest.t2.display(),
        test_set.len()
    );

    if args.list {
        for index in 0..test_set.len() {
            let item = test_set
                .try_get(index)
                .with_context(|| format!("Failed to load fixture pair {index}"))?;
            println!("  {} <-> {} {:?}", item.t1_name, item.t2_name, item.t1.dims());
        }
    }
    Ok(())
}
