//! Slice Packing
//!
//! Converts grayscale slice images into `[1, H, W]` tensor blobs with values
//! in [0, 1], ready to be paired by the data module. File stems are kept, so
//! `sub-01_T1w.png` becomes `sub-01_T1w.mpk`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin pack -- --input slices/T1 --output data/T1
//!
//! # Resize every slice to 256x256 and descend into subdirectories
//! cargo run --bin pack -- --input slices/T2 --output data/T2 --width 256 --height 256 --recursive
//! ```

use std::{collections::HashMap, path::PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use pairprep::io::{save_blob, BLOB_EXTENSION};
use pairprep_tools::{
    common::{image::is_slice_image, image::load_slice, init_tracing},
    create_device, SelectedBackend,
};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the slice images
    #[arg(long)]
    input: PathBuf,

    /// Directory the blobs are written to
    #[arg(long)]
    output: PathBuf,

    /// Resize width, requires --height
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Resize height, requires --width
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Descend into subdirectories of the input
    #[arg(long)]
    recursive: bool,

    /// Replace blobs that already exist
    #[arg(long)]
    overwrite: bool,
}

fn main() -> Result<()> {
    init_tracing("pack");
    let args = Args::parse();

    ensure!(
        args.input.is_dir(),
        "Input directory does not exist: {}",
        args.input.display()
    );
    std::fs::create_dir_all(&args.output).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            args.output.display()
        )
    })?;

    let size = args.width.zip(args.height);
    let slices = collect_slices(&args)?;
    ensure!(
        !slices.is_empty(),
        "No slice images found in {}",
        args.input.display()
    );

    let device = create_device();
    let mut written = 0usize;
    let mut skipped = 0usize;
    for (input, output) in &slices {
        if output.exists() && !args.overwrite {
            tracing::warn!(path = %output.display(), "blob exists, skipping");
            skipped += 1;
            continue;
        }
        let tensor = load_slice::<SelectedBackend>(input, size, &device)?;
        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            shape = ?tensor.dims(),
            "packing slice"
        );
        save_blob(tensor, output)
            .with_context(|| format!("Failed to pack {}", input.display()))?;
        written += 1;
    }

    println!(
        "Packed {written} slices into {} ({skipped} skipped)",
        args.output.display()
    );
    Ok(())
}

/// Pairs every slice image with its blob path, rejecting stems that collide.
fn collect_slices(args: &Args) -> Result<Vec<(PathBuf, PathBuf)>> {
    let max_depth = if args.recursive { usize::MAX } else { 1 };
    let mut by_output: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut slices = Vec::new();

    for entry in WalkDir::new(&args.input)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("Failed to read directory: {}", args.input.display()))?;
        if !entry.file_type().is_file() || !is_slice_image(entry.path()) {
            continue;
        }
        let stem = entry
            .path()
            .file_stem()
            .with_context(|| format!("File has no name: {}", entry.path().display()))?;
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(BLOB_EXTENSION);
        let output = args.output.join(file_name);
        if let Some(previous) = by_output.insert(output.clone(), entry.path().to_path_buf()) {
            anyhow::bail!(
                "{} and {} would both be packed into {}",
                previous.display(),
                entry.path().display(),
                output.display()
            );
        }
        slices.push((entry.into_path(), output));
    }
    Ok(slices)
}
