//! Command line tools around the pairprep crate.
//!
//! ## Available tools
//!
//! - `inspect`: run the train/validation/test split and report partition sizes and batch statistics
//! - `fixture`: move a held-out test fixture out of the source directories
//! - `pack`: convert grayscale slice images into tensor blobs
//!
//! ## Usage
//!
//! ```bash
//! # Convert PNG slices into blobs
//! cargo run --bin pack -- --input slices/T1 --output data/T1
//!
//! # Inspect the split of a dataset
//! cargo run --bin inspect -- --t1-dir data/T1 --t2-dir data/T2 --json
//!
//! # Materialize a held-out fixture
//! cargo run --bin fixture -- --source-t1 data/T1 --source-t2 data/T2 \
//!     --dest-t1 fixture/T1 --dest-t2 fixture/T2 --fraction 0.09
//! ```

pub mod common;

pub use common::{create_device, init_tracing, SelectedBackend, SelectedDevice, BACKEND_NAME};
