//! Error types for the pairprep crate.
//!
//! Every fallible operation of the dataset pipeline reports through
//! [`DatasetError`]. Nothing is retried or skipped internally: a sample that
//! fails to load fails the batch that requested it.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

/// Error type for dataset, augmentation and split operations.
///
/// Cloneable so failed samples can travel through Burn's data loaders as
/// `Result` items; IO causes are shared behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum DatasetError {
    /// The T2 partner derived from a T1 path does not exist on disk.
    #[error("Missing partner file for {primary}: expected {partner}")]
    MissingPartnerFile {
        /// The T1 file the partner was derived from.
        primary: PathBuf,
        /// The derived T2 path.
        partner: PathBuf,
    },

    /// The crop window does not fit inside the image.
    #[error(
        "Crop {crop_width}x{crop_height} at ({left}, {top}) does not fit image {image_width}x{image_height}"
    )]
    InvalidCrop {
        /// Crop width.
        crop_width: usize,
        /// Crop height.
        crop_height: usize,
        /// Left offset of the crop window.
        left: usize,
        /// Top offset of the crop window.
        top: usize,
        /// Image width the crop was checked against.
        image_width: usize,
        /// Image height the crop was checked against.
        image_height: usize,
    },

    /// The frozen noise tensor and the image disagree in shape.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Shape of the frozen noise tensor.
        expected: Vec<usize>,
        /// Shape of the image it was applied to.
        actual: Vec<usize>,
    },

    /// No tensor blobs were found in a source directory.
    #[error("No tensor blobs found in: {path}")]
    EmptySource {
        /// The directory that was enumerated.
        path: PathBuf,
    },

    /// A sample index beyond the addressable size was requested.
    #[error("Index {index} out of range for dataset of size {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The dataset size.
        len: usize,
    },

    /// A tensor blob could not be read.
    #[error("Failed to load tensor {path}: {reason}")]
    TensorLoad {
        /// The blob path.
        path: PathBuf,
        /// The recorder failure.
        reason: String,
    },

    /// A tensor blob could not be written.
    #[error("Failed to save tensor {path}: {reason}")]
    TensorSave {
        /// The blob path.
        path: PathBuf,
        /// The recorder failure.
        reason: String,
    },

    /// Reading a directory failed.
    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        /// The directory path that failed to read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Moving a fixture file failed.
    #[error("Failed to move {from} to {to}")]
    FixtureMoveFailed {
        /// Source file.
        from: PathBuf,
        /// Destination file.
        to: PathBuf,
        /// The underlying IO error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The pairing sanity check rejected a fixture directory pair.
    #[error("Sanity check failed: {reason}")]
    SanityCheckFailed {
        /// What the check found.
        reason: String,
    },

    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// A partition was requested before `setup` ran.
    #[error("Data module is not set up; call setup() before requesting the {partition} partition")]
    NotReady {
        /// The partition that was requested.
        partition: &'static str,
    },

    /// A file has no filename component.
    #[error("File has no filename: {path}")]
    NoFileName {
        /// The file path without a filename.
        path: PathBuf,
    },

    /// Path components contain invalid UTF-8.
    #[error("Path contains invalid UTF-8: {path}")]
    InvalidUtf8Path {
        /// The path with invalid UTF-8.
        path: PathBuf,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
