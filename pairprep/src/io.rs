//! Tensor blob storage and source directory enumeration.
//!
//! A blob is a single rank-3 float tensor `[C, H, W]` written with Burn's
//! named MessagePack recorder at full precision.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::{
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};
use walkdir::WalkDir;

use crate::error::{DatasetError, DatasetResult};

/// File extension of tensor blobs.
pub const BLOB_EXTENSION: &str = "mpk";

/// Recorder used for every blob read and write.
pub type BlobRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Loads a `[C, H, W]` tensor blob onto `device`.
pub fn load_blob<B: Backend>(path: &Path, device: &B::Device) -> DatasetResult<Tensor<B, 3>> {
    let recorder = BlobRecorder::new();
    <BlobRecorder as Recorder<B>>::load::<Tensor<B, 3>>(&recorder, path.to_path_buf(), device)
        .map_err(|e| DatasetError::TensorLoad {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
}

/// Writes a `[C, H, W]` tensor blob. The blob extension replaces any
/// extension `path` carries.
pub fn save_blob<B: Backend>(tensor: Tensor<B, 3>, path: &Path) -> DatasetResult<()> {
    let recorder = BlobRecorder::new();
    <BlobRecorder as Recorder<B>>::record(&recorder, tensor, path.to_path_buf()).map_err(|e| {
        DatasetError::TensorSave {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        }
    })
}

/// Returns true when `path` carries the blob extension.
pub fn has_blob_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(BLOB_EXTENSION))
}

/// Lists the tensor blobs directly inside `dir`, sorted by file name.
pub fn list_blobs(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| DatasetError::DirectoryReadFailed {
            path: dir.to_path_buf(),
            source: Arc::new(std::io::Error::from(e)),
        })?;
        if entry.file_type().is_file() && has_blob_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Returns true when `dir` has no entries at all.
pub fn is_dir_empty(dir: &Path) -> DatasetResult<bool> {
    let mut entries = fs::read_dir(dir).map_err(|e| DatasetError::DirectoryReadFailed {
        path: dir.to_path_buf(),
        source: Arc::new(e),
    })?;
    Ok(entries.next().is_none())
}
