//! Modality token substitution used to pair T1 files with their T2 partners.
//!
//! A T1 file such as `sub-01_T1w.mpk` is paired with `sub-01_T2w.mpk`: every
//! `T1` token becomes `T2` and an optional trailing `w` is carried over
//! untouched.

use std::path::{Path, PathBuf};

use crate::error::{DatasetError, DatasetResult};

/// Modality token of the primary images.
pub const T1_TOKEN: &str = "T1";
/// Modality token of the partner images.
pub const T2_TOKEN: &str = "T2";

/// Derives the T2 file name from a T1 file name.
pub fn partner_name(t1_name: &str) -> String {
    t1_name.replace(T1_TOKEN, T2_TOKEN)
}

/// Derives the T2 path for a T1 path.
///
/// With a `partner_dir`, only the file name is substituted and joined onto
/// that directory. Without one the substitution runs over the whole path, so
/// `data/T1/sub-01_T1w.mpk` becomes `data/T2/sub-01_T2w.mpk`.
pub fn partner_path(t1_path: &Path, partner_dir: Option<&Path>) -> DatasetResult<PathBuf> {
    match partner_dir {
        Some(dir) => Ok(dir.join(partner_name(&file_name(t1_path)?))),
        None => {
            let full = t1_path
                .to_str()
                .ok_or_else(|| DatasetError::InvalidUtf8Path {
                    path: t1_path.to_path_buf(),
                })?;
            Ok(PathBuf::from(partner_name(full)))
        }
    }
}

/// Returns the basename of `path` as an owned string.
pub fn file_name(path: &Path) -> DatasetResult<String> {
    path.file_name()
        .ok_or_else(|| DatasetError::NoFileName {
            path: path.to_path_buf(),
        })?
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| DatasetError::InvalidUtf8Path {
            path: path.to_path_buf(),
        })
}
