//! Held-out evaluation fixtures.
//!
//! [`move_test_fixture`] relocates a random subset of pairs from one pair of
//! modality directories into another. [`PairedTestSet`] does that once, on
//! first use, and then serves the destination pairs.
//!
//! The emptiness check and the move are not atomic: two processes opening
//! the same fixture concurrently can both decide to materialize it.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::{data::dataset::Dataset, tensor::backend::Backend};
use rand::{seq::index, Rng};

use crate::{
    dataset::{PairedItem, PairedSource},
    error::{DatasetError, DatasetResult},
    io::{is_dir_empty, list_blobs, load_blob},
    naming::{file_name, partner_name},
};

/// A T1 directory and its T2 counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalityDirs {
    pub t1: PathBuf,
    pub t2: PathBuf,
}

impl ModalityDirs {
    pub fn new(t1: impl Into<PathBuf>, t2: impl Into<PathBuf>) -> Self {
        Self {
            t1: t1.into(),
            t2: t2.into(),
        }
    }

    /// True when both directories exist and hold no entries.
    pub fn is_empty(&self) -> DatasetResult<bool> {
        Ok(is_dir_empty(&self.t1)? && is_dir_empty(&self.t2)?)
    }

    fn create_all(&self) -> DatasetResult<()> {
        for dir in [&self.t1, &self.t2] {
            fs::create_dir_all(dir).map_err(|e| DatasetError::DirectoryReadFailed {
                path: dir.clone(),
                source: Arc::new(e),
            })?;
        }
        Ok(())
    }
}

/// Move `floor(count(source.t1) * fraction)` randomly chosen pairs from
/// `source` to `dest`.
///
/// Every selected T1 blob must have its T2 partner in `source.t2`; this is
/// checked before anything is moved. Returns the moved T1 file names.
pub fn move_test_fixture<R: Rng + ?Sized>(
    source: &ModalityDirs,
    dest: &ModalityDirs,
    fraction: f64,
    rng: &mut R,
) -> DatasetResult<Vec<String>> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(DatasetError::InvalidConfiguration {
            reason: format!("fixture fraction must be within [0, 1], got {fraction}"),
        });
    }

    let t1_files = list_blobs(&source.t1)?;
    let amount = (t1_files.len() as f64 * fraction).floor() as usize;
    let mut selected = index::sample(rng, t1_files.len(), amount).into_vec();
    selected.sort_unstable();

    let mut moves = Vec::with_capacity(selected.len());
    for position in selected {
        let t1_path = &t1_files[position];
        let t1_name = file_name(t1_path)?;
        let t2_path = source.t2.join(partner_name(&t1_name));
        if !t2_path.is_file() {
            return Err(DatasetError::MissingPartnerFile {
                primary: t1_path.clone(),
                partner: t2_path,
            });
        }
        moves.push((t1_name, t1_path.clone(), t2_path));
    }

    dest.create_all()?;
    let mut moved = Vec::with_capacity(moves.len());
    for (t1_name, t1_path, t2_path) in moves {
        relocate(&t1_path, &dest.t1.join(&t1_name))?;
        let t2_name = file_name(&t2_path)?;
        relocate(&t2_path, &dest.t2.join(t2_name))?;
        moved.push(t1_name);
    }

    tracing::info!(
        from = %source.t1.display(),
        to = %dest.t1.display(),
        pairs = moved.len(),
        available = t1_files.len(),
        "moved test fixture"
    );
    Ok(moved)
}

/// Rename, falling back to copy and remove across filesystems.
fn relocate(from: &Path, to: &Path) -> DatasetResult<()> {
    let fail = |source: io::Error| DatasetError::FixtureMoveFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: Arc::new(source),
    };
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(fail)?;
    fs::remove_file(from).map_err(fail)
}

/// Post-materialization check of a fixture directory pair.
pub trait PairSanityCheck {
    fn check(&self, dirs: &ModalityDirs) -> DatasetResult<()>;
}

/// Checks that both directories hold the same number of blobs and that
/// every T1 blob has its T2 partner.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartnerCheck;

impl PairSanityCheck for PartnerCheck {
    fn check(&self, dirs: &ModalityDirs) -> DatasetResult<()> {
        let t1_files = list_blobs(&dirs.t1)?;
        let t2_files = list_blobs(&dirs.t2)?;
        if t1_files.len() != t2_files.len() {
            return Err(DatasetError::SanityCheckFailed {
                reason: format!(
                    "{} holds {} blobs but {} holds {}",
                    dirs.t1.display(),
                    t1_files.len(),
                    dirs.t2.display(),
                    t2_files.len()
                ),
            });
        }
        for t1_path in &t1_files {
            let partner = dirs.t2.join(partner_name(&file_name(t1_path)?));
            if !partner.is_file() {
                return Err(DatasetError::SanityCheckFailed {
                    reason: format!(
                        "{} has no partner at {}",
                        t1_path.display(),
                        partner.display()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Held-out pairs served from a fixture directory pair.
///
/// Both directories are listed in name order and paired by position.
pub struct PairedTestSet<B: Backend> {
    t1_files: Vec<PathBuf>,
    t2_files: Vec<PathBuf>,
    device: B::Device,
}

impl<B: Backend> PairedTestSet<B> {
    /// Open `dest`, materializing it from `source` first when both of its
    /// directories are empty. Uses [`PartnerCheck`] after materializing.
    pub fn open<R: Rng + ?Sized>(
        source: &ModalityDirs,
        dest: &ModalityDirs,
        fraction: f64,
        rng: &mut R,
        device: &B::Device,
    ) -> DatasetResult<Self> {
        Self::open_with_check(source, dest, fraction, rng, &PartnerCheck, device)
    }

    pub fn open_with_check<R: Rng + ?Sized>(
        source: &ModalityDirs,
        dest: &ModalityDirs,
        fraction: f64,
        rng: &mut R,
        check: &dyn PairSanityCheck,
        device: &B::Device,
    ) -> DatasetResult<Self> {
        dest.create_all()?;
        if dest.is_empty()? {
            move_test_fixture(source, dest, fraction, rng)?;
            check.check(dest)?;
        } else {
            tracing::debug!(dest = %dest.t1.display(), "test fixture already materialized");
        }
        Self::from_dirs(dest, device)
    }

    /// Serve the pairs already present in `dirs`.
    pub fn from_dirs(dirs: &ModalityDirs, device: &B::Device) -> DatasetResult<Self> {
        Ok(Self {
            t1_files: list_blobs(&dirs.t1)?,
            t2_files: list_blobs(&dirs.t2)?,
            device: device.clone(),
        })
    }
}

impl<B: Backend> Dataset<PairedItem<B>> for PairedTestSet<B> {
    fn get(&self, index: usize) -> Option<PairedItem<B>> {
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(DatasetError::IndexOutOfRange { .. }) => None,
            Err(e) => {
                tracing::error!(index, error = %e, "failed to load test pair");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.t1_files.len().min(self.t2_files.len())
    }
}

impl<B: Backend> PairedSource<B> for PairedTestSet<B> {
    fn try_get(&self, index: usize) -> DatasetResult<PairedItem<B>> {
        let len = self.len();
        if index >= len {
            return Err(DatasetError::IndexOutOfRange { index, len });
        }
        let t1_path = &self.t1_files[index];
        let t2_path = &self.t2_files[index];
        Ok(PairedItem {
            t1: load_blob::<B>(t1_path, &self.device)?,
            t2: load_blob::<B>(t2_path, &self.device)?,
            t1_name: file_name(t1_path)?,
            t2_name: file_name(t2_path)?,
        })
    }
}
