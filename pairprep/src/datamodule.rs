//! Train/validation/test orchestration over a pair of source directories.
//!
//! A [`PairedDataModule`] starts [`Stage::Uninitialized`]. [`PairedDataModule::setup`]
//! enumerates both directories, performs the seeded two-stage split and
//! builds one [`PairedDataset`] per partition, after which the module is
//! [`Stage::Ready`] and hands out loaders.
//!
//! Loaders are built once per setup and handed out as shared clones, so the
//! training shuffle and the augmented draws advance from pass to pass no
//! matter how often [`PairedDataModule::train_loader`] is called.

use std::{fmt, path::PathBuf, sync::Arc};

use burn::{config::Config, data::dataset::Dataset, tensor::backend::Backend};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    augmentation::AugmentationConfig,
    dataset::PairedDataset,
    error::{DatasetError, DatasetResult},
    io::list_blobs,
    loader::{PairedLoader, PairedLoaderBuilder},
};

/// Tolerance applied before rounding fractional partition sizes up.
const SPLIT_EPSILON: f64 = 1e-9;

/// Configuration of a [`PairedDataModule`].
#[derive(Config, Debug)]
pub struct DataModuleConfig {
    /// Directory holding the T1 blobs.
    pub t1_dir: PathBuf,
    /// Directory holding the T2 blobs.
    pub t2_dir: PathBuf,
    /// Pairs per batch.
    #[config(default = 1)]
    pub batch_size: usize,
    /// Loader threads per partition; zero loads on the caller's thread.
    #[config(default = 4)]
    pub num_workers: usize,
    /// Pinned host memory hint for the loaders.
    #[config(default = true)]
    pub pin_memory: bool,
    /// Informational; the training partition is whatever the other two leave.
    #[config(default = 0.7)]
    pub train_ratio: f64,
    /// Fraction of all pairs held out for testing.
    #[config(default = 0.1)]
    pub test_size: f64,
    /// Fraction of all pairs held out for validation.
    #[config(default = 0.2)]
    pub val_size: f64,
    /// Seed of both split stages and of the training shuffle.
    #[config(default = 478)]
    pub seed: u64,
    /// Repetition multiplier applied to every partition.
    #[config(default = 1)]
    pub factor: usize,
    /// Proportion of augmented samples appended to the training partition.
    #[config(default = "None")]
    pub augm_prop: Option<f64>,
    /// Transforms used for the augmented training samples.
    #[config(default = "None")]
    pub augmentation: Option<AugmentationConfig>,
    /// Base seed of the per-sample augmentation generators. Drawn at random when unset.
    #[config(default = "None")]
    pub augmentation_seed: Option<u64>,
}

impl DataModuleConfig {
    /// Reject out-of-range ratios and inconsistent augmentation settings.
    pub fn validate(&self) -> DatasetResult<()> {
        for (name, value) in [
            ("train_ratio", self.train_ratio),
            ("test_size", self.test_size),
            ("val_size", self.val_size),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DatasetError::InvalidConfiguration {
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        if self.test_size >= 1.0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "test_size must leave pairs for training".to_owned(),
            });
        }
        if self.test_size + self.val_size > 1.0 + SPLIT_EPSILON {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "test_size + val_size must not exceed 1, got {}",
                    self.test_size + self.val_size
                ),
            });
        }
        if self.batch_size == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "batch_size must be at least 1".to_owned(),
            });
        }
        if self.factor == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "factor must be at least 1".to_owned(),
            });
        }
        if let Some(augm_prop) = self.augm_prop {
            if !augm_prop.is_finite() || augm_prop < 0.0 {
                return Err(DatasetError::InvalidConfiguration {
                    reason: format!("augm_prop must be a non-negative number, got {augm_prop}"),
                });
            }
            if augm_prop > 0.0 && self.augmentation.is_none() {
                return Err(DatasetError::InvalidConfiguration {
                    reason: "augm_prop requires an augmentation config".to_owned(),
                });
            }
        }
        if let Some(augmentation) = &self.augmentation {
            augmentation.validate()?;
        }

        let total = self.train_ratio + self.test_size + self.val_size;
        if (total - 1.0).abs() > 1e-6 {
            tracing::warn!(
                train_ratio = self.train_ratio,
                test_size = self.test_size,
                val_size = self.val_size,
                "split ratios do not sum to 1; training receives the remainder"
            );
        }
        Ok(())
    }
}

/// One of the three partitions produced by a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Shuffled and, when configured, augmented.
    Train,
    /// Held out for model selection.
    Validation,
    /// Held out for final evaluation.
    Test,
}

impl Partition {
    /// Lowercase name used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positions into the enumerated file list assigned to each partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    /// Positions left for training.
    pub train: Vec<usize>,
    /// Positions held out by the second stage.
    pub validation: Vec<usize>,
    /// Positions held out by the first stage.
    pub test: Vec<usize>,
}

impl SplitPlan {
    /// Two-stage seeded split of `n` positions.
    ///
    /// The first stage holds out `ceil(test_size * n)` positions for testing.
    /// The second holds out `ceil(val_size / (1 - test_size) * m)` of the
    /// remaining `m` positions for validation, shuffled with the same seed.
    pub fn new(n: usize, test_size: f64, val_size: f64, seed: u64) -> DatasetResult<Self> {
        if !(0.0..1.0).contains(&test_size) || !(0.0..=1.0).contains(&val_size) {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "cannot split with test_size {test_size} and val_size {val_size}"
                ),
            });
        }

        let (rest, test) = hold_out(&(0..n).collect::<Vec<_>>(), test_size, seed);
        let val_fraction = (val_size / (1.0 - test_size)).min(1.0);
        let (train, validation) = hold_out(&rest, val_fraction, seed);

        Ok(Self {
            train,
            validation,
            test,
        })
    }

    /// Positions assigned to `partition`.
    pub fn positions(&self, partition: Partition) -> &[usize] {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }
}

/// Shuffle `items` with `seed` and move the first `ceil(fraction * len)` of
/// them into the held-out part. Returns `(kept, held_out)`.
fn hold_out(items: &[usize], fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let held = ((fraction * items.len() as f64) - SPLIT_EPSILON)
        .ceil()
        .clamp(0.0, items.len() as f64) as usize;
    let mut shuffled = items.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    let kept = shuffled.split_off(held);
    (kept, shuffled)
}

/// Lifecycle of a [`PairedDataModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Configured, no files enumerated yet.
    Uninitialized,
    /// Split performed, partitions available.
    Ready,
}

/// Number of pairs per partition and the resulting dataset sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSizes {
    /// Primary files in the training partition.
    pub train_pairs: usize,
    /// Primary files in the validation partition.
    pub validation_pairs: usize,
    /// Primary files in the test partition.
    pub test_pairs: usize,
    /// Addressable training samples, augmented ones included.
    pub train_len: usize,
    /// Addressable validation samples.
    pub validation_len: usize,
    /// Addressable test samples.
    pub test_len: usize,
}

struct PartitionData<B: Backend> {
    dataset: Arc<PairedDataset<B>>,
    loader: PairedLoader<B>,
}

struct Partitions<B: Backend> {
    train: PartitionData<B>,
    validation: PartitionData<B>,
    test: PartitionData<B>,
}

impl<B: Backend> Partitions<B> {
    const fn get(&self, partition: Partition) -> &PartitionData<B> {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }
}

/// Splits a T1/T2 directory pair into train, validation and test datasets.
pub struct PairedDataModule<B: Backend> {
    config: DataModuleConfig,
    device: B::Device,
    partitions: Option<Partitions<B>>,
}

impl<B: Backend> PairedDataModule<B> {
    /// Store a validated configuration. No filesystem access happens here.
    pub fn new(config: DataModuleConfig, device: &B::Device) -> DatasetResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device: device.clone(),
            partitions: None,
        })
    }

    /// The configuration the module was created with.
    pub const fn config(&self) -> &DataModuleConfig {
        &self.config
    }

    /// Current lifecycle stage.
    pub const fn stage(&self) -> Stage {
        if self.partitions.is_some() {
            Stage::Ready
        } else {
            Stage::Uninitialized
        }
    }

    /// Enumerate both directories, split them and build the partitions.
    ///
    /// Running it again redoes the split from disk with the same seed and
    /// replaces the loaders, which restarts their pass counters.
    pub fn setup(&mut self) -> DatasetResult<()> {
        let config = &self.config;
        let t1_files = list_blobs(&config.t1_dir)?;
        if t1_files.is_empty() {
            return Err(DatasetError::EmptySource {
                path: config.t1_dir.clone(),
            });
        }
        let t2_files = list_blobs(&config.t2_dir)?;
        if t2_files.is_empty() {
            return Err(DatasetError::EmptySource {
                path: config.t2_dir.clone(),
            });
        }
        if t1_files.len() != t2_files.len() {
            tracing::warn!(
                t1 = t1_files.len(),
                t2 = t2_files.len(),
                "T1 and T2 directories hold different numbers of blobs"
            );
        }
        tracing::info!(
            t1_dir = %config.t1_dir.display(),
            t2_dir = %config.t2_dir.display(),
            pairs = t1_files.len(),
            "enumerated source files"
        );

        let plan = SplitPlan::new(t1_files.len(), config.test_size, config.val_size, config.seed)?;
        let select = |partition: Partition| -> (Vec<PathBuf>, Vec<PathBuf>) {
            let positions = plan.positions(partition);
            let t1 = positions.iter().map(|&i| t1_files[i].clone()).collect();
            let t2 = positions
                .iter()
                .filter_map(|&i| t2_files.get(i).cloned())
                .collect();
            (t1, t2)
        };

        let (train_t1, train_t2) = select(Partition::Train);
        let mut train = self.dataset_for(train_t1, train_t2)?;
        if let (Some(augm_prop), Some(augmentation)) = (config.augm_prop, &config.augmentation) {
            train = train.with_augmentation(augm_prop, augmentation.clone())?;
        }
        let (val_t1, val_t2) = select(Partition::Validation);
        let validation = self.dataset_for(val_t1, val_t2)?;
        let (test_t1, test_t2) = select(Partition::Test);
        let test = self.dataset_for(test_t1, test_t2)?;

        tracing::info!(
            train = train.num_files(),
            validation = validation.num_files(),
            test = test.num_files(),
            train_samples = train.len(),
            augmented = train.num_augmented(),
            "split complete"
        );

        self.partitions = Some(Partitions {
            train: self.with_loader(Partition::Train, train)?,
            validation: self.with_loader(Partition::Validation, validation)?,
            test: self.with_loader(Partition::Test, test)?,
        });
        Ok(())
    }

    fn dataset_for(&self, t1: Vec<PathBuf>, t2: Vec<PathBuf>) -> DatasetResult<PairedDataset<B>> {
        let dataset = PairedDataset::new(t1, t2, self.config.factor, &self.device)?
            .with_partner_dir(self.config.t2_dir.clone());
        Ok(match self.config.augmentation_seed {
            Some(seed) => dataset.with_seed(seed),
            None => dataset,
        })
    }

    /// Only the training loader shuffles.
    fn with_loader(
        &self,
        partition: Partition,
        dataset: PairedDataset<B>,
    ) -> DatasetResult<PartitionData<B>> {
        let dataset = Arc::new(dataset);
        let mut builder = PairedLoaderBuilder::new()
            .batch_size(self.config.batch_size)
            .num_workers(self.config.num_workers)
            .pin_memory(self.config.pin_memory)
            .set_device(self.device.clone());
        if partition == Partition::Train {
            builder = builder.shuffle(self.config.seed);
        }
        let loader = builder.build(dataset.clone())?;
        Ok(PartitionData { dataset, loader })
    }

    fn partition(&self, partition: Partition) -> DatasetResult<&PartitionData<B>> {
        self.partitions
            .as_ref()
            .map(|partitions| partitions.get(partition))
            .ok_or(DatasetError::NotReady {
                partition: partition.as_str(),
            })
    }

    /// The dataset backing `partition`.
    pub fn dataset(&self, partition: Partition) -> DatasetResult<&Arc<PairedDataset<B>>> {
        Ok(&self.partition(partition)?.dataset)
    }

    /// The training dataset, augmented samples included.
    pub fn train_dataset(&self) -> DatasetResult<&Arc<PairedDataset<B>>> {
        self.dataset(Partition::Train)
    }

    /// The validation dataset.
    pub fn val_dataset(&self) -> DatasetResult<&Arc<PairedDataset<B>>> {
        self.dataset(Partition::Validation)
    }

    /// The test dataset.
    pub fn test_dataset(&self) -> DatasetResult<&Arc<PairedDataset<B>>> {
        self.dataset(Partition::Test)
    }

    /// Pair counts and dataset sizes of all three partitions.
    pub fn split_sizes(&self) -> DatasetResult<SplitSizes> {
        let train = self.train_dataset()?;
        let validation = self.val_dataset()?;
        let test = self.test_dataset()?;
        Ok(SplitSizes {
            train_pairs: train.num_files(),
            validation_pairs: validation.num_files(),
            test_pairs: test.num_files(),
            train_len: train.len(),
            validation_len: validation.len(),
            test_len: test.len(),
        })
    }

    /// Loader over `partition`. Only the training loader shuffles.
    ///
    /// Every call returns a handle to the same loader, so consecutive passes
    /// continue the shuffle sequence instead of replaying the first one.
    pub fn loader(&self, partition: Partition) -> DatasetResult<PairedLoader<B>> {
        Ok(self.partition(partition)?.loader.clone())
    }

    /// Shuffled training loader.
    pub fn train_loader(&self) -> DatasetResult<PairedLoader<B>> {
        self.loader(Partition::Train)
    }

    /// Validation loader in file order.
    pub fn val_loader(&self) -> DatasetResult<PairedLoader<B>> {
        self.loader(Partition::Validation)
    }

    /// Test loader in file order.
    pub fn test_loader(&self) -> DatasetResult<PairedLoader<B>> {
        self.loader(Partition::Test)
    }
}
