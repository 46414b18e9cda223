//! Paired T1/T2 dataset with repetition and augmented samples.
//!
//! Indices `[0, num_originals)` address the files as stored on disk. When
//! augmentation is enabled, indices `[num_originals, len)` wrap back onto the
//! same files and pass both images through one freshly sampled
//! [`AugmentationParams`]. The draw depends on the sample index and on the
//! current pass, so every pass sees new augmented pairs while a fixed seed
//! still replays a pass exactly.

use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Tensor},
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    augmentation::{AugmentationConfig, AugmentationParams},
    error::{DatasetError, DatasetResult},
    io::load_blob,
    naming::{file_name, partner_path},
};

/// One T1/T2 sample with the basenames of the files it came from.
#[derive(Debug, Clone)]
pub struct PairedItem<B: Backend> {
    /// T1 tensor with shape [C, H, W].
    pub t1: Tensor<B, 3>,
    /// T2 tensor with shape [C, H, W].
    pub t2: Tensor<B, 3>,
    /// Basename of the T1 file.
    pub t1_name: String,
    /// Basename of the T2 file.
    pub t2_name: String,
}

/// A batch of paired samples.
#[derive(Debug, Clone)]
pub struct PairedBatch<B: Backend> {
    /// Batched T1 tensor with shape [B, C, H, W].
    pub t1: Tensor<B, 4>,
    /// Batched T2 tensor with shape [B, C, H, W].
    pub t2: Tensor<B, 4>,
    /// T1 basenames in batch order.
    pub t1_names: Vec<String>,
    /// T2 basenames in batch order.
    pub t2_names: Vec<String>,
}

/// Batcher stacking [`PairedItem`]s along a new leading dimension.
///
/// Items of one batch must share a shape.
#[derive(Clone, Default)]
pub struct PairedBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> PairedBatcher<B> {
    /// Create a new paired batcher.
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

/// Stacks the items; panics inside `Tensor::stack` on mixed shapes.
impl<B: Backend> Batcher<B, PairedItem<B>, PairedBatch<B>> for PairedBatcher<B> {
    fn batch(&self, items: Vec<PairedItem<B>>, device: &B::Device) -> PairedBatch<B> {
        let batch_size = items.len();

        let mut t1 = Vec::with_capacity(batch_size);
        let mut t2 = Vec::with_capacity(batch_size);
        let mut t1_names = Vec::with_capacity(batch_size);
        let mut t2_names = Vec::with_capacity(batch_size);

        for item in items {
            t1.push(item.t1.to_device(device));
            t2.push(item.t2.to_device(device));
            t1_names.push(item.t1_name);
            t2_names.push(item.t2_name);
        }

        PairedBatch {
            t1: Tensor::stack(t1, 0),
            t2: Tensor::stack(t2, 0),
            t1_names,
            t2_names,
        }
    }
}

/// Fallible batching used by the loaders: the first failed item fails the
/// batch, and items whose shapes disagree are reported instead of stacked.
impl<B: Backend> Batcher<B, DatasetResult<PairedItem<B>>, DatasetResult<PairedBatch<B>>>
    for PairedBatcher<B>
{
    fn batch(
        &self,
        items: Vec<DatasetResult<PairedItem<B>>>,
        device: &B::Device,
    ) -> DatasetResult<PairedBatch<B>> {
        let items = items.into_iter().collect::<DatasetResult<Vec<_>>>()?;
        ensure_uniform_shapes(&items)?;
        Ok(Batcher::<B, PairedItem<B>, PairedBatch<B>>::batch(
            self, items, device,
        ))
    }
}

/// Each modality is stacked on its own, so T1 shapes are compared with the
/// first T1 and T2 shapes with the first T2.
fn ensure_uniform_shapes<B: Backend>(items: &[PairedItem<B>]) -> DatasetResult<()> {
    let Some(first) = items.first() else {
        return Ok(());
    };
    let (t1_expected, t2_expected) = (first.t1.dims(), first.t2.dims());
    for item in items {
        for (expected, actual) in [(t1_expected, item.t1.dims()), (t2_expected, item.t2.dims())] {
            if actual != expected {
                return Err(DatasetError::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: actual.to_vec(),
                });
            }
        }
    }
    Ok(())
}

/// A [`Dataset`] of paired items that can also report why a sample failed.
pub trait PairedSource<B: Backend>: Dataset<PairedItem<B>> {
    /// Load the item at `index`, surfacing the failure instead of `None`.
    fn try_get(&self, index: usize) -> DatasetResult<PairedItem<B>>;

    /// Called by the loader before every pass, numbered from zero.
    fn begin_pass(&self, _pass: u64) {}
}

/// Paired T1/T2 dataset over one partition of files.
pub struct PairedDataset<B: Backend> {
    t1_files: Vec<PathBuf>,
    t2_files: Vec<PathBuf>,
    partner_dir: Option<PathBuf>,
    factor: usize,
    augmentation: Option<(f64, AugmentationConfig)>,
    seed: u64,
    pass: AtomicU64,
    device: B::Device,
}

impl<B: Backend> PairedDataset<B> {
    /// Create a dataset of original samples only.
    ///
    /// # Arguments
    ///
    /// * `t1_files` - Primary files; partners are derived from these
    /// * `t2_files` - Partner files, used only to bound the size
    /// * `factor` - Repetition multiplier, at least 1
    /// * `device` - Device the tensors are loaded onto
    pub fn new(
        t1_files: Vec<PathBuf>,
        t2_files: Vec<PathBuf>,
        factor: usize,
        device: &B::Device,
    ) -> DatasetResult<Self> {
        if factor == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "factor must be at least 1".to_string(),
            });
        }
        Ok(Self {
            t1_files,
            t2_files,
            partner_dir: None,
            factor,
            augmentation: None,
            seed: rand::random(),
            pass: AtomicU64::new(0),
            device: device.clone(),
        })
    }

    /// Enable augmented samples: `floor(num_originals * augm_prop)` of them.
    ///
    /// An `augm_prop` of zero leaves augmentation disabled.
    pub fn with_augmentation(
        mut self,
        augm_prop: f64,
        config: AugmentationConfig,
    ) -> DatasetResult<Self> {
        if !augm_prop.is_finite() || augm_prop < 0.0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!("augm_prop must be a non-negative number, got {augm_prop}"),
            });
        }
        config.validate()?;
        self.augmentation = (augm_prop > 0.0).then_some((augm_prop, config));
        Ok(self)
    }

    /// Resolve partners inside `dir` instead of substituting the whole path.
    pub fn with_partner_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.partner_dir = Some(dir.into());
        self
    }

    /// Fix the base seed augmented samples derive their randomness from.
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Select the pass augmented draws belong to.
    ///
    /// Loaders call this through [`PairedSource::begin_pass`]; a fixed seed
    /// and pass reproduce the same augmented samples.
    pub fn set_pass(&self, pass: u64) {
        self.pass.store(pass, Ordering::Relaxed);
    }

    /// The pass augmented draws currently belong to.
    pub fn pass(&self) -> u64 {
        self.pass.load(Ordering::Relaxed)
    }

    /// Number of original samples, `len(t1_files) * factor`.
    pub fn num_originals(&self) -> usize {
        self.t1_files.len() * self.factor
    }

    /// Number of primary files in this partition.
    pub fn num_files(&self) -> usize {
        self.t1_files.len()
    }

    /// Number of augmented samples appended after the originals.
    pub fn num_augmented(&self) -> usize {
        match &self.augmentation {
            Some((augm_prop, _)) => (self.num_originals() as f64 * augm_prop).floor() as usize,
            None => 0,
        }
    }

    /// Whether augmented samples are part of the index space.
    pub const fn is_augmenting(&self) -> bool {
        self.augmentation.is_some()
    }

    /// The primary files of this partition.
    pub fn t1_files(&self) -> &[PathBuf] {
        &self.t1_files
    }

    /// The partner files of this partition.
    pub fn t2_files(&self) -> &[PathBuf] {
        &self.t2_files
    }

    /// Resolve the (T1, T2) paths behind `index` without loading them.
    ///
    /// Indices past the raw file count wrap onto the files, which covers
    /// both `factor > 1` originals and augmented samples.
    pub fn resolve_paths(&self, index: usize) -> DatasetResult<(PathBuf, PathBuf)> {
        let len = self.len();
        if index >= len {
            return Err(DatasetError::IndexOutOfRange { index, len });
        }
        let t1_path = self.t1_files[index % self.t1_files.len()].clone();
        let t2_path = partner_path(&t1_path, self.partner_dir.as_deref())?;
        Ok((t1_path, t2_path))
    }

    /// One seed per (pass, index): `seed + pass * len + index`.
    fn sample_rng(&self, index: usize) -> StdRng {
        let draw = self
            .pass()
            .wrapping_mul(self.len() as u64)
            .wrapping_add(index as u64);
        StdRng::seed_from_u64(self.seed.wrapping_add(draw))
    }

    fn load_pair(&self, t1_path: &Path, t2_path: &Path) -> DatasetResult<(Tensor<B, 3>, Tensor<B, 3>)> {
        if !t2_path.is_file() {
            return Err(DatasetError::MissingPartnerFile {
                primary: t1_path.to_path_buf(),
                partner: t2_path.to_path_buf(),
            });
        }
        let t1 = load_blob::<B>(t1_path, &self.device)?;
        let t2 = load_blob::<B>(t2_path, &self.device)?;
        Ok((t1, t2))
    }
}

impl<B: Backend> Dataset<PairedItem<B>> for PairedDataset<B> {
    fn get(&self, index: usize) -> Option<PairedItem<B>> {
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(DatasetError::IndexOutOfRange { .. }) => None,
            Err(e) => {
                tracing::error!(index, error = %e, "failed to load paired sample");
                None
            }
        }
    }

    fn len(&self) -> usize {
        if self.is_augmenting() {
            self.num_originals() + self.num_augmented()
        } else {
            self.t1_files.len().min(self.t2_files.len()) * self.factor
        }
    }
}

impl<B: Backend> PairedSource<B> for PairedDataset<B> {
    fn try_get(&self, index: usize) -> DatasetResult<PairedItem<B>> {
        let (t1_path, t2_path) = self.resolve_paths(index)?;
        let (t1, t2) = self.load_pair(&t1_path, &t2_path)?;

        let (t1, t2) = match &self.augmentation {
            Some((_, config)) if index >= self.num_originals() => {
                let mut rng = self.sample_rng(index);
                let params = AugmentationParams::sample(config, &t2, &mut rng);
                (params.apply(t1)?, params.apply(t2)?)
            }
            _ => (t1, t2),
        };

        Ok(PairedItem {
            t1,
            t2,
            t1_name: file_name(&t1_path)?,
            t2_name: file_name(&t2_path)?,
        })
    }

    fn begin_pass(&self, pass: u64) {
        self.set_pass(pass);
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::{io::save_blob, tests::TestBackend};

    /// Writes `count` pairs `sub-NN_T1w.mpk` / `sub-NN_T2w.mpk` of shape [1, size, size].
    /// T1 pixels hold `NN`, T2 pixels hold `NN + 100`.
    fn write_pairs(root: &Path, count: usize, size: usize) -> (PathBuf, PathBuf, Vec<PathBuf>) {
        let t1_dir = root.join("T1");
        let t2_dir = root.join("T2");
        std::fs::create_dir_all(&t1_dir).unwrap();
        std::fs::create_dir_all(&t2_dir).unwrap();
        let device = Default::default();
        let mut t1_files = Vec::new();
        for i in 0..count {
            let t1_path = t1_dir.join(format!("sub-{i:02}_T1w.mpk"));
            let t2_path = t2_dir.join(format!("sub-{i:02}_T2w.mpk"));
            let t1 = Tensor::<TestBackend, 3>::full([1, size, size], i as f32, &device);
            let t2 = Tensor::<TestBackend, 3>::full([1, size, size], i as f32 + 100.0, &device);
            save_blob(t1, &t1_path).unwrap();
            save_blob(t2, &t2_path).unwrap();
            t1_files.push(t1_path);
        }
        (t1_dir, t2_dir, t1_files)
    }

    fn t2_list(t2_dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| t2_dir.join(format!("sub-{i:02}_T2w.mpk")))
            .collect()
    }

    /// Opens the pairs written by `write_pairs`, resolving partners in `t2_dir`.
    fn open(t1_files: &[PathBuf], t2_dir: &Path, factor: usize) -> PairedDataset<TestBackend> {
        PairedDataset::<TestBackend>::new(
            t1_files.to_vec(),
            t2_list(t2_dir, t1_files.len()),
            factor,
            &Default::default(),
        )
        .unwrap()
        .with_partner_dir(t2_dir)
    }

    fn values(tensor: Tensor<TestBackend, 3>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    fn augmentation(size: usize, crop: usize) -> AugmentationConfig {
        AugmentationConfig::new()
            .with_image_size((size, size))
            .with_crop_size((crop, crop))
            .with_rotation_range(10.0)
            .with_horizontal_flip_prob(0.5)
            .with_gaussian_noise_std(0.1)
    }

    #[test]
    fn sizes_follow_factor_and_augm_prop() {
        let device = Default::default();
        let files: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("{i}_T1.mpk"))).collect();
        let partners: Vec<PathBuf> =
            (0..10).map(|i| PathBuf::from(format!("{i}_T2.mpk"))).collect();

        let plain =
            PairedDataset::<TestBackend>::new(files.clone(), partners.clone(), 1, &device).unwrap();
        assert_eq!(plain.len(), 10);

        let augmented = PairedDataset::<TestBackend>::new(files.clone(), partners.clone(), 1, &device)
            .unwrap()
            .with_augmentation(0.5, augmentation(8, 4))
            .unwrap();
        assert_eq!(augmented.num_originals(), 10);
        assert_eq!(augmented.num_augmented(), 5);
        assert_eq!(augmented.len(), 15);

        let repeated = PairedDataset::<TestBackend>::new(files.clone(), partners[..7].to_vec(), 3, &device)
            .unwrap();
        assert_eq!(repeated.num_originals(), 30);
        assert_eq!(repeated.len(), 21);

        let zero_prop = PairedDataset::<TestBackend>::new(files, partners, 2, &device)
            .unwrap()
            .with_augmentation(0.0, augmentation(8, 4))
            .unwrap();
        assert!(!zero_prop.is_augmenting());
        assert_eq!(zero_prop.len(), 20);
    }

    #[test]
    fn augmented_index_wraps_onto_original_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 10, 4);
        let dataset = open(&t1_files, &t2_dir, 1)
            .with_augmentation(0.5, augmentation(4, 2))
            .unwrap();

        assert_eq!(dataset.len(), 15);
        assert_eq!(dataset.resolve_paths(12).unwrap(), dataset.resolve_paths(2).unwrap());

        let original = dataset.try_get(2).unwrap();
        let augmented = dataset.try_get(12).unwrap();
        assert_eq!(original.t1_name, augmented.t1_name);
        assert_eq!(original.t2_name, augmented.t2_name);
        assert_eq!(augmented.t1.dims(), [1, 2, 2]);
        assert_eq!(augmented.t2.dims(), [1, 2, 2]);
    }

    #[test]
    fn original_samples_match_disk_and_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 3, 4);
        let device = Default::default();
        let dataset = open(&t1_files, &t2_dir, 1)
            .with_augmentation(1.0, augmentation(4, 2))
            .unwrap();

        for index in 0..3 {
            let first = dataset.try_get(index).unwrap();
            let second = dataset.try_get(index).unwrap();
            assert_eq!(first.t2_name, crate::naming::partner_name(&first.t1_name));

            let direct = load_blob::<TestBackend>(&t1_files[index], &device).unwrap();
            assert_eq!(values(first.t1.clone()), values(direct));
            assert_eq!(values(first.t2.clone()), vec![index as f32 + 100.0; 16]);
            assert_eq!(values(first.t1), values(second.t1));
            assert_eq!(values(first.t2), values(second.t2));
        }
    }

    #[test]
    fn augmented_samples_are_reproducible_with_fixed_seed() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 2, 8);
        let build = || {
            open(&t1_files, &t2_dir, 1)
                .with_augmentation(1.0, augmentation(8, 4))
                .unwrap()
                .with_seed(99)
        };
        let a = build().try_get(3).unwrap();
        let b = build().try_get(3).unwrap();
        assert_eq!(values(a.t1), values(b.t1));
        assert_eq!(values(a.t2), values(b.t2));
    }

    #[test]
    fn augmented_draws_change_between_passes() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 2, 8);
        let dataset = open(&t1_files, &t2_dir, 1)
            .with_augmentation(1.0, augmentation(8, 4))
            .unwrap()
            .with_seed(5);

        let mut draws = Vec::new();
        for pass in 0..20 {
            dataset.begin_pass(pass);
            let item = dataset.try_get(3).unwrap();
            let repeat = dataset.try_get(3).unwrap();
            let t1 = values(item.t1);
            assert_eq!(t1, values(repeat.t1), "pass {pass} is not stable");
            draws.push(t1);
        }
        draws.sort_by(|a, b| a.partial_cmp(b).unwrap());
        draws.dedup();
        assert!(draws.len() > 1);

        dataset.set_pass(0);
        let original = values(dataset.try_get(1).unwrap().t1);
        dataset.set_pass(7);
        assert_eq!(values(dataset.try_get(1).unwrap().t1), original);
    }

    #[test]
    fn factor_above_one_wraps_originals() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 3, 2);
        let dataset = open(&t1_files, &t2_dir, 2);
        assert_eq!(dataset.len(), 6);
        let item = dataset.try_get(4).unwrap();
        assert_eq!(item.t1_name, "sub-01_T1w.mpk");
        assert_eq!(values(item.t1), vec![1.0; 4]);
    }

    #[test]
    fn missing_partner_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 2, 2);
        std::fs::remove_file(t2_dir.join("sub-01_T2w.mpk")).unwrap();
        let dataset = open(&t1_files, &t2_dir, 1);

        assert!(dataset.try_get(0).is_ok());
        assert!(matches!(
            dataset.try_get(1),
            Err(DatasetError::MissingPartnerFile { .. })
        ));
        assert!(dataset.get(1).is_none());
    }

    #[test]
    fn partner_dir_overrides_path_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let (_, t2_dir, t1_files) = write_pairs(dir.path(), 1, 2);
        let moved = dir.path().join("elsewhere");
        std::fs::rename(&t2_dir, &moved).unwrap();

        let dataset = open(&t1_files, &moved, 1);
        let item = dataset.try_get(0).unwrap();
        assert_eq!(item.t2_name, "sub-00_T2w.mpk");
        assert_eq!(values(item.t2), vec![100.0; 4]);
    }

    #[test]
    fn out_of_range_index_fails() {
        let dataset = PairedDataset::<TestBackend>::new(
            vec![PathBuf::from("a_T1.mpk")],
            vec![PathBuf::from("a_T2.mpk")],
            1,
            &Default::default(),
        )
        .unwrap();
        assert!(matches!(
            dataset.try_get(1),
            Err(DatasetError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn invalid_construction_is_rejected() {
        let device = Default::default();
        assert!(PairedDataset::<TestBackend>::new(vec![], vec![], 0, &device).is_err());
        assert!(PairedDataset::<TestBackend>::new(vec![], vec![], 1, &device)
            .unwrap()
            .with_augmentation(-0.5, augmentation(4, 2))
            .is_err());
    }

    #[test]
    fn batcher_stacks_items_and_names() {
        let device = Default::default();
        let batcher = PairedBatcher::<TestBackend>::new();
        let item = |i: usize| PairedItem {
            t1: Tensor::<TestBackend, 3>::from_data(
                TensorData::new(vec![i as f32; 2 * 3 * 3], [2, 3, 3]),
                &device,
            ),
            t2: Tensor::<TestBackend, 3>::zeros([2, 3, 3], &device),
            t1_name: format!("{i}_T1w.mpk"),
            t2_name: format!("{i}_T2w.mpk"),
        };

        let batch = batcher.batch(vec![item(0), item(1), item(2)], &device);

        assert_eq!(batch.t1.dims(), [3, 2, 3, 3]);
        assert_eq!(batch.t2.dims(), [3, 2, 3, 3]);
        assert_eq!(batch.t1_names, ["0_T1w.mpk", "1_T1w.mpk", "2_T1w.mpk"]);
        assert_eq!(batch.t2_names[2], "2_T2w.mpk");
    }

    fn shaped_item(t1: [usize; 3], t2: [usize; 3]) -> DatasetResult<PairedItem<TestBackend>> {
        let device = Default::default();
        Ok(PairedItem {
            t1: Tensor::zeros(t1, &device),
            t2: Tensor::zeros(t2, &device),
            t1_name: "a_T1w.mpk".to_string(),
            t2_name: "a_T2w.mpk".to_string(),
        })
    }

    #[test]
    fn fallible_batch_allows_modalities_of_different_shape() {
        let batcher = PairedBatcher::<TestBackend>::new();
        let items = vec![
            shaped_item([1, 4, 4], [3, 4, 4]),
            shaped_item([1, 4, 4], [3, 4, 4]),
        ];
        let batch = batcher.batch(items, &Default::default()).unwrap();
        assert_eq!(batch.t1.dims(), [2, 1, 4, 4]);
        assert_eq!(batch.t2.dims(), [2, 3, 4, 4]);
    }

    #[test]
    fn fallible_batch_rejects_mixed_shapes_within_a_modality() {
        let batcher = PairedBatcher::<TestBackend>::new();
        let items = vec![
            shaped_item([1, 4, 4], [1, 4, 4]),
            shaped_item([1, 4, 4], [1, 2, 2]),
        ];
        let result = batcher.batch(items, &Default::default());
        assert!(matches!(
            result,
            Err(DatasetError::ShapeMismatch { expected, actual })
                if expected == [1, 4, 4] && actual == [1, 2, 2]
        ));
    }

    #[test]
    fn fallible_batch_fails_on_first_failed_item() {
        let batcher = PairedBatcher::<TestBackend>::new();
        let items = vec![
            shaped_item([1, 2, 2], [1, 2, 2]),
            Err(DatasetError::EmptySource {
                path: PathBuf::from("T1"),
            }),
        ];
        let result = batcher.batch(items, &Default::default());
        assert!(matches!(result, Err(DatasetError::EmptySource { .. })));
    }
}
