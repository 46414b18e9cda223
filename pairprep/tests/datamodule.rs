use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::{backend::NdArray, data::dataset::Dataset, tensor::Tensor};
use pairprep::{
    io::save_blob, AugmentationConfig, DataModuleConfig, DatasetError, ModalityDirs,
    PairedDataModule, PairedLoader, PairedLoaderBuilder, PairedTestSet, Partition, Stage,
};
use rand::{rngs::StdRng, SeedableRng};

type TestBackend = NdArray<f32>;

/// Writes `count` pairs of [1, size, size] blobs. T1 pixels hold `i`, T2 pixels `2 * i`.
fn write_volume_pairs(root: &Path, count: usize, size: usize) -> (PathBuf, PathBuf) {
    let t1_dir = root.join("T1");
    let t2_dir = root.join("T2");
    std::fs::create_dir_all(&t1_dir).unwrap();
    std::fs::create_dir_all(&t2_dir).unwrap();
    let device = Default::default();
    for i in 0..count {
        let t1 = Tensor::<TestBackend, 3>::full([1, size, size], i as f32, &device);
        let t2 = Tensor::<TestBackend, 3>::full([1, size, size], 2.0 * i as f32, &device);
        save_blob(t1, &t1_dir.join(format!("IXI{i:03}_T1w_slice.mpk"))).unwrap();
        save_blob(t2, &t2_dir.join(format!("IXI{i:03}_T2w_slice.mpk"))).unwrap();
    }
    (t1_dir, t2_dir)
}

fn collect_names(loader: &PairedLoader<TestBackend>) -> Vec<String> {
    loader
        .iter()
        .flat_map(|batch| batch.unwrap().t1_names)
        .collect()
}

#[test]
fn partitions_cover_every_pair_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let (t1_dir, t2_dir) = write_volume_pairs(dir.path(), 20, 4);
    let config = DataModuleConfig::new(t1_dir, t2_dir)
        .with_batch_size(3)
        .with_num_workers(2);

    let mut module = PairedDataModule::<TestBackend>::new(config, &Default::default()).unwrap();
    module.setup().unwrap();
    assert_eq!(module.stage(), Stage::Ready);

    let mut seen = HashSet::new();
    let mut total = 0;
    for partition in [Partition::Train, Partition::Validation, Partition::Test] {
        let names = collect_names(&module.loader(partition).unwrap());
        total += names.len();
        seen.extend(names);
    }
    assert_eq!(total, 20);
    assert_eq!(seen.len(), 20);

    let sizes = module.split_sizes().unwrap();
    assert_eq!(sizes.test_pairs, 2);
    assert_eq!(sizes.validation_pairs, 4);
    assert_eq!(sizes.train_pairs, 14);
}

#[test]
fn batches_pair_t1_with_its_t2_partner() {
    let dir = tempfile::tempdir().unwrap();
    let (t1_dir, t2_dir) = write_volume_pairs(dir.path(), 10, 3);
    let config = DataModuleConfig::new(t1_dir, t2_dir)
        .with_batch_size(4)
        .with_num_workers(0);
    let mut module = PairedDataModule::<TestBackend>::new(config, &Default::default()).unwrap();
    module.setup().unwrap();

    for batch in module.train_loader().unwrap().iter() {
        let batch = batch.unwrap();
        let [b, c, h, w] = batch.t1.dims();
        assert_eq!((c, h, w), (1, 3, 3));
        assert_eq!(batch.t2.dims(), [b, c, h, w]);
        for (t1_name, t2_name) in batch.t1_names.iter().zip(&batch.t2_names) {
            assert_eq!(t2_name, &t1_name.replace("T1", "T2"));
        }
        let doubled = batch.t1.mul_scalar(2.0).into_data().to_vec::<f32>().unwrap();
        let t2 = batch.t2.into_data().to_vec::<f32>().unwrap();
        assert_eq!(doubled, t2);
    }
}

#[test]
fn augmented_training_pairs_stay_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let (t1_dir, t2_dir) = write_volume_pairs(dir.path(), 10, 8);
    let augmentation = AugmentationConfig::new()
        .with_image_size((8, 8))
        .with_crop_size((4, 4))
        .with_rotation_range(15.0)
        .with_horizontal_flip_prob(0.5)
        .with_gaussian_noise_std(0.0);
    let config = DataModuleConfig::new(t1_dir, t2_dir)
        .with_augm_prop(Some(1.0))
        .with_augmentation(Some(augmentation))
        .with_augmentation_seed(Some(11));
    let mut module = PairedDataModule::<TestBackend>::new(config, &Default::default()).unwrap();
    module.setup().unwrap();

    let train = module.train_dataset().unwrap();
    assert_eq!(train.num_originals(), 7);
    assert_eq!(train.len(), 14);

    for index in train.num_originals()..train.len() {
        let item = train.get(index).unwrap();
        assert_eq!(item.t1.dims(), [1, 4, 4]);
        let doubled = item.t1.mul_scalar(2.0).into_data().to_vec::<f32>().unwrap();
        let t2 = item.t2.into_data().to_vec::<f32>().unwrap();
        assert_eq!(doubled, t2);
    }
}

/// Cropped training samples of one pass, keyed by file name.
fn augmented_pass(loader: &PairedLoader<TestBackend>) -> Vec<(String, Vec<f32>)> {
    let mut samples: Vec<_> = loader
        .iter()
        .map(|batch| batch.unwrap())
        .filter(|batch| batch.t1.dims() == [1, 1, 4, 4])
        .map(|batch| {
            let values = batch.t1.into_data().to_vec::<f32>().unwrap();
            (batch.t1_names[0].clone(), values)
        })
        .collect();
    samples.sort_by(|a, b| a.0.cmp(&b.0));
    samples
}

#[test]
fn augmented_training_pairs_are_redrawn_every_pass() {
    let dir = tempfile::tempdir().unwrap();
    let (t1_dir, t2_dir) = write_volume_pairs(dir.path(), 10, 8);
    let augmentation = AugmentationConfig::new()
        .with_image_size((8, 8))
        .with_crop_size((4, 4))
        .with_gaussian_noise_std(0.5);
    let config = DataModuleConfig::new(t1_dir, t2_dir)
        .with_num_workers(0)
        .with_augm_prop(Some(1.0))
        .with_augmentation(Some(augmentation))
        .with_augmentation_seed(Some(21));
    let mut module = PairedDataModule::<TestBackend>::new(config, &Default::default()).unwrap();
    module.setup().unwrap();

    let loader = module.train_loader().unwrap();
    let first = augmented_pass(&loader);
    let second = augmented_pass(&loader);
    assert_eq!(first.len(), 7);
    assert_eq!(second.len(), 7);
    assert_ne!(first, second);
}

#[test]
fn mixed_original_and_cropped_batch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (t1_dir, t2_dir) = write_volume_pairs(dir.path(), 10, 8);
    let augmentation = AugmentationConfig::new()
        .with_image_size((8, 8))
        .with_crop_size((4, 4));
    let config = DataModuleConfig::new(t1_dir, t2_dir)
        .with_batch_size(14)
        .with_num_workers(0)
        .with_augm_prop(Some(1.0))
        .with_augmentation(Some(augmentation));
    let mut module = PairedDataModule::<TestBackend>::new(config, &Default::default()).unwrap();
    module.setup().unwrap();

    let result = module.train_loader().unwrap().iter().next().unwrap();
    assert!(matches!(result, Err(DatasetError::ShapeMismatch { .. })));
}

#[test]
fn held_out_fixture_feeds_a_loader() {
    let dir = tempfile::tempdir().unwrap();
    let (t1_dir, t2_dir) = write_volume_pairs(dir.path(), 12, 2);
    let source = ModalityDirs::new(&t1_dir, &t2_dir);
    let dest = ModalityDirs::new(dir.path().join("fixture/T1"), dir.path().join("fixture/T2"));

    let test_set = PairedTestSet::<TestBackend>::open(
        &source,
        &dest,
        0.25,
        &mut StdRng::seed_from_u64(4),
        &Default::default(),
    )
    .unwrap();
    assert_eq!(test_set.len(), 3);

    let config = DataModuleConfig::new(t1_dir, t2_dir);
    let mut module = PairedDataModule::<TestBackend>::new(config, &Default::default()).unwrap();
    module.setup().unwrap();
    let sizes = module.split_sizes().unwrap();
    assert_eq!(sizes.train_pairs + sizes.validation_pairs + sizes.test_pairs, 9);

    let loader = PairedLoaderBuilder::<TestBackend>::new()
        .batch_size(2)
        .build(Arc::new(test_set))
        .unwrap();
    let names = collect_names(&loader);
    assert_eq!(names.len(), 3);
}
