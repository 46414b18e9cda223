//! Paired T1/T2 tensor datasets for image-to-image translation on Burn.
//!
//! Files in a T1 directory are paired with T2 partners by modality token,
//! split into train/validation/test partitions and served through
//! [`PairedLoader`]s. The training partition can be inflated with augmented
//! pairs that share one frozen set of random transforms.

pub mod augmentation;
pub mod datamodule;
pub mod dataset;
pub mod error;
pub mod fixture;
pub mod io;
pub mod loader;
pub mod naming;

// Re-export commonly used types
pub use augmentation::{AugmentationConfig, AugmentationParams, TransformKind};
pub use datamodule::{DataModuleConfig, PairedDataModule, Partition, SplitPlan, SplitSizes, Stage};
pub use dataset::{PairedBatch, PairedBatcher, PairedDataset, PairedItem, PairedSource};
pub use error::{DatasetError, DatasetResult};
pub use fixture::{move_test_fixture, ModalityDirs, PairSanityCheck, PairedTestSet, PartnerCheck};
pub use loader::{PairedBatchIter, PairedLoader, PairedLoaderBuilder};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray<f32>;
}
