//! Fail-fast batch iteration over a [`PairedSource`] on Burn's data loaders.
//!
//! Burn's loaders stop at the first `None` a dataset returns, which would
//! silently truncate a pass. The source is therefore wrapped as a dataset of
//! `DatasetResult` items and batched by [`PairedBatcher`]'s fallible
//! `Batcher` impl, so a failing sample arrives as an `Err` batch. The
//! first error ends the pass.
//!
//! With `num_workers > 0`, Burn splits the index range into one contiguous
//! part per worker and batches arrive in completion order.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, DataLoaderIterator},
        dataset::Dataset,
    },
    tensor::backend::Backend,
};

use crate::{
    dataset::{PairedBatch, PairedBatcher, PairedItem, PairedSource},
    error::{DatasetError, DatasetResult},
};

type BatchLoader<B> = Arc<dyn DataLoader<B, DatasetResult<PairedBatch<B>>>>;

/// A [`PairedSource`] seen by Burn as a dataset of results.
struct FallibleSource<B: Backend> {
    source: Arc<dyn PairedSource<B>>,
}

impl<B: Backend> Dataset<DatasetResult<PairedItem<B>>> for FallibleSource<B> {
    fn get(&self, index: usize) -> Option<DatasetResult<PairedItem<B>>> {
        (index < self.len()).then(|| self.source.try_get(index))
    }

    fn len(&self) -> usize {
        self.source.len()
    }
}

/// Builder for [`PairedLoader`] over Burn's `DataLoaderBuilder`.
pub struct PairedLoaderBuilder<B: Backend> {
    batch_size: usize,
    shuffle: Option<u64>,
    num_workers: usize,
    pin_memory: bool,
    device: Option<B::Device>,
}

impl<B: Backend> Default for PairedLoaderBuilder<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> PairedLoaderBuilder<B> {
    /// Batch size 1, no shuffling, no workers.
    pub const fn new() -> Self {
        Self {
            batch_size: 1,
            shuffle: None,
            num_workers: 0,
            pin_memory: false,
            device: None,
        }
    }

    /// Number of items per batch. The last batch of a pass may be smaller.
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reshuffle the sample order on every pass, starting from `seed`.
    pub const fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle = Some(seed);
        self
    }

    /// Load batches on `num_workers` threads. Zero loads on the caller's thread.
    pub const fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Pinned host memory hint. Stored and logged; Burn backends manage
    /// host buffers themselves.
    pub const fn pin_memory(mut self, pin_memory: bool) -> Self {
        self.pin_memory = pin_memory;
        self
    }

    /// Device batches are moved to. Defaults to the backend's default device.
    pub fn set_device(mut self, device: B::Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Build the loader.
    ///
    /// # Errors
    ///
    /// [`DatasetError::InvalidConfiguration`] for a zero batch size.
    pub fn build(self, dataset: Arc<dyn PairedSource<B>>) -> DatasetResult<PairedLoader<B>> {
        if self.batch_size == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "batch_size must be at least 1".to_string(),
            });
        }

        let mut builder: DataLoaderBuilder<B, DatasetResult<PairedItem<B>>, DatasetResult<PairedBatch<B>>> =
            DataLoaderBuilder::new(PairedBatcher::<B>::new()).batch_size(self.batch_size);
        if let Some(seed) = self.shuffle {
            builder = builder.shuffle(seed);
        }
        if self.num_workers > 0 {
            builder = builder.num_workers(self.num_workers);
        }
        if let Some(device) = self.device {
            builder = builder.set_device(device);
        }
        let inner = builder.build(FallibleSource {
            source: Arc::clone(&dataset),
        });

        tracing::debug!(
            items = dataset.len(),
            batch_size = self.batch_size,
            num_workers = self.num_workers,
            pin_memory = self.pin_memory,
            shuffle = self.shuffle.is_some(),
            "built paired loader"
        );

        Ok(PairedLoader {
            inner,
            dataset,
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            pin_memory: self.pin_memory,
            pass: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// Batch producer over one dataset partition.
///
/// Clones share the underlying Burn loader and the pass counter, so the
/// shuffle order and augmented draws keep advancing across clones.
pub struct PairedLoader<B: Backend> {
    inner: BatchLoader<B>,
    dataset: Arc<dyn PairedSource<B>>,
    batch_size: usize,
    num_workers: usize,
    pin_memory: bool,
    pass: Arc<AtomicU64>,
}

impl<B: Backend> Clone for PairedLoader<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dataset: Arc::clone(&self.dataset),
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            pin_memory: self.pin_memory,
            pass: Arc::clone(&self.pass),
        }
    }
}

impl<B: Backend> PairedLoader<B> {
    /// Start a new pass over the dataset.
    ///
    /// The source is told the pass number first, so augmented samples are
    /// drawn anew on every pass.
    pub fn iter(&self) -> PairedBatchIter<'_, B> {
        let pass = self.pass.fetch_add(1, Ordering::Relaxed);
        self.dataset.begin_pass(pass);
        tracing::trace!(pass, "starting loader pass");
        PairedBatchIter {
            inner: self.inner.iter(),
            done: false,
        }
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.pass.load(Ordering::Relaxed)
    }

    /// Number of batches in one pass, counting the partial batch of every worker.
    pub fn num_batches(&self) -> usize {
        let items = self.dataset.len();
        if self.num_workers == 0 {
            return items.div_ceil(self.batch_size);
        }
        let part = items / self.num_workers;
        let last = items - part * (self.num_workers - 1);
        part.div_ceil(self.batch_size) * (self.num_workers - 1) + last.div_ceil(self.batch_size)
    }

    /// Number of items in one pass.
    pub fn num_items(&self) -> usize {
        self.inner.num_items()
    }

    /// Configured batch size.
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Configured worker count.
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Pinned host memory hint.
    pub const fn pin_memory(&self) -> bool {
        self.pin_memory
    }

    /// The source batches are drawn from.
    pub fn dataset(&self) -> &Arc<dyn PairedSource<B>> {
        &self.dataset
    }
}

/// Iterator over the batches of one pass. Yields at most one error.
pub struct PairedBatchIter<'a, B: Backend> {
    inner: Box<dyn DataLoaderIterator<DatasetResult<PairedBatch<B>>> + 'a>,
    done: bool,
}

impl<B: Backend> PairedBatchIter<'_, B> {
    /// Items processed and total items of this pass.
    pub fn progress(&self) -> (usize, usize) {
        let progress = self.inner.progress();
        (progress.items_processed, progress.items_total)
    }
}

impl<B: Backend> Iterator for PairedBatchIter<'_, B> {
    type Item = DatasetResult<PairedBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.inner.next();
        self.done = !matches!(result, Some(Ok(_)));
        result
    }
}
