//! Tensor statistics reported by the inspect tool.

use burn::tensor::{backend::Backend, cast::ToElement, Tensor};
use serde::Serialize;

/// Min, max and mean of one tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl TensorStats {
    pub fn of<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Self {
        Self {
            min: tensor.clone().min().into_scalar().to_f32(),
            max: tensor.clone().max().into_scalar().to_f32(),
            mean: tensor.mean().into_scalar().to_f32(),
        }
    }
}

/// Running aggregate of [`TensorStats`] across batches.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatisticsAccumulator {
    pub min: f32,
    pub max: f32,
    mean_sum: f32,
    pub count: usize,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsAccumulator {
    pub const fn new() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            mean_sum: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, stats: TensorStats) {
        self.min = self.min.min(stats.min);
        self.max = self.max.max(stats.max);
        self.mean_sum += stats.mean;
        self.count += 1;
    }

    /// Average of the per-tensor means, zero when nothing was added.
    pub fn avg_mean(&self) -> f32 {
        if self.count > 0 {
            self.mean_sum / self.count as f32
        } else {
            0.0
        }
    }
}
