//! Paired augmentation with frozen random parameters.
//!
//! One [`AugmentationParams`] value is sampled per augmented sample and then
//! applied to both images of the pair, so T1 and T2 see the same rotation,
//! crop window, flip decision and noise tensor.
//!
//! Transforms run in a fixed order:
//! 1. Gaussian noise - adds the frozen standard-normal tensor scaled by `gaussian_noise_std`
//! 2. Rotation - nearest-neighbour, about the image centre, zero fill
//! 3. Crop - fixed `crop_size` window at the frozen origin (always applied)
//! 4. Horizontal flip - mirrors the width axis

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor, TensorData},
};
use image::{ImageBuffer, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::{seq::index, Rng};
use rand_distr::StandardNormal;

use crate::error::{DatasetError, DatasetResult};

/// Augmentation parameters shared by every sample of a partition.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    /// Symmetric rotation bound in degrees.
    #[config(default = 10.0)]
    pub rotation_range: f64,
    /// Crop window as (width, height).
    #[config(default = "(128, 128)")]
    pub crop_size: (usize, usize),
    /// Probability that an enabled flip slot actually mirrors the pair.
    #[config(default = 0.5)]
    pub horizontal_flip_prob: f64,
    /// Standard deviation of the additive noise.
    #[config(default = 0.1)]
    pub gaussian_noise_std: f64,
    /// Extent of the source images as (width, height).
    #[config(default = "(256, 256)")]
    pub image_size: (usize, usize),
}

impl AugmentationConfig {
    /// Validate ranges once, before any sample is drawn.
    ///
    /// A crop larger than the image is not rejected here; it fails with
    /// [`DatasetError::InvalidCrop`] the first time it is applied.
    pub fn validate(&self) -> DatasetResult<()> {
        if !self.rotation_range.is_finite() || self.rotation_range < 0.0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "rotation_range must be a non-negative number of degrees, got {}",
                    self.rotation_range
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "horizontal_flip_prob must be within [0, 1], got {}",
                    self.horizontal_flip_prob
                ),
            });
        }
        if !self.gaussian_noise_std.is_finite() || self.gaussian_noise_std < 0.0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "gaussian_noise_std must be non-negative, got {}",
                    self.gaussian_noise_std
                ),
            });
        }
        let (crop_width, crop_height) = self.crop_size;
        let (image_width, image_height) = self.image_size;
        if crop_width == 0 || crop_height == 0 || image_width == 0 || image_height == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "crop_size {:?} and image_size {:?} must be non-zero",
                    self.crop_size, self.image_size
                ),
            });
        }
        Ok(())
    }
}

/// The transform slots of the enable-vector, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Additive Gaussian noise.
    GaussianNoise,
    /// Rotation by the frozen angle.
    Rotation,
    /// Crop to `crop_size`.
    Crop,
    /// Horizontal mirror.
    HorizontalFlip,
}

impl TransformKind {
    /// Number of enable-vector slots.
    pub const COUNT: usize = 4;

    /// All kinds in application order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::GaussianNoise,
        Self::Rotation,
        Self::Crop,
        Self::HorizontalFlip,
    ];

    const fn slot(self) -> usize {
        match self {
            Self::GaussianNoise => 0,
            Self::Rotation => 1,
            Self::Crop => 2,
            Self::HorizontalFlip => 3,
        }
    }
}

/// One frozen draw of augmentation parameters.
#[derive(Debug, Clone)]
pub struct AugmentationParams<B: Backend> {
    enabled: [bool; TransformKind::COUNT],
    angle: f64,
    left: usize,
    top: usize,
    flip: bool,
    noise: Tensor<B, 3>,
    noise_std: f64,
    crop_size: (usize, usize),
    image_size: (usize, usize),
}

impl<B: Backend> AugmentationParams<B> {
    /// Draw a parameter set.
    ///
    /// Draw order: enable-vector, rotation angle, crop origin, noise tensor
    /// (shaped like `reference`), flip decision.
    pub fn sample<R: Rng + ?Sized>(
        config: &AugmentationConfig,
        reference: &Tensor<B, 3>,
        rng: &mut R,
    ) -> Self {
        let enabled = sample_enable_vector(rng);

        let angle = rng.random_range(-config.rotation_range..=config.rotation_range);

        let (image_width, image_height) = config.image_size;
        let (crop_width, crop_height) = config.crop_size;
        let left = rng.random_range(0..=image_width.saturating_sub(crop_width));
        let top = rng.random_range(0..=image_height.saturating_sub(crop_height));

        let dims = reference.dims();
        let values: Vec<f32> = (0..dims.iter().product::<usize>())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        let noise = Tensor::from_data(
            TensorData::new(values, dims).convert::<B::FloatElem>(),
            &reference.device(),
        );

        let flip = rng.random::<f64>() < config.horizontal_flip_prob;

        Self {
            enabled,
            angle,
            left,
            top,
            flip,
            noise,
            noise_std: config.gaussian_noise_std,
            crop_size: config.crop_size,
            image_size: config.image_size,
        }
    }

    /// Whether `kind` holds an enabled slot in the drawn enable-vector.
    pub fn is_enabled(&self, kind: TransformKind) -> bool {
        self.enabled[kind.slot()]
    }

    /// Whether `kind` runs when [`apply`](Self::apply) is called.
    ///
    /// Crop always runs so every augmented sample has the `crop_size` extent.
    /// Flip needs both its slot and the frozen Bernoulli draw.
    pub fn fires(&self, kind: TransformKind) -> bool {
        match kind {
            TransformKind::Crop => true,
            TransformKind::HorizontalFlip => self.is_enabled(kind) && self.flip,
            TransformKind::GaussianNoise | TransformKind::Rotation => self.is_enabled(kind),
        }
    }

    /// Rotation angle in degrees, counter-clockwise.
    pub const fn angle(&self) -> f64 {
        self.angle
    }

    /// Crop origin as (left, top).
    pub const fn crop_origin(&self) -> (usize, usize) {
        (self.left, self.top)
    }

    /// Apply the frozen transforms to `image`.
    pub fn apply(&self, image: Tensor<B, 3>) -> DatasetResult<Tensor<B, 3>> {
        let mut image = image;
        if self.fires(TransformKind::GaussianNoise) {
            image = self.add_noise(image)?;
        }
        if self.fires(TransformKind::Rotation) {
            image = self.rotate(image)?;
        }
        image = self.crop(image)?;
        if self.fires(TransformKind::HorizontalFlip) {
            image = image.flip([2]);
        }
        Ok(image)
    }

    fn add_noise(&self, image: Tensor<B, 3>) -> DatasetResult<Tensor<B, 3>> {
        let expected = self.noise.dims();
        let actual = image.dims();
        if expected != actual {
            return Err(DatasetError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(image + self.noise.clone().mul_scalar(self.noise_std))
    }

    /// Rotates every channel with `imageproc`, nearest neighbour about the centre.
    ///
    /// `rotate_about_center` turns clockwise for positive angles in image
    /// coordinates, so the frozen angle is negated.
    fn rotate(&self, image: Tensor<B, 3>) -> DatasetResult<Tensor<B, 3>> {
        let [channels, height, width] = image.dims();
        if self.angle == 0.0 || height == 0 || width == 0 {
            return Ok(image);
        }

        let device = image.device();
        let theta = (-self.angle).to_radians() as f32;
        let values: Vec<f32> = image.into_data().iter::<f32>().collect();
        let mut rotated = Vec::with_capacity(values.len());
        for plane in values.chunks_exact(height * width) {
            let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(
                width as u32,
                height as u32,
                plane.to_vec(),
            )
            .ok_or_else(|| DatasetError::ShapeMismatch {
                expected: vec![height, width],
                actual: vec![plane.len()],
            })?;
            let turned = rotate_about_center(&buffer, theta, Interpolation::Nearest, Luma([0.0]));
            rotated.extend(turned.into_raw());
        }

        Ok(Tensor::from_data(
            TensorData::new(rotated, [channels, height, width]).convert::<B::FloatElem>(),
            &device,
        ))
    }

    fn crop(&self, image: Tensor<B, 3>) -> DatasetResult<Tensor<B, 3>> {
        let [channels, height, width] = image.dims();
        let (crop_width, crop_height) = self.crop_size;
        let (image_width, image_height) = self.image_size;

        let invalid = |image_width, image_height| DatasetError::InvalidCrop {
            crop_width,
            crop_height,
            left: self.left,
            top: self.top,
            image_width,
            image_height,
        };
        if crop_width > image_width || crop_height > image_height {
            return Err(invalid(image_width, image_height));
        }
        if self.left + crop_width > width || self.top + crop_height > height {
            return Err(invalid(width, height));
        }

        Ok(image.slice([
            0..channels,
            self.top..self.top + crop_height,
            self.left..self.left + crop_width,
        ]))
    }
}

/// Random-size subset of the slots, at least one enabled.
fn sample_enable_vector<R: Rng + ?Sized>(rng: &mut R) -> [bool; TransformKind::COUNT] {
    let amount = rng.random_range(1..=TransformKind::COUNT);
    let mut enabled = [false; TransformKind::COUNT];
    for slot in index::sample(rng, TransformKind::COUNT, amount) {
        enabled[slot] = true;
    }
    enabled
}
