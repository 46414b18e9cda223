//! Conversion between grayscale slice images and `[1, H, W]` tensors.

use std::path::Path;

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage};

/// Extensions picked up when packing a directory of slices.
pub const SLICE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub fn is_slice_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SLICE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Load a slice as a single-channel tensor with values in [0, 1].
///
/// # Arguments
/// * `path` - Image file
/// * `size` - Optional (width, height) to resize to before conversion
/// * `device` - Device to create the tensor on
pub fn load_slice<B: Backend>(
    path: &Path,
    size: Option<(u32, u32)>,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open image at {}", path.display()))?;
    let img = match size {
        Some((width, height)) => img.resize_exact(width, height, FilterType::Triangle),
        None => img,
    };
    Ok(image_to_tensor(&img, device))
}

/// Luma channel of `img` as a `[1, H, W]` tensor.
pub fn image_to_tensor<B: Backend>(img: &DynamicImage, device: &B::Device) -> Tensor<B, 3> {
    let (width, height) = img.dimensions();
    let luma = img.to_luma32f();
    let data = TensorData::new(luma.into_raw(), [1, height as usize, width as usize])
        .convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

/// First channel of a `[C, H, W]` tensor as an 8-bit image, min-max scaled.
///
/// A constant tensor renders black.
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 3>) -> Result<GrayImage> {
    let [_, height, width] = tensor.dims();
    let values = tensor
        .slice([0..1])
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read tensor values: {e:?}"))?;

    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let pixels = values
        .iter()
        .map(|&v| {
            if range > 0.0 {
                ((v - min) / range * 255.0).round() as u8
            } else {
                0
            }
        })
        .collect();

    GrayImage::from_raw(width as u32, height as u32, pixels)
        .context("Tensor extent does not match the image buffer")
}
