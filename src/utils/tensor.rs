//! Conversions between RGB images and NCHW f32 tensors

use crate::error::{Result, SegifyError};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayView4};

/// Per-channel affine normalisation: `(pixel * scale - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub scale: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Map 0..=255 to 0.0..=1.0
    pub const UNIT: Self = Self {
        scale: 1.0 / 255.0,
        mean: [0.0; 3],
        std: [1.0; 3],
    };
}

/// Convert an RGB image to a `1x3xHxW` tensor, zero-padded on the bottom/right
///
/// `padded` is `(height, width)` of the output; `None` keeps the image size.
///
/// # Errors
/// - Padded size smaller than the image
#[allow(clippy::indexing_slicing)] // x < width <= out_w and y < height <= out_h
pub fn rgb_to_nchw(
    image: &RgbImage,
    normalization: Normalization,
    padded: Option<(usize, usize)>,
) -> Result<Array4<f32>> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (out_h, out_w) = padded.unwrap_or((height, width));
    if out_h < height || out_w < width {
        return Err(SegifyError::processing(format!(
            "Cannot pad {width}x{height} image into {out_w}x{out_h} tensor"
        )));
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, out_h, out_w));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = f32::from(pixel[c]) * normalization.scale;
            tensor[[0, c, y as usize, x as usize]] =
                (value - normalization.mean[c]) / normalization.std[c];
        }
    }
    Ok(tensor)
}

/// Convert a `1x3xHxW` tensor with values in `[0, 1]` to an RGB image
///
/// Values are clamped before quantisation.
///
/// # Errors
/// - Tensor is not `1x3xHxW`
#[allow(clippy::indexing_slicing)]
pub fn nchw_to_rgb(tensor: ArrayView4<'_, f32>) -> Result<RgbImage> {
    let (batch, channels, height, width) = tensor.dim();
    if batch != 1 || channels != 3 {
        return Err(SegifyError::processing(format!(
            "Expected 1x3xHxW image tensor, got {:?}",
            tensor.shape()
        )));
    }

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            to_u8(tensor[[0, 0, y, x]]),
            to_u8(tensor[[0, 1, y, x]]),
            to_u8(tensor[[0, 2, y, x]]),
        ])
    });
    Ok(image)
}
