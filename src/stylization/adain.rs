//! Arbitrary style transfer with adaptive instance normalisation
//!
//! Content and style images are encoded by a normalised VGG graph (truncated
//! at relu4_1). The content features are re-normalised to the style
//! features' per-channel mean and standard deviation, blended with the
//! original content features and decoded back to an image.

use super::color::coral;
use super::Stylizer;
use crate::cache::ModelCache;
use crate::config::{SegifyConfig, StyleConfig};
use crate::error::{Result, SegifyError};
use crate::inference::{
    load_backends, lock_backend, BackendFactory, InferenceBackend, SharedBackend,
};
use crate::models::ModelAsset;
use crate::utils::tensor::{nchw_to_rgb, rgb_to_nchw, Normalization};
use image::{imageops::FilterType, RgbImage};
use instant::Instant;
use ndarray::{s, Array4, ArrayD, ArrayView4, Axis, Ix4};
use std::sync::Mutex;
use tracing::{info as trace_info, instrument};

/// Added to the feature variance before taking the square root
pub const ADAIN_EPSILON: f32 = 1e-5;

/// Per-channel mean and standard deviation of a `1xCxHxW` feature map
///
/// The variance is unbiased (divided by `H*W - 1`).
///
/// # Errors
/// - Batch size other than one, or an empty spatial extent
pub fn calc_mean_std(features: ArrayView4<'_, f32>) -> Result<(Vec<f32>, Vec<f32>)> {
    let (batch, _, height, width) = features.dim();
    if batch != 1 || height * width == 0 {
        return Err(SegifyError::processing(format!(
            "Expected a non-empty 1xCxHxW feature map, got {:?}",
            features.shape()
        )));
    }

    let n = (height * width) as f32;
    let dof = if height * width > 1 { n - 1.0 } else { 1.0 };
    let (means, stds): (Vec<f32>, Vec<f32>) = features
        .index_axis(Axis(0), 0)
        .outer_iter()
        .map(|plane| {
            let mean = plane.sum() / n;
            let var = plane.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / dof;
            (mean, (var + ADAIN_EPSILON).sqrt())
        })
        .unzip();
    Ok((means, stds))
}

/// Give `content` the per-channel statistics of `style`
///
/// # Errors
/// - Feature maps with different channel counts
pub fn adaptive_instance_normalization(
    content: ArrayView4<'_, f32>,
    style: ArrayView4<'_, f32>,
) -> Result<Array4<f32>> {
    if content.dim().1 != style.dim().1 {
        return Err(SegifyError::processing(format!(
            "Content features have {} channels, style features {}",
            content.dim().1,
            style.dim().1
        )));
    }
    let (content_mean, content_std) = calc_mean_std(content)?;
    let (style_mean, style_std) = calc_mean_std(style)?;

    let mut out = content.to_owned();
    for (c, mut plane) in out.index_axis_mut(Axis(0), 0).outer_iter_mut().enumerate() {
        let (cm, cs) = (content_mean[c], content_std[c]);
        let (sm, ss) = (style_mean[c], style_std[c]);
        plane.mapv_inplace(|v| (v - cm) / cs * ss + sm);
    }
    Ok(out)
}

/// `stylized * alpha + content * (1 - alpha)`
#[must_use]
pub fn blend_features(
    stylized: &Array4<f32>,
    content: ArrayView4<'_, f32>,
    alpha: f32,
) -> Array4<f32> {
    stylized * alpha + &content * (1.0 - alpha)
}

/// Resize the shorter side to `size` (bilinear) and optionally center-crop to
/// `size x size`; a zero size leaves the image untouched
#[must_use]
pub fn prepare_image(image: &RgbImage, size: u32, crop: bool) -> RgbImage {
    if size == 0 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let (new_width, new_height) = if width <= height {
        let scaled = (u64::from(height) * u64::from(size) / u64::from(width.max(1))) as u32;
        (size, scaled.max(1))
    } else {
        let scaled = (u64::from(width) * u64::from(size) / u64::from(height.max(1))) as u32;
        (scaled.max(1), size)
    };
    let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);
    if !crop {
        return resized;
    }

    let side = size.min(new_width).min(new_height);
    let left = (new_width - side) / 2;
    let top = (new_height - side) / 2;
    image::imageops::crop_imm(&resized, left, top, side, side).to_image()
}

/// AdaIN encoder/decoder pair
pub struct AdainStylizer {
    encoder: SharedBackend,
    decoder: SharedBackend,
    options: StyleConfig,
}

impl AdainStylizer {
    pub fn new(
        encoder: Box<dyn InferenceBackend>,
        decoder: Box<dyn InferenceBackend>,
        options: StyleConfig,
    ) -> Self {
        Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            options,
        }
    }

    /// Create and initialize both graphs from the model cache
    ///
    /// # Errors
    /// - Either graph is missing or fails to load
    pub fn load(
        factory: &dyn BackendFactory,
        config: &SegifyConfig,
        cache: &ModelCache,
    ) -> Result<Self> {
        let [encoder, decoder]: [Box<dyn InferenceBackend>; 2] =
            load_backends(factory, config, cache, ModelAsset::STYLIZATION)?
                .try_into()
                .map_err(|_| SegifyError::internal("Expected two stylization backends"))?;
        Ok(Self::new(encoder, decoder, config.style.clone()))
    }

    #[must_use]
    pub fn options(&self) -> &StyleConfig {
        &self.options
    }

    fn encode(backend: &mut dyn InferenceBackend, image: Array4<f32>) -> Result<Array4<f32>> {
        first_output(backend.run(vec![image.into_dyn()])?, "Style encoder")
    }
}

fn first_output(outputs: Vec<ArrayD<f32>>, graph: &str) -> Result<Array4<f32>> {
    outputs
        .into_iter()
        .next()
        .ok_or_else(|| SegifyError::inference(format!("{graph} produced no output")))?
        .into_dimensionality::<Ix4>()
        .map_err(|e| SegifyError::inference(format!("{graph} output is not 4-D: {e}")))
}

impl Stylizer for AdainStylizer {
    #[instrument(skip(self, content, style))]
    fn stylize(&self, content: &RgbImage, style: &RgbImage, alpha: f32) -> Result<RgbImage> {
        assert!(
            (0.0..=1.0).contains(&alpha),
            "style blend weight must be within [0, 1], got {alpha}"
        );
        let start = Instant::now();

        let content = prepare_image(content, self.options.content_size, self.options.crop);
        let style = prepare_image(style, self.options.style_size, self.options.crop);
        let content_tensor = rgb_to_nchw(&content, Normalization::UNIT, None)?;
        let mut style_tensor = rgb_to_nchw(&style, Normalization::UNIT, None)?;
        if self.options.preserve_color {
            style_tensor = coral(style_tensor.view(), content_tensor.view())?;
            log::debug!("Style image recoloured to content statistics");
        }

        let (content_features, style_features) = {
            let mut encoder = lock_backend(&self.encoder, "Style encoder")?;
            (
                Self::encode(&mut **encoder, content_tensor)?,
                Self::encode(&mut **encoder, style_tensor)?,
            )
        };

        let transferred =
            adaptive_instance_normalization(content_features.view(), style_features.view())?;
        let features = blend_features(&transferred, content_features.view(), alpha);

        let decoded = {
            let mut decoder = lock_backend(&self.decoder, "Style decoder")?;
            first_output(decoder.run(vec![features.into_dyn()])?, "Style decoder")?
        };
        let image = nchw_to_rgb(decoded.slice(s![0..1, .., .., ..]))?;

        trace_info!(
            width = image.width(),
            height = image.height(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "stylization complete"
        );
        Ok(image)
    }
}

impl std::fmt::Debug for AdainStylizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdainStylizer")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::ScriptedBackend;
    use image::Rgb;

    fn identity_stylizer(preserve_color: bool) -> AdainStylizer {
        let options = StyleConfig {
            preserve_color,
            ..StyleConfig::default()
        };
        AdainStylizer::new(
            Box::new(ScriptedBackend::new(ModelAsset::StyleEncoder, Ok)),
            Box::new(ScriptedBackend::new(ModelAsset::StyleDecoder, Ok)),
            options,
        )
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 30) as u8, (y * 40) as u8, ((x + y) * 10) as u8])
        })
    }

    #[test]
    fn test_calc_mean_std() {
        let features = Array4::from_shape_vec((1, 2, 1, 2), vec![1.0, 3.0, 5.0, 5.0]).unwrap();
        let (mean, std) = calc_mean_std(features.view()).unwrap();
        assert_eq!(mean, vec![2.0, 5.0]);
        assert!((std[0] - (2.0f32 + ADAIN_EPSILON).sqrt()).abs() < 1e-6);
        assert!((std[1] - ADAIN_EPSILON.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_adain_transplants_statistics() {
        let content = Array4::from_shape_fn((1, 1, 4, 4), |(_, _, y, x)| (x + y) as f32);
        let style =
            Array4::from_shape_fn((1, 1, 2, 2), |(_, _, y, x)| 10.0 + 2.0 * (x * 2 + y) as f32);
        let out = adaptive_instance_normalization(content.view(), style.view()).unwrap();

        let (out_mean, out_std) = calc_mean_std(out.view()).unwrap();
        let (style_mean, style_std) = calc_mean_std(style.view()).unwrap();
        assert!((out_mean[0] - style_mean[0]).abs() < 1e-4);
        assert!((out_std[0] - style_std[0]).abs() < 1e-3);
    }

    #[test]
    fn test_adain_rejects_channel_mismatch() {
        let content = Array4::<f32>::zeros((1, 2, 2, 2));
        let style = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(adaptive_instance_normalization(content.view(), style.view()).is_err());
    }

    #[test]
    fn test_zero_weight_keeps_content_features() {
        let stylizer = identity_stylizer(false);
        let content = gradient(5, 4);
        let style = RgbImage::from_pixel(3, 3, Rgb([200, 10, 90]));
        let out = stylizer.stylize(&content, &style, 0.0).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn test_full_weight_takes_style_statistics() {
        let stylizer = identity_stylizer(false);
        let content = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let style = RgbImage::from_fn(2, 2, |x, _| {
            if x == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([204, 204, 204])
            }
        });
        let out = stylizer.stylize(&content, &style, 1.0).unwrap();
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.pixels().all(|p| *p == Rgb([102, 102, 102])));
    }

    #[test]
    fn test_preserve_color_runs_both_images_through_encoder() {
        let encoder = ScriptedBackend::new(ModelAsset::StyleEncoder, Ok);
        let calls = encoder.call_log();
        let stylizer = AdainStylizer::new(
            Box::new(encoder),
            Box::new(ScriptedBackend::new(ModelAsset::StyleDecoder, Ok)),
            StyleConfig::default(),
        );
        let out = stylizer.stylize(&gradient(4, 4), &gradient(6, 3), 0.5).unwrap();
        assert_eq!(out.dimensions(), (4, 4));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][0], vec![1, 3, 4, 4]);
        assert_eq!(calls[1][0], vec![1, 3, 3, 6]);
    }

    #[test]
    #[should_panic(expected = "blend weight")]
    fn test_out_of_range_weight_panics() {
        let stylizer = identity_stylizer(false);
        let image = gradient(2, 2);
        let _ = stylizer.stylize(&image, &image, 1.5);
    }

    #[test]
    fn test_prepare_image_resizes_shorter_side_and_crops() {
        let image = gradient(8, 4);
        assert_eq!(prepare_image(&image, 0, true).dimensions(), (8, 4));
        assert_eq!(prepare_image(&image, 2, false).dimensions(), (4, 2));
        assert_eq!(prepare_image(&image, 2, true).dimensions(), (2, 2));
    }
}
