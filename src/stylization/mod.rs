//! Style transfer adapter
//!
//! [`Stylizer`] is the narrow contract the workflow depends on;
//! [`AdainStylizer`] implements it over pretrained encoder/decoder graphs.

mod adain;
mod color;

pub use adain::{
    adaptive_instance_normalization, blend_features, calc_mean_std, prepare_image, AdainStylizer,
    ADAIN_EPSILON,
};
pub use color::coral;

use crate::error::Result;
use image::RgbImage;
use std::sync::Arc;

/// Neural style transfer
pub trait Stylizer: Send + Sync {
    /// Render `content` in the style of `style`
    ///
    /// `alpha` interpolates between the content features (0.0) and the fully
    /// transferred features (1.0). The output size is whatever the model
    /// produces and may differ from `content`.
    ///
    /// # Panics
    /// - `alpha` outside `[0, 1]`
    ///
    /// # Errors
    /// - Inference or tensor conversion failures
    fn stylize(&self, content: &RgbImage, style: &RgbImage, alpha: f32) -> Result<RgbImage>;
}

impl<S: Stylizer + ?Sized> Stylizer for Arc<S> {
    fn stylize(&self, content: &RgbImage, style: &RgbImage, alpha: f32) -> Result<RgbImage> {
        (**self).stylize(content, style, alpha)
    }
}
