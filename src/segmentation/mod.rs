//! Segmentation adapter: candidate object masks for an image
//!
//! The adapter wraps a black-box mask generator ([`Segmenter`]). Generator
//! output is memoised in a [`MaskCache`] keyed by image content, then ranked
//! by area and truncated to the requested count on every call.

mod cache;
mod sam;

pub use cache::{CacheKey, MaskCache};
pub use sam::SamMaskGenerator;

use crate::error::Result;
use crate::types::{CandidateMasks, Mask, MaskCount};
use image::RgbImage;
use instant::Instant;
use std::sync::Arc;
use tracing::{info as trace_info, instrument};

/// Automatic mask generator
///
/// Implementations return every mask they find, in their own order, each with
/// the same dimensions as the input image.
pub trait Segmenter: Send + Sync {
    /// Generate masks for `image`
    ///
    /// # Errors
    /// - Inference or post-processing failures
    fn generate(&self, image: &RgbImage) -> Result<Vec<Mask>>;

    /// Identifier of the model and parameters, part of the cache key
    fn model_id(&self) -> String;
}

impl<S: Segmenter + ?Sized> Segmenter for Arc<S> {
    fn generate(&self, image: &RgbImage) -> Result<Vec<Mask>> {
        (**self).generate(image)
    }

    fn model_id(&self) -> String {
        (**self).model_id()
    }
}

/// Ranks and caches generator output
#[derive(Debug)]
pub struct SegmentationAdapter<S> {
    segmenter: S,
    cache: Arc<MaskCache>,
}

impl<S: Segmenter> SegmentationAdapter<S> {
    /// Wrap `segmenter`, sharing `cache` with other adapters
    pub fn new(segmenter: S, cache: Arc<MaskCache>) -> Self {
        Self { segmenter, cache }
    }

    /// The N largest masks for `image`, largest first
    ///
    /// The generator runs at most once per distinct image within the cache
    /// window. Equal areas keep generator order; fewer masks than requested are
    /// returned as-is.
    ///
    /// # Errors
    /// - The generator fails
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height(), max_count = max_count.get()))]
    pub fn segment(&self, image: &RgbImage, max_count: MaskCount) -> Result<CandidateMasks> {
        let key = CacheKey::for_image(image, &self.segmenter.model_id());

        let generated = if let Some(masks) = self.cache.get(&key) {
            log::debug!("Mask cache hit for {}", key);
            masks
        } else {
            let start = Instant::now();
            let masks: Arc<[Arc<Mask>]> = self
                .segmenter
                .generate(image)?
                .into_iter()
                .map(Arc::new)
                .collect();
            trace_info!(
                generated = masks.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "mask generation complete"
            );
            self.cache.insert(key, Arc::clone(&masks));
            masks
        };

        let candidates = CandidateMasks::rank_by_area(generated.to_vec(), max_count.get());
        log::info!(
            "🧩 {} candidate segment(s) (areas {:?})",
            candidates.len(),
            candidates.areas()
        );
        Ok(candidates)
    }

    /// Shared cache handle
    pub fn cache(&self) -> &Arc<MaskCache> {
        &self.cache
    }
}
