//! Automatic mask generation over a Segment-Anything encoder/decoder pair
//!
//! The image is embedded once, then the prompt decoder is queried with a
//! regular grid of single-point prompts. Each returned mask is filtered by
//! predicted quality and stability and deduplicated with a bounding-box
//! non-maximum suppression. Only box, area and score are kept per prompt;
//! the few survivors that are returned are decoded again and binarised.

use super::Segmenter;
use crate::cache::ModelCache;
use crate::config::{SegifyConfig, SegmentationConfig};
use crate::error::{Result, SegifyError};
use crate::inference::{
    load_backends, lock_backend, BackendFactory, InferenceBackend, SharedBackend,
};
use crate::models::ModelAsset;
use crate::types::{Mask, MaskCount};
use crate::utils::tensor::{rgb_to_nchw, Normalization};
use image::{imageops::FilterType, RgbImage};
use instant::Instant;
use ndarray::{Array, Array4, ArrayD, ArrayView2, Axis, Ix4, IxDyn};
use std::sync::Mutex;
use tracing::{debug as trace_debug, instrument};

/// Side of the square encoder input
pub const SAM_INPUT_SIZE: u32 = 1024;

/// Side of the (unused) low-resolution mask prompt
const MASK_INPUT_SIZE: usize = 256;

const PIXEL_NORMALIZATION: Normalization = Normalization {
    scale: 1.0,
    mean: [123.675, 116.28, 103.53],
    std: [58.395, 57.12, 57.375],
};

/// Largest number of masks handed back per image
pub const MAX_GENERATED_MASKS: usize = MaskCount::MAX as usize;

/// A decoder mask that passed the quality filters, without its pixels
#[derive(Debug, Clone, Copy, PartialEq)]
struct Proposal {
    prompt: usize,
    slot: usize,
    predicted_iou: f32,
    area: usize,
    bbox: (u32, u32, u32, u32),
}

/// Segment-Anything automatic mask generator
pub struct SamMaskGenerator {
    encoder: SharedBackend,
    decoder: SharedBackend,
    params: SegmentationConfig,
}

impl SamMaskGenerator {
    /// Wrap already-initialized encoder and decoder backends
    pub fn new(
        encoder: Box<dyn InferenceBackend>,
        decoder: Box<dyn InferenceBackend>,
        params: SegmentationConfig,
    ) -> Self {
        Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            params,
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
            load_backends(factory, config, cache, ModelAsset::SEGMENTATION)?
                .try_into()
                .map_err(|_| SegifyError::internal("Expected two segmentation backends"))?;
        Ok(Self::new(encoder, decoder, config.segmentation.clone()))
    }

    /// Prompt grid in original image coordinates, row by row
    #[must_use]
    pub fn grid_points(points_per_side: u32, width: u32, height: u32) -> Vec<(f32, f32)> {
        let n = points_per_side as f32;
        let mut points = Vec::with_capacity((points_per_side * points_per_side) as usize);
        for j in 0..points_per_side {
            for i in 0..points_per_side {
                points.push((
                    (i as f32 + 0.5) / n * width as f32,
                    (j as f32 + 0.5) / n * height as f32,
                ));
            }
        }
        points
    }

    /// Fraction of the mask that survives shifting the logit threshold by ±`offset`
    #[must_use]
    pub fn stability_score(logits: ArrayView2<'_, f32>, offset: f32) -> f32 {
        let mut intersections = 0usize;
        let mut unions = 0usize;
        for &value in logits {
            if value > offset {
                intersections += 1;
            }
            if value > -offset {
                unions += 1;
            }
        }
        if unions == 0 {
            0.0
        } else {
            intersections as f32 / unions as f32
        }
    }

    fn resize_scale(width: u32, height: u32) -> f32 {
        SAM_INPUT_SIZE as f32 / width.max(height) as f32
    }

    fn embed(&self, image: &RgbImage) -> Result<ArrayD<f32>> {
        let (width, height) = image.dimensions();
        let scale = Self::resize_scale(width, height);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, SAM_INPUT_SIZE);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, SAM_INPUT_SIZE);
        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let side = SAM_INPUT_SIZE as usize;
        let tensor = rgb_to_nchw(&resized, PIXEL_NORMALIZATION, Some((side, side)))?;

        let start = Instant::now();
        let outputs =
            lock_backend(&self.encoder, "Segmentation encoder")?.run(vec![tensor.into_dyn()])?;
        trace_debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "image embedding computed"
        );
        outputs
            .into_iter()
            .next()
            .ok_or_else(|| SegifyError::inference("Segmentation encoder produced no output"))
    }

    fn prompt_inputs(
        embedding: &ArrayD<f32>,
        point: (f32, f32),
        scale: f32,
        width: u32,
        height: u32,
    ) -> Result<Vec<ArrayD<f32>>> {
        let shape_error =
            |e: ndarray::ShapeError| SegifyError::processing(format!("Prompt tensor: {e}"));
        // One positive point plus the padding point (label -1)
        let coords = Array::from_shape_vec(
            IxDyn(&[1, 2, 2]),
            vec![point.0 * scale, point.1 * scale, 0.0, 0.0],
        )
        .map_err(shape_error)?;
        let labels = Array::from_shape_vec(IxDyn(&[1, 2]), vec![1.0, -1.0]).map_err(shape_error)?;
        let mask_input = ArrayD::<f32>::zeros(IxDyn(&[1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE]));
        let has_mask_input = Array::from_shape_vec(IxDyn(&[1]), vec![0.0]).map_err(shape_error)?;
        let orig_size = Array::from_shape_vec(IxDyn(&[2]), vec![height as f32, width as f32])
            .map_err(shape_error)?;

        Ok(vec![
            embedding.clone(),
            coords,
            labels,
            mask_input,
            has_mask_input,
            orig_size,
        ])
    }

    /// Run the decoder for one prompt and check the response shapes
    fn decode(
        decoder: &mut dyn InferenceBackend,
        embedding: &ArrayD<f32>,
        point: (f32, f32),
        scale: f32,
        width: u32,
        height: u32,
    ) -> Result<(Array4<f32>, Vec<f32>)> {
        let inputs = Self::prompt_inputs(embedding, point, scale, width, height)?;
        let mut outputs = decoder.run(inputs)?.into_iter();
        let (Some(masks), Some(scores)) = (outputs.next(), outputs.next()) else {
            return Err(SegifyError::inference(
                "Segmentation decoder must return masks and quality scores",
            ));
        };

        let masks = masks.into_dimensionality::<Ix4>().map_err(|e| {
            SegifyError::inference(format!("Unexpected decoder mask shape: {e}"))
        })?;
        let (_, mask_count, mask_height, mask_width) = masks.dim();
        if (mask_width, mask_height) != (width as usize, height as usize) {
            return Err(SegifyError::inference(format!(
                "Decoder returned {mask_width}x{mask_height} masks for a {width}x{height} image"
            )));
        }
        let scores: Vec<f32> = scores.iter().copied().collect();
        if scores.len() < mask_count {
            return Err(SegifyError::inference(format!(
                "Decoder returned {} scores for {} masks",
                scores.len(),
                mask_count
            )));
        }
        Ok((masks, scores))
    }

    /// Filter one decoder response into proposals
    fn collect_proposals(
        &self,
        prompt: usize,
        masks: &Array4<f32>,
        scores: &[f32],
        proposals: &mut Vec<Proposal>,
    ) {
        let per_image = masks.index_axis(Axis(0), 0);
        for (slot, &predicted_iou) in scores.iter().take(masks.dim().1).enumerate() {
            if predicted_iou < self.params.pred_iou_threshold {
                continue;
            }
            let logits = per_image.index_axis(Axis(0), slot);
            let stability = Self::stability_score(logits, self.params.stability_score_offset);
            if stability < self.params.stability_score_threshold {
                continue;
            }
            let Some((area, bbox)) = footprint(logits) else {
                continue;
            };
            proposals.push(Proposal {
                prompt,
                slot,
                predicted_iou,
                area,
                bbox,
            });
        }
    }
}

/// Member count and inclusive bounding box of `logits > 0`
fn footprint(logits: ArrayView2<'_, f32>) -> Option<(usize, (u32, u32, u32, u32))> {
    let mut area = 0usize;
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for ((y, x), &value) in logits.indexed_iter() {
        if value <= 0.0 {
            continue;
        }
        area += 1;
        let (x, y) = (x as u32, y as u32);
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds.map(|bbox| (area, bbox))
}

/// The `limit` largest proposals, still in suppression order
///
/// Equal areas prefer the earlier proposal.
fn largest_in_order(proposals: Vec<Proposal>, limit: usize) -> Vec<Proposal> {
    let mut by_area: Vec<usize> = (0..proposals.len()).collect();
    by_area.sort_by_key(|&i| std::cmp::Reverse(proposals.get(i).map_or(0, |p| p.area)));
    by_area.truncate(limit);
    by_area.sort_unstable();
    by_area
        .into_iter()
        .filter_map(|i| proposals.get(i).copied())
        .collect()
}

impl Segmenter for SamMaskGenerator {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn generate(&self, image: &RgbImage) -> Result<Vec<Mask>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SegifyError::processing("Cannot segment an empty image"));
        }

        let embedding = self.embed(image)?;
        let scale = Self::resize_scale(width, height);
        let points = Self::grid_points(self.params.points_per_side, width, height);

        let start = Instant::now();
        let mut decoder = lock_backend(&self.decoder, "Segmentation decoder")?;
        let mut proposals = Vec::new();
        for (prompt, &point) in points.iter().enumerate() {
            let (masks, scores) =
                Self::decode(&mut **decoder, &embedding, point, scale, width, height)?;
            self.collect_proposals(prompt, &masks, &scores, &mut proposals);
        }
        trace_debug!(
            prompts = points.len(),
            proposals = proposals.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "prompt grid decoded"
        );

        let kept = non_max_suppression(proposals, self.params.box_nms_threshold);
        log::debug!("{} mask(s) left after suppression", kept.len());

        let selected = largest_in_order(kept, MAX_GENERATED_MASKS);
        let mut masks = Vec::with_capacity(selected.len());
        for proposal in &selected {
            let point = points.get(proposal.prompt).copied().ok_or_else(|| {
                SegifyError::internal(format!("Prompt {} out of range", proposal.prompt))
            })?;
            let (logits, _) =
                Self::decode(&mut **decoder, &embedding, point, scale, width, height)?;
            if proposal.slot >= logits.dim().1 {
                return Err(SegifyError::inference(format!(
                    "Decoder no longer returns mask {} for prompt {}",
                    proposal.slot, proposal.prompt
                )));
            }
            let plane = logits.index_axis(Axis(0), 0);
            let plane = plane.index_axis(Axis(0), proposal.slot);
            masks.push(Mask::new(width, height, plane.iter().map(|&v| v > 0.0).collect())?);
        }
        Ok(masks)
    }

    fn model_id(&self) -> String {
        let p = &self.params;
        format!(
            "sam-vit-b/pps{}/iou{}/stab{}/off{}/nms{}",
            p.points_per_side,
            p.pred_iou_threshold,
            p.stability_score_threshold,
            p.stability_score_offset,
            p.box_nms_threshold
        )
    }
}

impl std::fmt::Debug for SamMaskGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamMaskGenerator")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

fn box_iou(a: (u32, u32, u32, u32), b: (u32, u32, u32, u32)) -> f32 {
    let area = |(x0, y0, x1, y1): (u32, u32, u32, u32)| {
        (u64::from(x1 - x0) + 1) * (u64::from(y1 - y0) + 1)
    };
    let ix0 = a.0.max(b.0);
    let iy0 = a.1.max(b.1);
    let ix1 = a.2.min(b.2);
    let iy1 = a.3.min(b.3);
    let intersection = if ix1 >= ix0 && iy1 >= iy0 {
        area((ix0, iy0, ix1, iy1))
    } else {
        0
    };
    let union = area(a) + area(b) - intersection;
    intersection as f32 / union as f32
}

/// Keep proposals in descending predicted-quality order, dropping any whose
/// box overlaps an already kept box by more than `threshold`
fn non_max_suppression(mut proposals: Vec<Proposal>, threshold: f32) -> Vec<Proposal> {
    proposals.sort_by(|a, b| b.predicted_iou.total_cmp(&a.predicted_iou));
    let mut kept: Vec<Proposal> = Vec::new();
    for proposal in proposals {
        if kept
            .iter()
            .all(|k| box_iou(k.bbox, proposal.bbox) <= threshold)
        {
            kept.push(proposal);
        }
    }
    kept
}
