//! Segment previews for mask selection
//!
//! Each candidate is shown as the original image with the segment's pixels
//! darkened, captioned with its display label.

use crate::error::{Result, SegifyError};
use crate::types::{CandidateMasks, Mask};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Fraction by which segment pixels are darkened
pub const DEFAULT_BLENDING_FACTOR: f32 = 0.77;

/// One captioned overlay
#[derive(Debug, Clone)]
pub struct SegmentPreview {
    pub label: String,
    pub image: RgbImage,
}

impl SegmentPreview {
    /// File name used by [`save_previews`], e.g. `segment_1.png`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.png", self.label.to_lowercase().replace(' ', "_"))
    }
}

/// Darken the pixels of `image` inside `mask` by `blending_factor`
///
/// # Errors
/// - Mask and image dimensions differ
/// - `blending_factor` outside `[0, 1]`
pub fn overlay_mask(image: &RgbImage, mask: &Mask, blending_factor: f32) -> Result<RgbImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(SegifyError::processing(format!(
            "Mask {:?} does not match image {:?}",
            mask.dimensions(),
            image.dimensions()
        )));
    }
    if !(0.0..=1.0).contains(&blending_factor) {
        return Err(SegifyError::config_value_error(
            "blending factor",
            blending_factor,
            "0.0-1.0",
            Some(DEFAULT_BLENDING_FACTOR),
        ));
    }

    let keep = 1.0 - blending_factor;
    let mut out = image.clone();
    for (pixel, &member) in out.pixels_mut().zip(mask.as_slice()) {
        if member {
            let Rgb([r, g, b]) = *pixel;
            let scale = |v: u8| (f32::from(v) * keep).round().clamp(0.0, 255.0) as u8;
            *pixel = Rgb([scale(r), scale(g), scale(b)]);
        }
    }
    Ok(out)
}

/// One preview per candidate, in rank order
///
/// # Errors
/// - Any mask does not match the image
pub fn overlay_candidates(
    image: &RgbImage,
    candidates: &CandidateMasks,
    blending_factor: f32,
) -> Result<Vec<SegmentPreview>> {
    candidates
        .iter()
        .zip(candidates.labels())
        .map(|(mask, label)| {
            Ok(SegmentPreview {
                label,
                image: overlay_mask(image, mask, blending_factor)?,
            })
        })
        .collect()
}

/// Write previews as PNG files into `dir`, creating it if needed
///
/// # Errors
/// - Directory creation or encoding fails
pub fn save_previews(previews: &[SegmentPreview], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SegifyError::file_io_error("create preview directory", dir, &e))?;

    let mut paths = Vec::with_capacity(previews.len());
    for preview in previews {
        let path = dir.join(preview.file_name());
        preview
            .image
            .save_with_format(&path, image::ImageFormat::Png)?;
        log::debug!("Saved preview {}", path.display());
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_overlay_darkens_only_segment() {
        let image = RgbImage::from_pixel(2, 1, Rgb([100, 200, 0]));
        let mask = Mask::from_fn(2, 1, |x, _| x == 1);
        let out = overlay_mask(&image, &mask, DEFAULT_BLENDING_FACTOR).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 200, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([23, 46, 0]));
    }

    #[test]
    fn test_overlay_rejects_bad_input() {
        let image = RgbImage::new(2, 2);
        assert!(overlay_mask(&image, &Mask::filled(3, 2, true), 0.5).is_err());
        assert!(overlay_mask(&image, &Mask::filled(2, 2, true), 1.5).is_err());
    }

    #[test]
    fn test_candidates_are_labelled_and_saved() {
        let image = RgbImage::from_pixel(3, 3, Rgb([50, 50, 50]));
        let masks = vec![
            Arc::new(Mask::from_fn(3, 3, |x, _| x == 0)),
            Arc::new(Mask::filled(3, 3, true)),
        ];
        let candidates = CandidateMasks::rank_by_area(masks, 2);
        let previews = overlay_candidates(&image, &candidates, 1.0).unwrap();
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].label, "Segment 1");
        assert!(previews[0].image.pixels().all(|p| *p == Rgb([0, 0, 0])));

        let dir = tempfile::tempdir().unwrap();
        let paths = save_previews(&previews, &dir.path().join("previews")).unwrap();
        assert_eq!(paths[1].file_name().unwrap(), "segment_2.png");
        assert!(paths.iter().all(|p| p.exists()));
    }
}
