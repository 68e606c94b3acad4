//! Core value types shared by the segmentation, stylization and workflow layers

use crate::error::{Result, SegifyError};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Boolean per-pixel segment membership, same width/height as the content image
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// Create a mask from row-major pixel membership
    ///
    /// # Errors
    /// - `data.len()` does not equal `width * height`
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(SegifyError::processing(format!(
                "Mask data length {} does not match {}x{} ({} pixels)",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Mask with every pixel set to `value`
    #[must_use]
    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel
    pub fn from_fn<F: FnMut(u32, u32) -> bool>(width: u32, height: u32, mut f: F) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Membership of pixel `(x, y)`; out-of-bounds pixels are not members
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Number of member pixels
    #[must_use]
    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    /// Raw row-major membership data
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Inclusive bounding box `(x0, y0, x1, y1)` of member pixels
    #[must_use]
    pub fn bounding_box(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (index, _) in self.data.iter().enumerate().filter(|(_, &v)| v) {
            let x = (index % self.width as usize) as u32;
            let y = (index / self.width as usize) as u32;
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds
    }

    /// 8-bit opacity plane: members are 255 and the rest 0, or the reverse when `inverted`
    #[must_use]
    pub fn to_opacity_plane(&self, inverted: bool) -> GrayImage {
        let (on, off) = if inverted { (0u8, 255u8) } else { (255u8, 0u8) };
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { on } else { off }])
        })
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("area", &self.area())
            .finish()
    }
}

/// Masks ordered by descending area, truncated to the requested count
#[derive(Debug, Clone, Default)]
pub struct CandidateMasks {
    masks: Vec<Arc<Mask>>,
}

impl CandidateMasks {
    /// Rank generator output by area, largest first
    ///
    /// The sort is stable, so equal areas keep the generator's order. Fewer masks
    /// than `max_count` are returned as-is.
    #[must_use]
    pub fn rank_by_area(mut masks: Vec<Arc<Mask>>, max_count: usize) -> Self {
        masks.sort_by_key(|mask| std::cmp::Reverse(mask.area()));
        masks.truncate(max_count);
        Self { masks }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Mask at display rank `rank` (0-based)
    #[must_use]
    pub fn get(&self, rank: usize) -> Option<&Arc<Mask>> {
        self.masks.get(rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mask>> {
        self.masks.iter()
    }

    /// Pixel areas in rank order
    #[must_use]
    pub fn areas(&self) -> Vec<usize> {
        self.masks.iter().map(|mask| mask.area()).collect()
    }

    /// Display labels ("Segment 1", "Segment 2", ...)
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        (1..=self.masks.len())
            .map(|rank| format!("Segment {rank}"))
            .collect()
    }
}

/// Number of candidate masks to show, 1 through 10
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct MaskCount(u8);

impl MaskCount {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// # Errors
    /// - `count` outside `1..=10`
    pub fn new(count: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&count) {
            Ok(Self(count))
        } else {
            Err(SegifyError::config_value_error(
                "mask count",
                count,
                "1-10",
                None,
            ))
        }
    }

    #[must_use]
    pub fn get(self) -> usize {
        usize::from(self.0)
    }
}

impl Default for MaskCount {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl TryFrom<u8> for MaskCount {
    type Error = SegifyError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<MaskCount> for u8 {
    fn from(count: MaskCount) -> Self {
        count.0
    }
}

/// Degree of stylization, validated to `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct BlendWeight(f32);

impl BlendWeight {
    /// Full style statistics
    pub const FULL: Self = Self(1.0);

    /// # Errors
    /// - `weight` outside `[0.0, 1.0]` or NaN
    pub fn new(weight: f32) -> Result<Self> {
        if (0.0..=1.0).contains(&weight) {
            Ok(Self(weight))
        } else {
            Err(SegifyError::config_value_error(
                "blend weight",
                weight,
                "0.0-1.0",
                Some(1.0),
            ))
        }
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for BlendWeight {
    fn default() -> Self {
        Self::FULL
    }
}

impl TryFrom<f32> for BlendWeight {
    type Error = SegifyError;

    fn try_from(value: f32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BlendWeight> for f32 {
    fn from(weight: BlendWeight) -> Self {
        weight.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(size: u32, side: u32) -> Mask {
        Mask::from_fn(size, size, |x, y| x < side && y < side)
    }

    #[test]
    fn test_mask_area_and_bounds() {
        let mask = Mask::from_fn(10, 8, |x, y| (2..5).contains(&x) && (3..7).contains(&y));
        assert_eq!(mask.area(), 12);
        assert_eq!(mask.bounding_box(), Some((2, 3, 4, 6)));
        assert!(mask.get(2, 3));
        assert!(!mask.get(1, 3));
        assert!(!mask.get(100, 100));
    }

    #[test]
    fn test_mask_new_rejects_wrong_length() {
        assert!(Mask::new(4, 4, vec![true; 15]).is_err());
        assert!(Mask::new(4, 4, vec![true; 16]).is_ok());
    }

    #[test]
    fn test_empty_mask_has_no_bounds() {
        let mask = Mask::filled(5, 5, false);
        assert!(mask.is_empty());
        assert_eq!(mask.bounding_box(), None);
    }

    #[test]
    fn test_opacity_plane_inversion() {
        let mask = Mask::from_fn(2, 1, |x, _| x == 0);
        let direct = mask.to_opacity_plane(false);
        let inverted = mask.to_opacity_plane(true);
        assert_eq!(direct.get_pixel(0, 0)[0], 255);
        assert_eq!(direct.get_pixel(1, 0)[0], 0);
        assert_eq!(inverted.get_pixel(0, 0)[0], 0);
        assert_eq!(inverted.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_rank_by_area_orders_and_truncates() {
        let masks = vec![
            Arc::new(square_mask(20, 3)),
            Arc::new(square_mask(20, 10)),
            Arc::new(square_mask(20, 5)),
            Arc::new(square_mask(20, 1)),
        ];
        let ranked = CandidateMasks::rank_by_area(masks, 3);
        assert_eq!(ranked.areas(), vec![100, 25, 9]);
        assert_eq!(ranked.labels(), vec!["Segment 1", "Segment 2", "Segment 3"]);
    }

    #[test]
    fn test_rank_by_area_is_stable_for_ties() {
        let first = Arc::new(Mask::from_fn(4, 4, |x, _| x == 0));
        let second = Arc::new(Mask::from_fn(4, 4, |x, _| x == 3));
        let ranked = CandidateMasks::rank_by_area(vec![first.clone(), second.clone()], 10);
        assert_eq!(ranked.len(), 2);
        assert!(Arc::ptr_eq(ranked.get(0).unwrap(), &first));
        assert!(Arc::ptr_eq(ranked.get(1).unwrap(), &second));
    }

    #[test]
    fn test_mask_count_bounds() {
        assert!(MaskCount::new(0).is_err());
        assert!(MaskCount::new(11).is_err());
        assert_eq!(MaskCount::new(10).unwrap().get(), 10);
        assert_eq!(MaskCount::default().get(), 1);
    }

    #[test]
    fn test_blend_weight_bounds() {
        assert!(BlendWeight::new(-0.01).is_err());
        assert!(BlendWeight::new(1.01).is_err());
        assert!(BlendWeight::new(f32::NAN).is_err());
        assert_eq!(BlendWeight::new(0.0).unwrap().value(), 0.0);
        assert_eq!(BlendWeight::default().value(), 1.0);
    }

    #[test]
    fn test_blend_weight_serde_validates() {
        let parsed: std::result::Result<BlendWeight, _> = serde_json::from_str("1.5");
        assert!(parsed.is_err());
        let parsed: BlendWeight = serde_json::from_str("0.25").unwrap();
        assert_eq!(parsed.value(), 0.25);
    }
}
