//! Mask compositing: stylized pixels inside the segment, original pixels outside
//!
//! The mask becomes an 8-bit opacity plane that is resampled independently to
//! each image's size. The original gets the inverted plane as its alpha, the
//! stylized image gets the direct plane, and the stylized layer is composited
//! over the original. The original's dimensions are canonical for the result.

use crate::error::{Result, SegifyError};
use crate::types::Mask;
use image::{imageops, imageops::FilterType, GrayImage, Rgba, RgbImage, RgbaImage};
use instant::Instant;
use tracing::{debug as trace_debug, instrument};

const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// Combine `original` and `stylized` through `mask`
///
/// `stylized` may differ in size from `original`; it is resampled to the
/// original's dimensions after its alpha has been applied.
///
/// # Errors
/// - Any input has a zero dimension
#[instrument(skip_all, fields(original = ?original.dimensions(), stylized = ?stylized.dimensions(), mask = ?mask.dimensions()))]
pub fn combine(original: &RgbImage, stylized: &RgbImage, mask: &Mask) -> Result<RgbaImage> {
    for (name, (width, height)) in [
        ("original image", original.dimensions()),
        ("stylized image", stylized.dimensions()),
        ("mask", mask.dimensions()),
    ] {
        if width == 0 || height == 0 {
            return Err(SegifyError::processing(format!(
                "Cannot composite an empty {name} ({width}x{height})"
            )));
        }
    }
    let start = Instant::now();

    let original_alpha = fit_plane(mask.to_opacity_plane(true), original.dimensions());
    let stylized_alpha = fit_plane(mask.to_opacity_plane(false), stylized.dimensions());

    let background = with_alpha(original, &original_alpha);
    let mut foreground = with_alpha(stylized, &stylized_alpha);
    if foreground.dimensions() != background.dimensions() {
        log::debug!(
            "Resizing stylized layer {:?} -> {:?}",
            foreground.dimensions(),
            background.dimensions()
        );
        foreground = imageops::resize(
            &foreground,
            background.width(),
            background.height(),
            RESAMPLE_FILTER,
        );
    }

    let composited = alpha_composite(&background, &foreground)?;
    trace_debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "composite complete"
    );
    Ok(composited)
}

/// Porter-Duff "over" with straight (non-premultiplied) alpha
///
/// # Errors
/// - The layers differ in size
pub fn alpha_composite(background: &RgbaImage, foreground: &RgbaImage) -> Result<RgbaImage> {
    if background.dimensions() != foreground.dimensions() {
        return Err(SegifyError::processing(format!(
            "Layer sizes differ: {:?} vs {:?}",
            background.dimensions(),
            foreground.dimensions()
        )));
    }

    let mut out = RgbaImage::new(background.width(), background.height());
    for ((dst, bg), fg) in out
        .pixels_mut()
        .zip(background.pixels())
        .zip(foreground.pixels())
    {
        *dst = over(*bg, *fg);
    }
    Ok(out)
}

fn over(bg: Rgba<u8>, fg: Rgba<u8>) -> Rgba<u8> {
    let fg_a = f32::from(fg.0[3]) / 255.0;
    let bg_a = f32::from(bg.0[3]) / 255.0;
    let out_a = fg_a + bg_a * (1.0 - fg_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |f: u8, b: u8| {
        let value = (f32::from(f) * fg_a + f32::from(b) * bg_a * (1.0 - fg_a)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(fg.0[0], bg.0[0]),
        channel(fg.0[1], bg.0[1]),
        channel(fg.0[2], bg.0[2]),
        (out_a * 255.0).round() as u8,
    ])
}

fn fit_plane(plane: GrayImage, (width, height): (u32, u32)) -> GrayImage {
    if plane.dimensions() == (width, height) {
        plane
    } else {
        imageops::resize(&plane, width, height, RESAMPLE_FILTER)
    }
}

fn with_alpha(image: &RgbImage, alpha: &GrayImage) -> RgbaImage {
    let mut out = RgbaImage::new(image.width(), image.height());
    for ((dst, rgb), a) in out.pixels_mut().zip(image.pixels()).zip(alpha.pixels()) {
        *dst = Rgba([rgb.0[0], rgb.0[1], rgb.0[2], a.0[0]]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checker(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([250, 10, 10])
            } else {
                Rgb([10, 10, 250])
            }
        })
    }

    #[test]
    fn test_half_mask_picks_each_source() {
        let original = RgbImage::from_pixel(4, 2, Rgb([1, 2, 3]));
        let stylized = RgbImage::from_pixel(4, 2, Rgb([200, 100, 50]));
        let mask = Mask::from_fn(4, 2, |x, _| x >= 2);

        let out = combine(&original, &stylized, &mask).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        assert_eq!(out.get_pixel(3, 1), &Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn test_identical_inputs_round_trip() {
        let image = checker(6, 5);
        let mask = Mask::from_fn(6, 5, |x, y| x * y % 3 == 0);
        let out = combine(&image, &image, &mask).unwrap();
        for (a, b) in out.pixels().zip(image.pixels()) {
            assert_eq!(&a.0[..3], &b.0[..]);
        }
    }

    #[test]
    fn test_all_false_returns_original() {
        let original = checker(5, 5);
        let stylized = RgbImage::from_pixel(5, 5, Rgb([0, 255, 0]));
        let out = combine(&original, &stylized, &Mask::filled(5, 5, false)).unwrap();
        for (a, b) in out.pixels().zip(original.pixels()) {
            assert_eq!(a, &Rgba([b[0], b[1], b[2], 255]));
        }
    }

    #[test]
    fn test_all_true_resizes_stylized_to_original() {
        let original = checker(4, 4);
        let stylized = RgbImage::from_pixel(8, 6, Rgb([30, 60, 90]));
        let out = combine(&original, &stylized, &Mask::filled(4, 4, true)).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert!(out.pixels().all(|p| *p == Rgba([30, 60, 90, 255])));
    }

    #[test]
    fn test_over_semantics() {
        let bg = Rgba([0, 0, 200, 255]);
        assert_eq!(over(bg, Rgba([100, 0, 0, 0])), bg);
        assert_eq!(over(bg, Rgba([100, 0, 0, 255])), Rgba([100, 0, 0, 255]));
        assert_eq!(over(Rgba([0, 0, 0, 0]), Rgba([0, 0, 0, 0])), Rgba([0, 0, 0, 0]));
        let half = over(bg, Rgba([200, 0, 0, 128]));
        assert_eq!(half.0[3], 255);
        assert!((99..=101).contains(&half.0[0]));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let image = RgbImage::new(2, 2);
        assert!(combine(&RgbImage::new(0, 0), &image, &Mask::filled(2, 2, true)).is_err());
        assert!(combine(&image, &image, &Mask::filled(0, 3, true)).is_err());
    }

    #[test]
    fn test_layer_size_mismatch_is_rejected() {
        let a = RgbaImage::new(2, 2);
        let b = RgbaImage::new(3, 2);
        assert!(alpha_composite(&a, &b).is_err());
    }
}
