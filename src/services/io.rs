//! Image I/O operations service
//!
//! Keeps file decoding and encoding out of the workflow so it can be tested
//! with in-memory images.

use crate::{
    config::OutputFormat,
    error::{Result, SegifyError},
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Falls back to content sniffing when the extension is wrong.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use segify::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("input.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(SegifyError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref).map_err(|io_err| {
                    SegifyError::file_io_error("read image data", path_ref, &io_err)
                })?;

                image::load_from_memory(&data).map_err(|content_err| {
                    SegifyError::processing_stage_error(
                        "image loading",
                        &format!(
                            "Failed to decode image. Extension error: {}. Content error: {}",
                            e, content_err
                        ),
                        Some(&format!(
                            "path: {}, size: {} bytes",
                            path_ref.display(),
                            data.len()
                        )),
                    )
                })
            },
        }
    }

    /// Save an image as PNG or JPEG, creating parent directories
    ///
    /// JPEG output drops the alpha channel.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use segify::{services::ImageIOService, config::OutputFormat};
    /// use image::DynamicImage;
    ///
    /// # let image = DynamicImage::new_rgb8(100, 100);
    /// ImageIOService::save_image(&image, "output.jpg", OutputFormat::Jpeg, 90)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn save_image<P: AsRef<Path>>(
        image: &DynamicImage,
        path: P,
        format: OutputFormat,
        jpeg_quality: u8,
    ) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SegifyError::file_io_error("create output directory", parent, &e)
            })?;
        }

        let result = match format {
            OutputFormat::Png => image.save_with_format(path_ref, image::ImageFormat::Png),
            OutputFormat::Jpeg => {
                let file = File::create(path_ref)
                    .map_err(|e| SegifyError::file_io_error("create image file", path_ref, &e))?;
                let mut writer = BufWriter::new(file);
                let encoder = JpegEncoder::new_with_quality(&mut writer, jpeg_quality);
                DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
            },
        };

        result.map_err(|e| {
            SegifyError::processing_stage_error(
                "image save",
                &format!("Failed to save as {:?}: {}", format, e),
                Some(&format!("path: {}", path_ref.display())),
            )
        })
    }

    /// Check if a file path has a supported image extension (PNG or JPEG)
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        OutputFormat::from_path(path.as_ref()).is_some()
    }

    /// Lower-case extension of `path`, if it is a supported image format
    pub fn extension<P: AsRef<Path>>(path: P) -> Result<String> {
        let path_ref = path.as_ref();
        if !Self::is_supported_format(path_ref) {
            return Err(SegifyError::unsupported_format(format!(
                "{} (expected .png, .jpg or .jpeg)",
                path_ref.display()
            )));
        }
        Ok(path_ref
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default())
    }

    /// Load an image from bytes
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| {
            SegifyError::processing(format!("Failed to decode image from bytes: {}", e))
        })
    }

    /// Load an image from an async reader
    ///
    /// # Examples
    /// ```rust,no_run
    /// use segify::services::ImageIOService;
    /// use tokio::fs::File;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let file = File::open("image.jpg").await?;
    /// let image = ImageIOService::load_from_reader(file).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load_from_reader<R: tokio::io::AsyncRead + Unpin>(
        mut reader: R,
    ) -> Result<DynamicImage> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        AsyncReadExt::read_to_end(&mut reader, &mut buffer)
            .await
            .map_err(|e| SegifyError::processing(format!("Failed to read from stream: {}", e)))?;

        Self::load_from_bytes(&buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_supported_format() {
        assert!(ImageIOService::is_supported_format("test.jpg"));
        assert!(ImageIOService::is_supported_format("test.JPEG"));
        assert!(ImageIOService::is_supported_format("test.png"));

        assert!(!ImageIOService::is_supported_format("test.webp"));
        assert!(!ImageIOService::is_supported_format("test.txt"));
        assert!(!ImageIOService::is_supported_format("test"));
    }

    #[test]
    fn test_extension() {
        assert_eq!(ImageIOService::extension("a/b/Photo.JPG").unwrap(), "jpg");
        assert!(matches!(
            ImageIOService::extension("notes.txt"),
            Err(SegifyError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ImageIOService::load_image("nonexistent.jpg");
        assert!(result.is_err());

        if let Err(e) = result {
            assert!(e.to_string().contains("does not exist"));
        }
    }

    #[test]
    fn test_save_image_creates_directory() {
        let temp_dir = tempdir().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dir").join("test.png");

        let image = DynamicImage::new_rgb8(1, 1);
        ImageIOService::save_image(&image, &nested_path, OutputFormat::Png, 90).unwrap();

        assert!(nested_path.exists());
    }

    #[test]
    fn test_png_round_trip_keeps_pixels() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rgba.png");
        let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            3,
            2,
            image::Rgba([10, 20, 30, 128]),
        ));

        ImageIOService::save_image(&image, &path, OutputFormat::Png, 90).unwrap();
        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!(loaded.to_rgba8(), image.to_rgba8());
    }

    #[test]
    fn test_jpeg_drops_alpha() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("out.jpg");
        let image = DynamicImage::new_rgba8(4, 4);

        ImageIOService::save_image(&image, &path, OutputFormat::Jpeg, 80).unwrap();
        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!(loaded.color(), image::ColorType::Rgb8);
        assert_eq!((loaded.width(), loaded.height()), (4, 4));
    }

    #[test]
    fn test_load_with_wrong_extension_sniffs_content() {
        let temp_dir = tempdir().unwrap();
        let png_path = temp_dir.path().join("real.png");
        let misnamed = temp_dir.path().join("real.jpg");
        ImageIOService::save_image(&DynamicImage::new_rgb8(2, 2), &png_path, OutputFormat::Png, 90)
            .unwrap();
        std::fs::rename(&png_path, &misnamed).unwrap();

        let loaded = ImageIOService::load_image(&misnamed).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (2, 2));
    }

    #[test]
    fn test_load_from_bytes_invalid() {
        assert!(ImageIOService::load_from_bytes(b"not an image").is_err());
        assert!(ImageIOService::load_from_bytes(&[]).is_err());
    }

    #[tokio::test]
    async fn test_load_from_reader() {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(5, 3)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let image = ImageIOService::load_from_reader(bytes.as_slice()).await.unwrap();
        assert_eq!((image.width(), image.height()), (5, 3));
    }
}
