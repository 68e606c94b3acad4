//! Manifest of the pretrained graphs the workflow depends on

use crate::cache::ModelCache;
use crate::error::{Result, SegifyError};
use serde::{Deserialize, Serialize};
use std::fs;

/// Release location of the exported ONNX graphs, one file per asset
pub const DEFAULT_MODEL_BASE_URL: &str = "https://huggingface.co/segify/models/resolve/main";

/// A pretrained ONNX graph required by one of the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelAsset {
    /// Segment-Anything image encoder (ViT-B)
    SamEncoder,
    /// Segment-Anything prompt encoder and mask decoder
    SamDecoder,
    /// Normalised VGG-19 truncated at `relu4_1`
    StyleEncoder,
    /// Decoder mirroring the truncated VGG encoder
    StyleDecoder,
}

impl ModelAsset {
    pub const ALL: [Self; 4] = [
        Self::SamEncoder,
        Self::SamDecoder,
        Self::StyleEncoder,
        Self::StyleDecoder,
    ];

    /// Assets needed before segmentation can run
    pub const SEGMENTATION: [Self; 2] = [Self::SamEncoder, Self::SamDecoder];

    /// Assets needed before stylization can run
    pub const STYLIZATION: [Self; 2] = [Self::StyleEncoder, Self::StyleDecoder];

    /// Identifier used as the key in configured model URLs
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::SamEncoder => "sam_encoder",
            Self::SamDecoder => "sam_decoder",
            Self::StyleEncoder => "vgg_encoder",
            Self::StyleDecoder => "style_decoder",
        }
    }

    /// File name inside the model cache directory
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::SamEncoder => "sam_vit_b_encoder.onnx",
            Self::SamDecoder => "sam_vit_b_decoder.onnx",
            Self::StyleEncoder => "vgg_normalised.onnx",
            Self::StyleDecoder => "adain_decoder.onnx",
        }
    }

    /// Download URL of the asset under `base_url`
    #[must_use]
    pub fn url_under(self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.file_name())
    }

    /// Built-in download URL
    #[must_use]
    pub fn default_url(self) -> String {
        self.url_under(DEFAULT_MODEL_BASE_URL)
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::SamEncoder => "Segment Anything ViT-B image encoder",
            Self::SamDecoder => "Segment Anything prompt/mask decoder",
            Self::StyleEncoder => "VGG-19 encoder (normalised, up to relu4_1)",
            Self::StyleDecoder => "AdaIN style transfer decoder",
        }
    }

    /// Look up an asset by its id or file name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|asset| asset.id() == name || asset.file_name() == name)
    }

    /// Read the graph bytes from the cache
    ///
    /// # Errors
    /// - The asset has not been provisioned
    /// - The file cannot be read
    pub fn load_model_data(self, cache: &ModelCache) -> Result<Vec<u8>> {
        let path = cache.model_path(self.file_name());
        if !path.exists() {
            return Err(SegifyError::model(format!(
                "{} not found at {}; provision models first",
                self.description(),
                path.display()
            )));
        }
        fs::read(&path).map_err(|e| SegifyError::file_io_error("read model file", &path, &e))
    }
}

impl std::fmt::Display for ModelAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_groups_cover_all_assets() {
        let mut grouped: Vec<ModelAsset> = ModelAsset::SEGMENTATION
            .into_iter()
            .chain(ModelAsset::STYLIZATION)
            .collect();
        grouped.sort_by_key(|asset| asset.id());
        let mut all = ModelAsset::ALL.to_vec();
        all.sort_by_key(|asset| asset.id());
        assert_eq!(grouped, all);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            ModelAsset::from_name("vgg_encoder"),
            Some(ModelAsset::StyleEncoder)
        );
        assert_eq!(
            ModelAsset::from_name("adain_decoder.onnx"),
            Some(ModelAsset::StyleDecoder)
        );
        assert_eq!(ModelAsset::from_name("unknown"), None);
    }

    #[test]
    fn test_load_model_data() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();

        let err = ModelAsset::SamEncoder.load_model_data(&cache).unwrap_err();
        assert!(matches!(err, SegifyError::Model(_)));

        fs::write(cache.model_path("sam_vit_b_encoder.onnx"), b"onnx").unwrap();
        assert_eq!(
            ModelAsset::SamEncoder.load_model_data(&cache).unwrap(),
            b"onnx".to_vec()
        );
    }
}
