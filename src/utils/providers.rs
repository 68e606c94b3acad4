//! Execution provider parsing and discovery

use crate::{
    config::{BackendType, ExecutionProvider},
    error::{Result, SegifyError},
};

/// Information about a `backend:provider` combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing and listing execution providers
#[derive(Debug)]
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a provider string in the form `backend:provider`
    ///
    /// A bare backend name selects that backend's default provider.
    ///
    /// # Examples
    /// ```rust
    /// use segify::utils::ExecutionProviderManager;
    /// use segify::{BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!(backend, BackendType::Onnx);
    /// assert_eq!(provider, ExecutionProvider::Cuda);
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    /// - A provider the backend does not support (Tract only runs on CPU)
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let Some((backend, provider)) = provider_str.split_once(':') else {
            return match provider_str {
                "onnx" | "tract" => {
                    let backend_type = if provider_str == "onnx" {
                        BackendType::Onnx
                    } else {
                        BackendType::Tract
                    };
                    Ok((backend_type, Self::default_provider_for_backend(backend_type)))
                },
                _ => Err(SegifyError::invalid_config(
                    "Invalid provider format. Use backend:provider (e.g., onnx:auto, tract:cpu)",
                )),
            };
        };

        match backend {
            "onnx" => {
                let execution_provider = match provider {
                    "auto" => ExecutionProvider::Auto,
                    "cpu" => ExecutionProvider::Cpu,
                    "cuda" => ExecutionProvider::Cuda,
                    "coreml" => ExecutionProvider::CoreMl,
                    _ => {
                        return Err(SegifyError::invalid_config(format!(
                            "Unknown ONNX provider: {provider}. Supported: auto, cpu, cuda, coreml"
                        )));
                    },
                };
                Ok((BackendType::Onnx, execution_provider))
            },
            "tract" => match provider {
                "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                _ => Err(SegifyError::invalid_config(format!(
                    "Unknown Tract provider: {provider}. Tract only supports 'cpu'"
                ))),
            },
            _ => Err(SegifyError::invalid_config(format!(
                "Unknown backend: {backend}. Supported backends: onnx, tract"
            ))),
        }
    }

    /// All provider combinations with their availability on this machine
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        let onnx_availability: Vec<(String, bool)> = crate::backends::OnnxBackend::list_providers()
            .into_iter()
            .map(|(name, available, _)| (name.to_lowercase(), available))
            .collect();
        #[cfg(not(feature = "onnx"))]
        let onnx_availability: Vec<(String, bool)> = Vec::new();

        let onnx_available = |name: &str| {
            onnx_availability
                .iter()
                .any(|(provider, available)| provider == name && *available)
        };

        for (provider, available, description) in [
            (
                ExecutionProvider::Auto,
                onnx_available("cpu"),
                "ONNX Runtime with auto-selected provider",
            ),
            (
                ExecutionProvider::Cpu,
                onnx_available("cpu"),
                "ONNX Runtime CPU execution",
            ),
            (
                ExecutionProvider::Cuda,
                onnx_available("cuda"),
                "ONNX Runtime CUDA GPU acceleration",
            ),
            (
                ExecutionProvider::CoreMl,
                onnx_available("coreml"),
                "ONNX Runtime CoreML (Apple Silicon) acceleration",
            ),
        ] {
            providers.push(ProviderInfo {
                name: Self::provider_to_string(BackendType::Onnx, provider),
                backend_type: BackendType::Onnx,
                execution_provider: provider,
                available,
                description: if cfg!(feature = "onnx") {
                    description.to_string()
                } else {
                    format!("{description} (feature disabled)")
                },
            });
        }

        providers.push(ProviderInfo {
            name: Self::provider_to_string(BackendType::Tract, ExecutionProvider::Cpu),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: cfg!(feature = "tract"),
            description: if cfg!(feature = "tract") {
                "Pure Rust CPU inference via Tract".to_string()
            } else {
                "Pure Rust CPU inference via Tract (feature disabled)".to_string()
            },
        });

        providers
    }

    /// Default provider for a backend
    #[must_use]
    pub fn default_provider_for_backend(backend_type: BackendType) -> ExecutionProvider {
        match backend_type {
            BackendType::Onnx => ExecutionProvider::Auto,
            BackendType::Tract => ExecutionProvider::Cpu,
        }
    }

    /// Format a backend/provider pair as `backend:provider`
    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_onnx_providers() {
        for (input, expected) in [
            ("onnx:auto", ExecutionProvider::Auto),
            ("onnx:cpu", ExecutionProvider::Cpu),
            ("onnx:cuda", ExecutionProvider::Cuda),
            ("onnx:coreml", ExecutionProvider::CoreMl),
        ] {
            let (backend, provider) =
                ExecutionProviderManager::parse_provider_string(input).unwrap();
            assert_eq!(backend, BackendType::Onnx);
            assert_eq!(provider, expected);
        }
    }

    #[test]
    fn test_parse_tract_providers() {
        let (backend, provider) =
            ExecutionProviderManager::parse_provider_string("tract:cpu").unwrap();
        assert_eq!(backend, BackendType::Tract);
        assert_eq!(provider, ExecutionProvider::Cpu);

        assert!(ExecutionProviderManager::parse_provider_string("tract:cuda").is_err());
        assert!(ExecutionProviderManager::parse_provider_string("tract:auto").is_err());
    }

    #[test]
    fn test_parse_backend_only() {
        let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx").unwrap();
        assert_eq!(backend, BackendType::Onnx);
        assert_eq!(provider, ExecutionProvider::Auto);

        let (backend, provider) = ExecutionProviderManager::parse_provider_string("tract").unwrap();
        assert_eq!(backend, BackendType::Tract);
        assert_eq!(provider, ExecutionProvider::Cpu);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ExecutionProviderManager::parse_provider_string("invalid").is_err());
        assert!(ExecutionProviderManager::parse_provider_string("onnx:invalid").is_err());
        assert!(ExecutionProviderManager::parse_provider_string("invalid:auto").is_err());
    }

    #[test]
    fn test_provider_to_string() {
        assert_eq!(
            ExecutionProviderManager::provider_to_string(
                BackendType::Onnx,
                ExecutionProvider::CoreMl
            ),
            "onnx:coreml"
        );
        assert_eq!(
            ExecutionProviderManager::provider_to_string(BackendType::Tract, ExecutionProvider::Cpu),
            "tract:cpu"
        );
    }

    #[test]
    fn test_list_all_providers() {
        let providers = ExecutionProviderManager::list_all_providers();
        let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"onnx:auto"));
        assert!(names.contains(&"tract:cpu"));
        assert_eq!(providers.len(), 5);
    }
}
