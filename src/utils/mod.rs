//! Shared helpers: execution provider handling and tensor conversion

pub mod providers;
pub mod tensor;

pub use providers::{ExecutionProviderManager, ProviderInfo};
