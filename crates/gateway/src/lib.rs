//! Compute-provider plumbing: the provider seam, identifier resolution and the
//! text-formatting resource gateway used by the agent tools.

use std::sync::Arc;

use cloudpilot_core::config::{ComputeBackend, ComputeConfig};

pub mod http;
pub mod memory;
pub mod operations;
pub mod provider;
pub mod resolver;

pub use http::HttpComputeProvider;
pub use memory::InMemoryComputeProvider;
pub use operations::{launch_failure_text, ResourceGateway, VOLUME_TYPES};
pub use provider::{ComputeProvider, ProviderError};
pub use resolver::{IdentifierResolver, Resolution};

/// Builds the provider selected by `compute.backend`.
pub fn provider_from_config(
    config: &ComputeConfig,
) -> Result<Arc<dyn ComputeProvider>, ProviderError> {
    Ok(match config.backend {
        ComputeBackend::Memory => Arc::new(InMemoryComputeProvider::with_defaults()),
        ComputeBackend::Http => Arc::new(HttpComputeProvider::from_config(config)?),
    })
}
