use async_trait::async_trait;
use thiserror::Error;

use cloudpilot_core::domain::instance::{
    InstanceDescriptor, InstanceId, KeyPair, LaunchRequest, SecurityGroup,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered and refused the call.
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
    /// The provider could not be reached or failed internally.
    #[error("compute provider unavailable: {0}")]
    Unavailable(String),
    #[error("could not decode compute provider response: {0}")]
    Decode(String),
    #[error("invalid compute provider configuration: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected { code: code.into(), message: message.into() }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Remote compute API. Implementations are stateless from the caller's view;
/// every call reads or mutates live provider state.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn describe_instances(&self) -> Result<Vec<InstanceDescriptor>, ProviderError>;

    async fn describe_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceDescriptor>, ProviderError>;

    async fn start_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError>;

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError>;

    async fn run_instance(&self, request: &LaunchRequest) -> Result<InstanceId, ProviderError>;

    async fn describe_security_groups(&self) -> Result<Vec<SecurityGroup>, ProviderError>;

    async fn describe_key_pairs(&self) -> Result<Vec<KeyPair>, ProviderError>;
}
