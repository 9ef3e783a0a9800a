use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use cloudpilot_core::config::ComputeConfig;
use cloudpilot_core::domain::instance::{
    InstanceDescriptor, InstanceId, KeyPair, LaunchRequest, SecurityGroup,
};

use crate::provider::{ComputeProvider, ProviderError};

/// JSON-over-HTTP compute API client scoped to one region.
///
/// Routes, relative to `{endpoint}/regions/{region}`:
/// `GET /instances`, `GET /instances/{id}`, `POST /instances`,
/// `POST /instances/{id}/start`, `POST /instances/{id}/stop`,
/// `GET /security-groups`, `GET /key-pairs`.
pub struct HttpComputeProvider {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct InstancesEnvelope {
    instances: Vec<InstanceDescriptor>,
}

#[derive(Deserialize)]
struct LaunchEnvelope {
    instance_id: InstanceId,
}

#[derive(Deserialize)]
struct SecurityGroupsEnvelope {
    security_groups: Vec<SecurityGroup>,
}

#[derive(Deserialize)]
struct KeyPairsEnvelope {
    key_pairs: Vec<KeyPair>,
}

#[derive(Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpComputeProvider {
    pub fn new(
        endpoint: &str,
        region: &str,
        api_token: &SecretString,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", api_token.expose_secret())).map_err(
                |error| ProviderError::Configuration(format!("invalid api token header: {error}")),
            )?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ProviderError::Configuration(format!("http client build failed: {error}"))
            })?;

        Ok(Self {
            client,
            base_url: format!("{}/regions/{}", endpoint.trim_end_matches('/'), region),
        })
    }

    pub fn from_config(config: &ComputeConfig) -> Result<Self, ProviderError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ProviderError::Configuration("compute.endpoint is required".to_string())
        })?;
        let api_token = config.api_token.as_ref().ok_or_else(|| {
            ProviderError::Configuration("compute.api_token is required".to_string())
        })?;
        Self::new(endpoint, &config.region, api_token, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request.send().await.map_err(from_reqwest)?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self.send(self.client.get(self.url(path))).await?;
        response.json::<T>().await.map_err(from_reqwest)
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        warn!(event_name = "gateway.provider_error", status = %status, "compute provider failed");
        return Err(ProviderError::Unavailable(format!("HTTP {status}")));
    }

    let envelope = serde_json::from_str::<ErrorEnvelope>(&body).unwrap_or_default();
    Err(ProviderError::Rejected {
        code: envelope.code.unwrap_or_else(|| status.as_u16().to_string()),
        message: envelope.message.unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request rejected").to_string()
            } else {
                body
            }
        }),
    })
}

fn from_reqwest(error: reqwest::Error) -> ProviderError {
    if error.is_decode() {
        ProviderError::Decode(error.to_string())
    } else {
        ProviderError::Unavailable(error.to_string())
    }
}

#[async_trait]
impl ComputeProvider for HttpComputeProvider {
    async fn describe_instances(&self) -> Result<Vec<InstanceDescriptor>, ProviderError> {
        Ok(self.get_json::<InstancesEnvelope>("/instances").await?.instances)
    }

    async fn describe_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceDescriptor>, ProviderError> {
        let request = self.client.get(self.url(&format!("/instances/{instance_id}")));
        let response = request.send().await.map_err(from_reqwest)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        response.json::<InstanceDescriptor>().await.map(Some).map_err(from_reqwest)
    }

    async fn start_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError> {
        self.send(self.client.post(self.url(&format!("/instances/{instance_id}/start"))))
            .await
            .map(|_| ())
    }

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError> {
        self.send(self.client.post(self.url(&format!("/instances/{instance_id}/stop"))))
            .await
            .map(|_| ())
    }

    async fn run_instance(&self, request: &LaunchRequest) -> Result<InstanceId, ProviderError> {
        let response = self.send(self.client.post(self.url("/instances")).json(request)).await?;
        let envelope = response.json::<LaunchEnvelope>().await.map_err(from_reqwest)?;
        Ok(envelope.instance_id)
    }

    async fn describe_security_groups(&self) -> Result<Vec<SecurityGroup>, ProviderError> {
        Ok(self.get_json::<SecurityGroupsEnvelope>("/security-groups").await?.security_groups)
    }

    async fn describe_key_pairs(&self) -> Result<Vec<KeyPair>, ProviderError> {
        Ok(self.get_json::<KeyPairsEnvelope>("/key-pairs").await?.key_pairs)
    }
}
