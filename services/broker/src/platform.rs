//! Platform ownership lookups.
//!
//! The platform keeps its own record of which service instances exist. The
//! sweeper asks it whether an instance is still owned before deciding a
//! record or resource has drifted.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("platform returned {0}")]
    Status(StatusCode),

    #[error("invalid platform token format")]
    InvalidToken,

    #[error("platform unavailable")]
    Unavailable,
}

#[async_trait]
pub trait PlatformOwnership: Send + Sync {
    /// Whether the platform still knows the service instance.
    async fn instance_exists(&self, instance_id: &str) -> Result<bool, PlatformError>;
}

/// Looks instances up via `GET /v3/service_instances/{id}`.
#[derive(Debug, Clone)]
pub struct HttpPlatformOwnership {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlatformOwnership {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| PlatformError::InvalidToken)?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PlatformOwnership for HttpPlatformOwnership {
    async fn instance_exists(&self, instance_id: &str) -> Result<bool, PlatformError> {
        let url = format!("{}/v3/service_instances/{}", self.base_url, instance_id);
        let response = self.client.get(url).send().await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => {
                debug!(instance_id = %instance_id, "Platform has no such instance");
                Ok(false)
            }
            s => Err(PlatformError::Status(s)),
        }
    }
}

/// In-memory platform for tests and the `test` environment.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    instances: RwLock<BTreeSet<String>>,
    unavailable: RwLock<bool>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance_id: &str) {
        self.instances.write().await.insert(instance_id.to_string());
    }

    pub async fn remove(&self, instance_id: &str) {
        self.instances.write().await.remove(instance_id);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl PlatformOwnership for MemoryPlatform {
    async fn instance_exists(&self, instance_id: &str) -> Result<bool, PlatformError> {
        if *self.unavailable.read().await {
            return Err(PlatformError::Unavailable);
        }
        Ok(self.instances.read().await.contains(instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/service_instances/inst-1"))
            .and(header("authorization", "Bearer admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "guid": "inst-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/service_instances/inst-2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/service_instances/inst-3"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let platform =
            HttpPlatformOwnership::new(&server.uri(), Some("admin"), Duration::from_secs(5))
                .unwrap();
        assert!(platform.instance_exists("inst-1").await.unwrap());
        assert!(!platform.instance_exists("inst-2").await.unwrap());
        assert!(matches!(
            platform.instance_exists("inst-3").await,
            Err(PlatformError::Status(StatusCode::BAD_GATEWAY))
        ));
    }

    #[tokio::test]
    async fn test_memory_platform() {
        let platform = MemoryPlatform::new();
        platform.insert("inst-1").await;
        assert!(platform.instance_exists("inst-1").await.unwrap());
        platform.remove("inst-1").await;
        assert!(!platform.instance_exists("inst-1").await.unwrap());

        platform.set_unavailable(true).await;
        assert!(platform.instance_exists("inst-1").await.is_err());
    }
}
