//! HTTP client for the provider's resource-management API.
//!
//! Endpoints:
//! - `POST   /v1/resources`                         create
//! - `PATCH  /v1/resources/{name}`                  modify
//! - `GET    /v1/resources/{name}`                  describe (404 = absent)
//! - `DELETE /v1/resources/{name}`                  delete
//! - `GET    /v1/resources`                         list
//! - `PUT    /v1/resources/{name}/logins/{user}`    ensure login (201 = created)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LoginSpec, ResourceApi, ResourceDescription, ResourceModification, ResourceSpec};
use crate::error::{ProviderError, ProviderErrorKind};

/// Error body returned by the provider API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    resources: Vec<ResourceDescription>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    password: &'a str,
    database: &'a str,
}

/// Resource-management API client.
#[derive(Debug, Clone)]
pub struct HttpResourceApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceApi {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ProviderError::invalid_parameters("invalid provider token format"))?;
            headers.insert(AUTHORIZATION, value);
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

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into a classified provider error.
    async fn error_from(response: Response) -> ProviderError {
        let status = response.status();
        let body: Option<ErrorBody> = response.json().await.ok();

        let kind = body
            .as_ref()
            .and_then(|b| b.code.as_deref())
            .and_then(ProviderErrorKind::from_code)
            .unwrap_or_else(|| kind_for_status(status));
        let message = body
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("provider returned {status}"));

        warn!(status = %status, kind = %kind, message = %message, "Provider request failed");
        ProviderError::new(kind, message)
    }
}

fn kind_for_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderErrorKind::InvalidParameters
        }
        StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => ProviderErrorKind::QuotaExceeded,
        StatusCode::NOT_FOUND => ProviderErrorKind::NotFound,
        StatusCode::CONFLICT => ProviderErrorKind::Conflict,
        _ => ProviderErrorKind::ProviderUnavailable,
    }
}

#[async_trait]
impl ResourceApi for HttpResourceApi {
    async fn create_resource(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceDescription, ProviderError> {
        debug!(resource = %spec.name, engine = %spec.engine, "Creating provider resource");
        let response = self
            .client
            .post(self.url("/v1/resources"))
            .json(spec)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    async fn modify_resource(
        &self,
        modification: &ResourceModification,
    ) -> Result<ResourceDescription, ProviderError> {
        debug!(resource = %modification.name, "Modifying provider resource");
        let response = self
            .client
            .patch(self.url(&format!("/v1/resources/{}", modification.name)))
            .json(modification)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    async fn describe_resource(
        &self,
        name: &str,
    ) -> Result<Option<ResourceDescription>, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/resources/{name}")))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(Some(response.json().await?))
    }

    async fn delete_resource(&self, name: &str) -> Result<(), ProviderError> {
        debug!(resource = %name, "Deleting provider resource");
        let response = self
            .client
            .delete(self.url(&format!("/v1/resources/{name}")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescription>, ProviderError> {
        let response = self.client.get(self.url("/v1/resources")).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let list: ResourceList = response.json().await?;
        Ok(list.resources)
    }

    async fn ensure_login(&self, login: &LoginSpec) -> Result<bool, ProviderError> {
        debug!(resource = %login.resource_name, username = %login.username, "Ensuring login");
        let response = self
            .client
            .put(self.url(&format!(
                "/v1/resources/{}/logins/{}",
                login.resource_name, login.username
            )))
            .json(&LoginBody {
                password: &login.password,
                database: &login.database_name,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            s if s.is_success() => Ok(false),
            _ => Err(Self::error_from(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderResourceState;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpResourceApi {
        HttpResourceApi::new(&server.uri(), Some("t0ken"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_describe_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server).describe_resource("missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_describe_parses_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources/stratus-1"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "stratus-1",
                "state": "available",
                "host": "stratus-1.db.internal",
                "port": 5432
            })))
            .mount(&server)
            .await;

        let desc = client(&server)
            .describe_resource("stratus-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(desc.state, ProviderResourceState::Available);
        assert_eq!(desc.port, Some(5432));
    }

    #[tokio::test]
    async fn test_error_code_wins_over_status() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/resources/stratus-1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "quota_exceeded",
                "message": "too many snapshots"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .delete_resource("stratus-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::QuotaExceeded);
        assert_eq!(err.message, "too many snapshots");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).list_resources().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_ensure_login_reports_creation() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/stratus-1/logins/ufresh"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/stratus-1/logins/uexisting"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = client(&server);
        let login = |username: &str| LoginSpec {
            resource_name: "stratus-1".to_string(),
            username: username.to_string(),
            password: "pw".to_string(),
            database_name: "db1".to_string(),
        };

        assert!(api.ensure_login(&login("ufresh")).await.unwrap());
        assert!(!api.ensure_login(&login("uexisting")).await.unwrap());
    }
}
