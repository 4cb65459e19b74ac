//! Lookup backend
//!
//! The REST surface consumed by the engine, behind the [`LookupBackend`]
//! trait, plus the reqwest implementation. Transport outcomes are mapped to
//! the error taxonomy here so nothing above this layer sees a raw
//! `reqwest::Error`.

use crate::config::LookupConfig;
use crate::credentials::CredentialProvider;
use crate::error::{LookupError, Result};
use crate::models::{GeographyFilter, LocationEntry};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// `GET /search/cedula/{id}` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CedulaResponse {
    pub found: bool,
    #[serde(default, rename = "type")]
    pub person_type: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub external_data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CedulaResponse {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            found: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Body of every list-returning search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[async_trait]
pub trait LookupBackend: Send + Sync {
    async fn cedula(&self, id: &str, enrich: bool) -> Result<CedulaResponse>;
    async fn telefono(&self, phone: &str) -> Result<ListResponse>;
    async fn name(&self, term: &str) -> Result<ListResponse>;
    async fn geografica(&self, filter: &GeographyFilter) -> Result<ListResponse>;
    async fn provincias(&self) -> Result<Vec<LocationEntry>>;
    async fn cantones(&self, provincia_id: &str) -> Result<Vec<LocationEntry>>;
    async fn distritos(&self, canton_id: &str) -> Result<Vec<LocationEntry>>;
    async fn health(&self) -> Result<HealthStatus>;
}

/// REST client for the lookup service.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(config: &LookupConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| LookupError::Config(format!("invalid base URL '{}': {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(LookupError::Config(format!(
                "base URL '{}' cannot carry a path",
                config.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("cr-lookup/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| LookupError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            timeout: config.timeout(),
            credentials,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::Config(format!("base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn transport_error(&self, e: reqwest::Error) -> LookupError {
        if e.is_timeout() {
            LookupError::Network(format!("request timed out after {:?}", self.timeout))
        } else {
            LookupError::Network(e.to_string())
        }
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder, token: &str) -> Result<reqwest::Response> {
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }

    /// Sends with the current credential; on 401 refreshes once and resends.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self
            .credentials
            .get()
            .await?
            .ok_or_else(|| LookupError::Unauthorized("no credential available".to_string()))?;

        let response = self.dispatch(build(&self.http), &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Backend rejected credential, attempting refresh");
        let refreshed = match self.credentials.refresh().await {
            Ok(Some(fresh)) => fresh,
            Ok(None) | Err(_) => {
                self.credentials.clear().await;
                return Err(LookupError::Unauthorized("credential expired".to_string()));
            }
        };

        let response = self.dispatch(build(&self.http), &refreshed).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.credentials.clear().await;
            return Err(LookupError::Unauthorized(
                "credential rejected after refresh".to_string(),
            ));
        }
        Ok(response)
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        };
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LookupError::Unauthorized(detail),
            s if s.is_server_error() => LookupError::Server(detail),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => LookupError::Network(detail),
            s if s.is_client_error() => LookupError::Validation(detail),
            _ => LookupError::Server(detail),
        })
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET where a 404 means "nothing here" rather than an error.
    async fn get_or_default<T>(&self, url: Url) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        debug!("GET {}", url);
        let response = self.send(|http| http.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(T::default());
        }
        let response = self.check_status(response).await?;
        self.decode(response).await
    }
}

#[async_trait]
impl LookupBackend for HttpBackend {
    async fn cedula(&self, id: &str, enrich: bool) -> Result<CedulaResponse> {
        let mut url = self.endpoint(&["search", "cedula", id])?;
        url.query_pairs_mut()
            .append_pair("enrich", if enrich { "true" } else { "false" });
        debug!("GET {}", url);

        let response = self.send(|http| http.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(CedulaResponse::not_found(format!(
                "No se encontró información para la cédula {}",
                id
            )));
        }
        let response = self.check_status(response).await?;
        self.decode(response).await
    }

    async fn telefono(&self, phone: &str) -> Result<ListResponse> {
        let url = self.endpoint(&["search", "telefono", phone])?;
        self.get_or_default(url).await
    }

    async fn name(&self, term: &str) -> Result<ListResponse> {
        let url = self.endpoint(&["search", "name", term])?;
        self.get_or_default(url).await
    }

    async fn geografica(&self, filter: &GeographyFilter) -> Result<ListResponse> {
        let url = self.endpoint(&["search", "geografica"])?;
        debug!("POST {}", url);
        let response = self.send(|http| http.post(url.clone()).json(filter)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ListResponse::default());
        }
        let response = self.check_status(response).await?;
        self.decode(response).await
    }

    async fn provincias(&self) -> Result<Vec<LocationEntry>> {
        let url = self.endpoint(&["locations", "provincias"])?;
        self.get_or_default(url).await
    }

    async fn cantones(&self, provincia_id: &str) -> Result<Vec<LocationEntry>> {
        let url = self.endpoint(&["locations", "cantones", provincia_id])?;
        self.get_or_default(url).await
    }

    async fn distritos(&self, canton_id: &str) -> Result<Vec<LocationEntry>> {
        let url = self.endpoint(&["locations", "distritos", canton_id])?;
        self.get_or_default(url).await
    }

    async fn health(&self) -> Result<HealthStatus> {
        let url = self.endpoint(&["health"])?;
        debug!("GET {}", url);
        let response = self.send(|http| http.get(url.clone())).await?;
        let response = self.check_status(response).await?;
        self.decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;

    fn backend(base_url: &str) -> HttpBackend {
        let config = LookupConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        HttpBackend::new(&config, Arc::new(StaticCredentials::new(Some("t".into())))).unwrap()
    }

    #[test]
    fn test_endpoint_joins_and_encodes_segments() {
        let url = backend("http://localhost:8001/api/")
            .endpoint(&["search", "name", "José María"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8001/api/search/name/Jos%C3%A9%20Mar%C3%ADa");

        let url = backend("http://localhost:8001/api")
            .endpoint(&["locations", "provincias"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8001/api/locations/provincias");
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let config = LookupConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        let err = HttpBackend::new(&config, Arc::new(StaticCredentials::new(None)))
            .err()
            .unwrap();
        assert!(matches!(err, LookupError::Config(_)));
    }
}
