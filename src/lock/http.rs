//! HTTP Lock Backend
//!
//! Client for the coordination server in [`crate::api`]. Status codes are
//! mapped onto the store error taxonomy so the election loop can tell a lost
//! race from an outage from a misconfiguration.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::record::{LeaseKey, LeaseRecord, ResourceVersion, VersionedRecord};
use super::store::LeaseBackend;
use crate::error::{Error, Result};

// ============ Wire Types ============

/// Body of a compare-and-swap request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub record: LeaseRecord,
    pub version: ResourceVersion,
}

/// Version issued by a successful write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: ResourceVersion,
}

/// One entry of the lease listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseEntry {
    pub namespace: String,
    pub name: String,
    pub record: LeaseRecord,
    pub version: ResourceVersion,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Client ============

/// Lock records held by a remote coordination server
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl HttpBackend {
    /// Create a client for the server at `endpoint`
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        let mut endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            endpoint = format!("http://{}", endpoint);
        }
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid store endpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!("Invalid store endpoint {}", endpoint)));
        }

        Ok(Self {
            client,
            endpoint,
            auth_token,
        })
    }

    /// Endpoint URL extended with percent-encoded path segments
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn lease_url(&self, key: &LeaseKey) -> Url {
        self.url(&["leases", &key.namespace, &key.name])
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("{}: {}", self.endpoint, e)))
    }
}

/// Map a non-success response onto the store error taxonomy
async fn status_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let detail = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };

    match status {
        StatusCode::CONFLICT => Error::Conflict,
        StatusCode::NOT_FOUND => Error::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::StoreAuthFailure(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::StoreMalformedRecord(detail)
        }
        _ => Error::StoreUnavailable(format!("{}: {}", status, detail)),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::StoreUnavailable(format!("Failed to read response: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::StoreMalformedRecord(format!("Undecodable response: {}", e)))
}

#[async_trait]
impl LeaseBackend for HttpBackend {
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedRecord>> {
        let response = self.send(self.client.get(self.lease_url(key))).await?;
        match response.status() {
            StatusCode::OK => Ok(Some(decode(response).await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(response).await),
        }
    }

    async fn create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<ResourceVersion> {
        let response = self
            .send(self.client.post(self.lease_url(key)).json(record))
            .await?;
        if response.status().is_success() {
            let body: VersionResponse = decode(response).await?;
            Ok(body.version)
        } else {
            Err(status_error(response).await)
        }
    }

    async fn update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        let body = UpdateRequest {
            record: record.clone(),
            version: expected.clone(),
        };
        let response = self
            .send(self.client.put(self.lease_url(key)).json(&body))
            .await?;
        if response.status().is_success() {
            let body: VersionResponse = decode(response).await?;
            Ok(body.version)
        } else {
            Err(status_error(response).await)
        }
    }

    async fn list(&self) -> Result<Vec<(LeaseKey, VersionedRecord)>> {
        let url = self.url(&["leases"]);
        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let entries: Vec<LeaseEntry> = decode(response).await?;
        Ok(entries
            .into_iter()
            .map(|e| {
                (
                    LeaseKey::new(e.namespace, e.name),
                    VersionedRecord {
                        record: e.record,
                        version: e.version,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalization() {
        let backend =
            HttpBackend::new("127.0.0.1:8080/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            backend.lease_url(&LeaseKey::new("default", "example")).as_str(),
            "http://127.0.0.1:8080/leases/default/example"
        );
        assert_eq!(backend.url(&["leases"]).as_str(), "http://127.0.0.1:8080/leases");

        let prefixed =
            HttpBackend::new("http://coord:9000/lk/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            prefixed.lease_url(&LeaseKey::new("default", "example")).as_str(),
            "http://coord:9000/lk/leases/default/example"
        );
    }

    #[test]
    fn test_lease_url_escapes_segments() {
        let backend =
            HttpBackend::new("http://127.0.0.1:8080", None, Duration::from_secs(1)).unwrap();
        let url = backend.lease_url(&LeaseKey::new("team/a", "job?x#1"));
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/leases/team%2Fa/job%3Fx%231"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let backend =
            HttpBackend::new("http://127.0.0.1:1", None, Duration::from_millis(500)).unwrap();
        let err = backend
            .get(&LeaseKey::new("default", "example"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(!err.is_fatal());
    }
}
