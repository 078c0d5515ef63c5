//! Resolving the stream URL.
//!
//! The stream endpoint is not fixed: the REST service hands out an expiring
//! URL in exchange for backend credentials and an optional message filter.
//!
//! ```text
//! GET <service>/v1/stream_url?filter={"event":"create"}
//! Accept: application/json
//! Enginio-Backend-Id: ...
//! Enginio-Backend-Secret: ...
//!
//! {"expiringUrl": "ws://stream.example.com/v1/stream?..."}
//! ```

use crate::error::Error;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const STREAM_URL_PATH: &str = "/v1/stream_url";
pub const BACKEND_ID_HEADER: &str = "Enginio-Backend-Id";
pub const BACKEND_SECRET_HEADER: &str = "Enginio-Backend-Secret";

/// Backend id and secret identifying the caller to the service.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub backend_id: String,
    pub backend_secret: String,
}

impl BackendCredentials {
    pub fn new(backend_id: impl Into<String>, backend_secret: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            backend_secret: backend_secret.into(),
        }
    }
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("backend_id", &self.backend_id)
            .field("backend_secret", &"<redacted>")
            .finish()
    }
}

/// Kind of object change a filter selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterEvent {
    Create,
    Update,
    Delete,
}

/// Server-side filter limiting which notifications the stream carries.
///
/// `{"data": {"objectType": "objects.todos"}, "event": "create"}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<FilterEvent>,
}

impl MessageFilter {
    /// Only notifications about objects of `object_type`.
    pub fn object_type(object_type: impl Into<String>) -> Self {
        Self {
            data: Some(serde_json::json!({ "objectType": object_type.into() })),
            event: None,
        }
    }

    pub fn with_event(mut self, event: FilterEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// A fully formed stream URL request, independent of the HTTP client.
#[derive(Clone, Debug)]
pub struct StreamUrlRequest {
    pub url: url::Url,
    pub headers: Vec<(&'static str, String)>,
}

/// Build the request for `service_url`.
pub fn build_request(
    service_url: &str,
    credentials: &BackendCredentials,
    filter: &MessageFilter,
) -> Result<StreamUrlRequest> {
    let mut url = url::Url::parse(service_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    let filter = serde_json::to_string(filter).map_err(|e| Error::Other(e.into()))?;
    url.set_path(STREAM_URL_PATH);
    url.set_query(Some(&format!("filter={}", filter)));
    Ok(StreamUrlRequest {
        url,
        headers: vec![
            ("Accept", "application/json".to_string()),
            (BACKEND_ID_HEADER, credentials.backend_id.clone()),
            (BACKEND_SECRET_HEADER, credentials.backend_secret.clone()),
        ],
    })
}

/// Pull `expiringUrl` out of the service reply.
pub fn parse_reply(body: &Value) -> Result<String> {
    body.get("expiringUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::StreamUrl("reply has no expiringUrl".into()))
}

/// Obtains a stream URL out of band.
#[async_trait]
pub trait StreamUrlResolver: Send + Sync {
    async fn resolve(
        &self,
        credentials: &BackendCredentials,
        filter: &MessageFilter,
    ) -> Result<String>;
}

/// Resolver that always returns the same URL.
#[derive(Clone, Debug)]
pub struct FixedStreamUrl(pub String);

#[async_trait]
impl StreamUrlResolver for FixedStreamUrl {
    async fn resolve(&self, _: &BackendCredentials, _: &MessageFilter) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(feature = "http")]
pub use http::HttpResolver;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::config::ConnectionConfig;

    /// Resolver asking the REST service over HTTP (requires `http` feature).
    #[derive(Clone, Debug)]
    pub struct HttpResolver {
        client: reqwest::Client,
        service_url: String,
    }

    impl HttpResolver {
        pub fn new(service_url: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                service_url: service_url.into(),
            }
        }

        /// Resolver for the service named by `config.service_url`.
        pub fn from_config(config: &ConnectionConfig) -> Self {
            Self::new(config.service_url.clone())
        }

        pub fn with_client(client: reqwest::Client, service_url: impl Into<String>) -> Self {
            Self {
                client,
                service_url: service_url.into(),
            }
        }
    }

    #[async_trait]
    impl StreamUrlResolver for HttpResolver {
        async fn resolve(
            &self,
            credentials: &BackendCredentials,
            filter: &MessageFilter,
        ) -> Result<String> {
            let request = build_request(&self.service_url, credentials, filter)?;
            tracing::debug!(url = %request.url, "requesting stream url");
            let mut builder = self.client.get(request.url);
            for (name, value) in request.headers {
                builder = builder.header(name, value);
            }
            let body: Value = builder
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| Error::StreamUrl(e.to_string()))?
                .json()
                .await
                .map_err(|e| Error::StreamUrl(e.to_string()))?;
            parse_reply(&body)
        }
    }

}
