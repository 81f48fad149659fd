//! Delegation to the router/backend.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the configured upstream
//! - Forward with a pooled hyper client under a timeout
//! - Map transport failures to gateway status codes
//!
//! # Design Decisions
//! - Only the final status of the response matters to the pipeline
//! - Connection errors → 502 Bad Gateway, timeouts → 504 Gateway Timeout
//! - Response bodies are streamed back, never buffered

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::UpstreamConfig;

/// Error building an upstream from configuration.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream url '{0}'")]
    InvalidUrl(String),
}

/// The router collaborator: takes an admitted request, returns a response.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: Request<Body>) -> Response;
}

/// Forwards every request to a single HTTP backend.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    authority: Authority,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let uri = Uri::from_str(&config.url).map_err(|_| UpstreamError::InvalidUrl(config.url.clone()))?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| UpstreamError::InvalidUrl(config.url.clone()))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            client,
            scheme,
            authority,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    fn rewrite(&self, uri: &Uri) -> Option<Uri> {
        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        Uri::from_parts(parts).ok()
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: Request<Body>) -> Response {
        let (mut parts, body) = request.into_parts();

        let Some(uri) = self.rewrite(&parts.uri) else {
            tracing::warn!(uri = %parts.uri, "Cannot rewrite request URI for upstream");
            return (StatusCode::BAD_GATEWAY, "Invalid upstream URI").into_response();
        };
        parts.uri = uri;

        let request = Request::from_parts(parts, body);
        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Ok(Err(e)) => {
                tracing::error!(upstream = %self.authority, error = %e, "Upstream error");
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
            Err(_) => {
                tracing::error!(upstream = %self.authority, timeout = ?self.timeout, "Upstream timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out").into_response()
            }
        }
    }
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("timeout", &self.timeout)
            .finish()
    }
}
