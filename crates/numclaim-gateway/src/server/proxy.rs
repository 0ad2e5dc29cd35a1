//! Outbound calls from the gateway to the backend.
//!
//! [`ProxyClient`] issues exactly one request per call, with no retries, and
//! folds transport failures into [`ProxyError`]. Any HTTP response, including
//! 4xx/5xx, is a successful forward: its status and body are handed back
//! untouched so the gateway can relay them verbatim.

use bytes::Bytes;
use core::time::Duration;
use numclaim_core::{FORWARDED_FOR_HEADER, ProcessRequest};
use reqwest::{
    StatusCode, Url,
    header::{CONTENT_TYPE, HeaderValue},
};

/// One admitted request on its way to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardRequest {
    /// The client's address; used for logging and forwarded to the backend in
    /// `X-Forwarded-For`.
    pub client_key: String,
    pub number: i64,
}

/// A response received from the backend, relayed as-is.
#[derive(Clone, Debug)]
pub struct BackendReply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// Transport failures, each mapping to a fixed gateway status.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Connect or read timeout elapsed (504).
    #[error("backend timed out")]
    Timeout,

    /// No connection could be established (502).
    #[error("backend unreachable")]
    Unreachable,

    /// Anything else, including a forwarding task that panicked (500).
    #[error("forwarding failed: {context}")]
    Internal { context: String },
}

impl From<ProxyError> for numclaim_core::Error {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Timeout => Self::DownstreamTimeout,
            ProxyError::Unreachable => Self::DownstreamUnreachable,
            ProxyError::Internal { context } => Self::Internal { context },
        }
    }
}

/// Executes a [`ForwardRequest`]. Implemented by [`ProxyClient`]; the worker
/// pool is generic over it so it can be driven without a network.
pub trait Forward: Send + Sync + 'static {
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> impl Future<Output = Result<BackendReply, ProxyError>> + Send;
}

/// HTTP client bound to one backend.
#[derive(Clone, Debug)]
pub struct ProxyClient {
    client: reqwest::Client,
    process_url: Url,
    health_url: Url,
    health_timeout: Duration,
}

impl ProxyClient {
    /// Builds a client for the backend at `base_url`. `timeout` bounds both
    /// connecting and the whole exchange.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed or `base_url` cannot be
    /// joined with the backend paths.
    pub fn new(base_url: &Url, timeout: Duration, health_timeout: Duration) -> anyhow::Result<Self> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            process_url: base.join("api/process")?,
            health_url: base.join("health")?,
            health_timeout,
        })
    }

    pub fn process_url(&self) -> &Url {
        &self.process_url
    }

    /// Probes the backend's `/health` endpoint and returns its status code.
    ///
    /// # Errors
    ///
    /// Returns a [`ProxyError`] if no response was received.
    pub async fn health(&self) -> Result<StatusCode, ProxyError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(classify)?;
        Ok(response.status())
    }
}

impl Forward for ProxyClient {
    #[tracing::instrument(skip_all, fields(client = %request.client_key, number = request.number))]
    async fn forward(&self, request: ForwardRequest) -> Result<BackendReply, ProxyError> {
        tracing::debug!("forwarding to {}", self.process_url);

        let response = self
            .client
            .post(self.process_url.clone())
            .header(FORWARDED_FOR_HEADER, request.client_key.as_str())
            .json(&ProcessRequest {
                number: request.number,
            })
            .send()
            .await
            .map_err(|e| log_failure(&request.client_key, e))?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| log_failure(&request.client_key, e))?;

        Ok(BackendReply {
            status,
            content_type,
            body,
        })
    }
}

fn log_failure(client_key: &str, err: reqwest::Error) -> ProxyError {
    let err = classify(err);
    match &err {
        ProxyError::Timeout => tracing::error!("Backend timeout for IP {client_key}"),
        ProxyError::Unreachable => tracing::error!("Cannot connect to backend from IP {client_key}"),
        ProxyError::Internal { context } => {
            tracing::error!("Unexpected error for IP {client_key}: {context}")
        }
    }
    err
}

/// Timeouts win over connect errors: a connect that timed out is a timeout.
fn classify(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else if err.is_connect() {
        ProxyError::Unreachable
    } else {
        ProxyError::Internal {
            context: err.to_string(),
        }
    }
}
