use crate::server::claim::ClaimService;
use crate::server::store::ClaimStore;
use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};
use bytes::Bytes;
use numclaim_core::{ClaimResponse, Error, FORWARDED_FOR_HEADER, parse_process_body};
use serde::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// Shared state for the backend's handlers.
pub struct BackendService<S> {
    claims: Arc<ClaimService<S>>,
    trust_forwarded_for: bool,
}

impl<S> Clone for BackendService<S> {
    fn clone(&self) -> Self {
        Self {
            claims: Arc::clone(&self.claims),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

impl<S: ClaimStore> BackendService<S> {
    pub fn new(store: S, trust_forwarded_for: bool) -> Self {
        Self {
            claims: Arc::new(ClaimService::new(store)),
            trust_forwarded_for,
        }
    }

    pub fn claims(&self) -> &ClaimService<S> {
        &self.claims
    }

    /// The identity a claim is recorded under.
    ///
    /// The peer address, unless forwarded identities are trusted and the
    /// first `X-Forwarded-For` entry is a valid IP address.
    fn identity(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        let forwarded = self
            .trust_forwarded_for
            .then(|| headers.get(FORWARDED_FOR_HEADER))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());

        forwarded.unwrap_or_else(|| peer.ip()).to_string()
    }
}

/// `POST /api/process`
pub async fn process<S: ClaimStore>(
    State(service): State<BackendService<S>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ClaimResponse>, Error> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let number = parse_process_body(content_type, &body)?;
    let user_ip = service.identity(&headers, peer);

    tracing::info!("Processing number {number} from IP {user_ip}");
    let claimed = service.claims.claim(&user_ip, number).await?;

    Ok(Json(ClaimResponse {
        result: claimed.result(),
        number: claimed.number,
        user_ip: claimed.owner_key,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// `GET /health`
pub async fn health<S: ClaimStore>(
    State(service): State<BackendService<S>>,
) -> Result<(StatusCode, Json<HealthStatus>), Error> {
    service.claims.health().await?;
    Ok((StatusCode::OK, Json(HealthStatus { status: "healthy" })))
}
