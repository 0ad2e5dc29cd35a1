//! Error types shared by the gateway and the backend.
//!
//! This module defines the central [`Error`] enum, which captures every
//! reportable failure of the claim pipeline. It implements
//! [`IntoResponse`] so handlers on both tiers can return it directly; the
//! response is always `{"error": "<message>"}` with the mapped status code.
//!
//! ## Error Cases
//! - `Validation`: malformed or out-of-range input (400, or 415 for a
//!   non-JSON body). Resolved at the edge and never forwarded.
//! - `RateLimited`: the client exhausted its window quota (429).
//! - `Conflict`: the claim collides with an existing one (412).
//! - `DownstreamTimeout` / `DownstreamUnreachable`: the backend could not
//!   answer in time (504) or could not be reached (502).
//! - `Overloaded`: the bounded dispatch queue is full (503).
//! - `StoreUnavailable`: storage could not be reached (503).
//! - `ServiceShutdown`: the request arrived during shutdown (503).
//! - `Internal`: anything unexpected (500). The context is logged, never
//!   returned to the caller.

use crate::common::types::ErrorBody;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Reasons a request body is rejected before any work is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Request body must be valid JSON")]
    MalformedJson,

    #[error("Field 'number' is required")]
    MissingNumber,

    #[error("Number must be numeric")]
    NotNumeric,

    #[error("Number must be non-negative integer")]
    NotNonNegativeInteger,

    #[error("Number out of range")]
    OutOfRange,
}

impl ValidationError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Why a claim was refused.
///
/// `AlreadyClaimed` and `SuccessorClaimed` come from the advisory existence
/// checks. `ConcurrentClaim` is raised only when the insert itself trips the
/// `(owner_key, number)` uniqueness constraint, which is the one authoritative
/// signal for a same-pair collision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConflictReason {
    AlreadyClaimed,
    SuccessorClaimed,
    ConcurrentClaim,
}

impl ConflictReason {
    /// Stable, low-cardinality label for logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyClaimed => "already_claimed",
            Self::SuccessorClaimed => "successor_claimed",
            Self::ConcurrentClaim => "concurrent_claim",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyClaimed => "Number already exists",
            Self::SuccessorClaimed => "Number + 1 already exists",
            Self::ConcurrentClaim => "Number already exists (concurrent request)",
        })
    }
}

/// Unified error type for both numclaim tiers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The request body was rejected by validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The client exceeded its sliding-window quota.
    #[error("Rate limit exceeded. Max {max} requests per {window_secs}s")]
    RateLimited { max: usize, window_secs: u64 },

    /// The claim collides with an existing one.
    #[error("{0}")]
    Conflict(ConflictReason),

    /// The backend did not answer within the configured timeout.
    #[error("Backend timeout")]
    DownstreamTimeout,

    /// No connection to the backend could be established.
    #[error("Cannot connect to backend")]
    DownstreamUnreachable,

    /// The bounded dispatch queue is full.
    #[error("Service overloaded, retry later")]
    Overloaded,

    /// Storage could not be reached.
    #[error("Database unavailable")]
    StoreUnavailable,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// An unexpected fault. `context` is for logs only.
    #[error("Internal server error")]
    Internal { context: String },
}

impl Error {
    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(e) => e.status(),
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict(_) => StatusCode::PRECONDITION_FAILED,
            Self::DownstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::DownstreamUnreachable => StatusCode::BAD_GATEWAY,
            Self::Overloaded | Self::StoreUnavailable | Self::ServiceShutdown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ConflictReason> for Error {
    fn from(reason: ConflictReason) -> Self {
        Self::Conflict(reason)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::Internal { context } = &self {
            tracing::error!(%context, "request failed with an internal error");
        }
        let status = self.status();
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            Error::from(ValidationError::UnsupportedMediaType).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            Error::from(ValidationError::NotNumeric).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::RateLimited {
                max: 20,
                window_secs: 60
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::from(ConflictReason::ConcurrentClaim).status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(Error::DownstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(Error::DownstreamUnreachable.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(Error::StoreUnavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::Overloaded.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            Error::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn conflict_messages() {
        assert_eq!(
            Error::from(ConflictReason::AlreadyClaimed).to_string(),
            "Number already exists"
        );
        assert_eq!(
            Error::from(ConflictReason::SuccessorClaimed).to_string(),
            "Number + 1 already exists"
        );
        assert_eq!(
            Error::from(ConflictReason::ConcurrentClaim).to_string(),
            "Number already exists (concurrent request)"
        );
    }

    #[test]
    fn rate_limited_message_names_the_policy() {
        let err = Error::RateLimited {
            max: 20,
            window_secs: 60,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Max 20 requests per 60s"
        );
    }

    #[tokio::test]
    async fn internal_context_stays_out_of_the_body() {
        let response = Error::internal("pool exploded: secret detail").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
        assert!(!String::from_utf8_lossy(&body).contains("secret"));
    }
}
