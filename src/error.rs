use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::models::Capability;

/// StoreError
///
/// Failure of the persistence layer itself. Compare-and-set contention is
/// *not* an error (the repository reports it as a value), so anything landing
/// here means the store was unreachable or misbehaving.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    /// A stored value fell outside its closed vocabulary (e.g. a plan name no
    /// release of this service ever wrote). Surfaced instead of coercing.
    #[error("stored value outside the closed vocabulary: {0}")]
    CorruptRow(String),
}

/// AuditError
///
/// The audit log's single failure mode. Callers decide whether a failed
/// append blocks the action; the workflow surfaces it as a degraded (never
/// clean) success when the effect already committed.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

/// GatewayError
///
/// Outcome classes of the external confirmation call. `Unavailable` covers
/// timeouts and transport failures and stays eligible for retry;
/// `PaymentNotFound` means the gateway itself does not know the id.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("payment id unknown to the gateway")]
    PaymentNotFound,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// WorkflowError
///
/// The error surface of the payment-verification workflow and the
/// administrative override path. Everything here maps to a generic client
/// response; the detailed cause is logged and, where an attempt record exists,
/// captured in audit metadata.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("payment id is not known to the gateway")]
    PaymentNotFound,
    #[error("payment gateway unavailable")]
    GatewayUnavailable,
    #[error("a verification attempt for this payment is already in flight")]
    AlreadyInProgress,
    #[error("'{0}' is not a recognised plan")]
    InvalidPlan(String),
    #[error("capability '{0}' is not granted to this role")]
    Denied(Capability),
    #[error("no plan record exists for this user")]
    PlanNotFound,
    #[error("plan update lost the compare-and-set race")]
    PlanConflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maps workflow failures onto HTTP responses.
///
/// The body is always `{ success: false, message: <generic> }`; stack-level
/// detail stays in the tracing output.
impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WorkflowError::Denied(_) => (StatusCode::FORBIDDEN, "insufficient privileges"),
            WorkflowError::AlreadyInProgress => (
                StatusCode::CONFLICT,
                "a verification attempt is already in progress",
            ),
            WorkflowError::PaymentNotFound => (StatusCode::NOT_FOUND, "payment not found"),
            WorkflowError::GatewayUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "payment gateway unavailable, retry later",
            ),
            WorkflowError::InvalidPlan(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unknown plan name")
            }
            WorkflowError::PlanNotFound => (StatusCode::NOT_FOUND, "no plan record for user"),
            WorkflowError::PlanConflict => (
                StatusCode::CONFLICT,
                "plan was modified concurrently, retry",
            ),
            WorkflowError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        tracing::error!(error = %self, "admin workflow request failed");

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

/// AuthRejection
///
/// Authentication-level rejection with a machine-readable reason code.
/// Capability denial is *not* represented here: that is the permission
/// policy's verdict and surfaces as [`WorkflowError::Denied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No Authorization header was presented.
    MissingHeader,
    /// The header was malformed, or the token failed decoding/expiry checks.
    InvalidToken,
    /// The token resolved to no registered admin, or the registry row carries
    /// an unknown role.
    AccessDenied,
}

impl AuthRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::InvalidToken => "invalid_token",
            Self::AccessDenied => "access_denied",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({ "success": false, "error": self.reason() })),
        )
            .into_response()
    }
}
