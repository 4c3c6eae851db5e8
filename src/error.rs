//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **Domain errors** raised by the bridge core (`ResolveError`, `StoreError`,
//!   `UpstreamError`, `FrameDecodeError`, `RegistryError`). None of them ever reaches
//!   a WebSocket client verbatim: the bridge converts them into a close status.
//! - **`AppError`** returned by the HTTP admin handlers, rendered as JSON through
//!   actix-web's `ResponseError`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Failure talking to the tenant configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failure, timeout or server-side error. Worth retrying.
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but the record could not be understood.
    #[error("malformed record in configuration store: {0}")]
    Malformed(String),
}

/// Outcome of a failed tenant resolution.
///
/// `NotFound` deliberately carries no detail: a missing mapping, an inactive tenant and
/// a missing configuration must look identical to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("tenant not found")]
    NotFound,

    #[error("tenant resolution failed: {0}")]
    Unavailable(String),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Unavailable(_))
    }
}

/// Failure establishing or using an upstream realtime session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    /// Transport could not be established or was lost.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The service refused the session configuration (unknown voice, bad parameters...).
    #[error("upstream rejected session: {0}")]
    Rejected(String),

    /// The session is not open.
    #[error("upstream session closed")]
    Closed,
}

/// Malformed inbound audio message. Logged and dropped, never fatal.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameDecodeError {
    #[error("empty audio frame")]
    Empty,

    #[error("frame length {0} is not a whole number of PCM16 samples")]
    OddLength(usize),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Registration refused by the session registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("maximum concurrent sessions ({0}) reached")]
    CapacityExceeded(usize),

    #[error("server is draining connections")]
    Draining,
}

/// Errors returned by HTTP handlers.
///
/// ## HTTP Status Code Mapping:
/// - Internal → 500
/// - BadRequest → 400
/// - NotFound → 404
/// - ServiceUnavailable → 503
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "no cached configuration for +5511999990001",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => AppError::NotFound("tenant not found".to_string()),
            ResolveError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
        }
    }
}
