use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("malformed json column: {}", err))
    }
}

/// Everything `PlaceOrder` (and the merchant order operations) can fail with.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("verification failed: {0}")]
    AbuseCheckFailed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidSelection(String),

    #[error("order {order_id} (#{order_number}) was stored without its items: {reason}")]
    PartialPersistence {
        order_id: Uuid,
        order_number: i64,
        reason: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    pub fn code(&self) -> &'static str {
        match self {
            IntakeError::InvalidInput(_) => "invalid_input",
            IntakeError::AbuseCheckFailed(_) => "abuse_check_failed",
            IntakeError::NotFound(_) => "not_found",
            IntakeError::InvalidSelection(_) => "invalid_selection",
            IntakeError::PartialPersistence { .. } => "partial_persistence",
            IntakeError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IntakeError::InvalidInput(_)
            | IntakeError::AbuseCheckFailed(_)
            | IntakeError::InvalidSelection(_) => StatusCode::BAD_REQUEST,
            IntakeError::NotFound(_) => StatusCode::NOT_FOUND,
            IntakeError::PartialPersistence { .. } | IntakeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for IntakeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => IntakeError::NotFound(what),
            StoreError::Backend(msg) => IntakeError::Internal(msg),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!("Order request failed: {}", self);
            "Something went wrong while placing the order".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            error: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Failure of a single integration handler. Recorded on its event row only.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid integration config: {0}")]
    Config(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rejected by remote ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("event type {0} is not handled by this integration")]
    Unsupported(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),
}
