use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::models::ValidationError;

// Everything that ends a lead request before fan-out
#[derive(Error, Debug)]
pub enum LeadError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Too many requests")]
    TooManyRequests { retry_after: u64 },

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl IntoResponse for LeadError {
    fn into_response(self) -> Response {
        let status = match self {
            LeadError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            LeadError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            LeadError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            LeadError::Invalid(_) => StatusCode::BAD_REQUEST,
        };

        let body = match &self {
            LeadError::TooManyRequests { retry_after } => {
                json!({ "error": self.to_string(), "retryAfter": retry_after })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
