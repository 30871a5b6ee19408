use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::trip::TripStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: TripStatus, to: TripStatus },

    #[error("driver {0} is not eligible")]
    IneligibleDriver(Uuid),

    #[error("no driver found for trip {0}")]
    NoDriverFound(Uuid),

    #[error("stale location update for driver {0}")]
    StaleUpdate(Uuid),

    #[error("offer for trip {0} is no longer available")]
    OfferAlreadyTaken(Uuid),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::InvalidTransition { .. } => StatusCode::CONFLICT,
            DispatchError::IneligibleDriver(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::NoDriverFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Stale pings are normally dropped in the handler, not surfaced.
            DispatchError::StaleUpdate(_) => StatusCode::CONFLICT,
            DispatchError::OfferAlreadyTaken(_) => StatusCode::CONFLICT,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::Conflict(_) => StatusCode::CONFLICT,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
