use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::courier::CourierId;
use crate::models::geofence::GeofenceRejection;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("courier {0} is not registered")]
    NotRegistered(CourierId),

    #[error("courier {0} is not in the queue")]
    NotQueued(CourierId),

    #[error("geofence rejected: {0}")]
    GeofenceRejected(GeofenceRejection),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotRegistered(_) => "not_registered",
            AppError::NotQueued(_) => "not_queued",
            AppError::GeofenceRejected(_) => "geofence_rejected",
            AppError::InvalidName(_) => "invalid_name",
            AppError::InvalidCoordinates { .. } => "invalid_coordinates",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotRegistered(_) | AppError::NotQueued(_) => StatusCode::NOT_FOUND,
            AppError::GeofenceRejected(_) => StatusCode::FORBIDDEN,
            AppError::InvalidName(_)
            | AppError::InvalidCoordinates { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
            "retryable": self.is_retryable(),
        });
        if let AppError::GeofenceRejected(reason) = &self {
            body["reason"] = json!(reason);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::AppError;
    use crate::models::geofence::GeofenceRejection;

    #[test]
    fn every_rejection_maps_to_a_distinct_code() {
        let errors = [
            AppError::NotRegistered(1),
            AppError::NotQueued(1),
            AppError::GeofenceRejected(GeofenceRejection::TooFar { distance_m: 10.0 }),
            AppError::InvalidName("x".to_string()),
            AppError::InvalidCoordinates { lat: 91.0, lon: 0.0 },
            AppError::BadRequest("x".to_string()),
            AppError::Unauthorized,
            AppError::StoreUnavailable("down".to_string()),
            AppError::Internal("x".to_string()),
        ];

        let mut codes: Vec<&str> = errors.iter().map(AppError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn store_failures_are_retryable_service_unavailable() {
        let err = AppError::StoreUnavailable("pool timed out".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn geofence_rejection_is_forbidden() {
        let err = AppError::GeofenceRejected(GeofenceRejection::Expired);
        assert!(!err.is_retryable());
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }
}
