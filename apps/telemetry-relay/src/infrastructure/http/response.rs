//! HTTP response types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::application::use_cases::{IngestError, QueryError};
use crate::infrastructure::ingestion::CodecError;

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Handler error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorResponse,
}

impl ApiError {
    /// Build an error response.
    #[must_use]
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    /// 400 with `code`.
    #[must_use]
    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match &err {
            QueryError::MissingVehicleId => Self::bad_request("missing_vehicle_id", err.to_string()),
            QueryError::InvalidRange { .. } => Self::bad_request("invalid_range", err.to_string()),
            QueryError::InvalidInterval => Self::bad_request("invalid_interval", err.to_string()),
            QueryError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", err.to_string()),
            QueryError::Storage(_) => {
                tracing::error!(error = %err, "Telemetry query failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    err.to_string(),
                )
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match &err {
            IngestError::Validation(_) => Self::bad_request("validation_error", err.to_string()),
            IngestError::Persistence(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            ),
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        Self::bad_request("malformed_telemetry", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::RepositoryError;
    use crate::domain::telemetry::TelemetryError;

    #[test]
    fn query_errors_map_to_status() {
        assert_eq!(
            ApiError::from(QueryError::MissingVehicleId).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QueryError::InvalidInterval).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QueryError::NotFound("car-1".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(QueryError::Storage(RepositoryError::QueryFailed {
                message: "down".into()
            }))
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn ingest_errors_map_to_status() {
        assert_eq!(
            ApiError::from(IngestError::Validation(TelemetryError::InvalidVehicleId)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IngestError::Persistence(RepositoryError::WriteFailed {
                message: "full".into()
            }))
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_body_serialization() {
        let body = ApiErrorResponse {
            code: "not_found".into(),
            message: "no telemetry for vehicle car-1".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "not_found");
    }
}
