//! Response envelopes and the error-kind → HTTP dispatcher.
//!
//! Successful requests wrap their metadata in a sync envelope; failed
//! ones carry the message and code in an error envelope. Catalog,
//! driver and cluster faults are folded into the error kinds at the
//! boundary so handlers can stay `?`-driven.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use netgrid_catalog::CatalogError;
use netgrid_cluster::ClusterError;
use netgrid_driver::DriverError;

/// Result type alias for handler logic.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error kinds surfaced by the API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The standard "Network not found" error. Access-policy denials
    /// surface identically to avoid name enumeration.
    pub fn network_not_found() -> Self {
        ApiError::NotFound("Network not found".to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(msg) => ApiError::NotFound(msg),
            CatalogError::AlreadyDefined(msg) | CatalogError::Conflict(msg) => {
                ApiError::Conflict(msg)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DriverError> for ApiError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound => ApiError::network_not_found(),
            DriverError::UnknownType(_) | DriverError::InvalidName(_, _) => {
                ApiError::BadRequest(e.to_string())
            }
            DriverError::Validation(msg) => ApiError::BadRequest(msg),
            DriverError::Catalog(inner) => inner.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "type": "error",
            "error": self.to_string(),
            "error_code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Envelope for successful responses.
#[derive(serde::Serialize)]
pub struct SyncResponse<T: serde::Serialize> {
    #[serde(rename = "type")]
    response_type: &'static str,
    status: &'static str,
    status_code: u16,
    metadata: T,
}

impl<T: serde::Serialize> SyncResponse<T> {
    /// Wrap operation metadata in a sync envelope.
    pub fn new(metadata: T) -> Json<Self> {
        Json(Self {
            response_type: "sync",
            status: "Success",
            status_code: StatusCode::OK.as_u16(),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PreconditionFailed("x".into()).status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn catalog_errors_fold_into_kinds() {
        let e: ApiError = CatalogError::NotFound("gone".into()).into();
        assert!(matches!(e, ApiError::NotFound(_)));

        let e: ApiError = CatalogError::AlreadyDefined("dup".into()).into();
        assert!(matches!(e, ApiError::Conflict(_)));

        let e: ApiError = CatalogError::Transaction("io".into()).into();
        assert!(matches!(e, ApiError::Internal(_)));
    }

    #[test]
    fn driver_errors_fold_into_kinds() {
        let e: ApiError = DriverError::NotFound.into();
        assert!(matches!(e, ApiError::NotFound(_)));

        let e: ApiError = DriverError::Validation("bad key".into()).into();
        assert!(matches!(e, ApiError::BadRequest(_)));
    }

    #[test]
    fn sync_envelope_carries_metadata() {
        let Json(envelope) = SyncResponse::new(vec!["/1.0/networks/br0".to_string()]);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], serde_json::json!("sync"));
        assert_eq!(value["status"], serde_json::json!("Success"));
        assert_eq!(value["status_code"], serde_json::json!(200));
        assert_eq!(
            value["metadata"],
            serde_json::json!(["/1.0/networks/br0"])
        );
    }

    #[test]
    fn error_envelope_reports_code() {
        let response = ApiError::Conflict("Network \"br0\" already exists".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
