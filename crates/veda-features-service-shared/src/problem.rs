//! RFC 9457 Problem Details for HTTP APIs.
//!
//! Provides structured error responses following the Problem Details standard.
//! See: <https://www.rfc-editor.org/rfc/rfc9457.html>

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use veda_features_lib::Error as LibError;

/// Problem type URI for collection ids missing from the catalog.
pub const PROBLEM_UNKNOWN_COLLECTION: &str = "/problems/unknown-collection";

/// Problem type URI for item ids missing from a collection.
pub const PROBLEM_FEATURE_NOT_FOUND: &str = "/problems/feature-not-found";

/// Problem type URI for invalid request parameters.
pub const PROBLEM_INVALID_REQUEST: &str = "/problems/invalid-request";

/// Problem type URI for internal server errors.
pub const PROBLEM_INTERNAL_ERROR: &str = "/problems/internal-error";

/// Problem type URI for an unreachable database.
pub const PROBLEM_SERVICE_UNAVAILABLE: &str = "/problems/service-unavailable";

/// RFC 9457 Problem Details response structure.
///
/// # Example
///
/// ```
/// use veda_features_service_shared::{ProblemDetails, PROBLEM_UNKNOWN_COLLECTION};
/// use axum::http::StatusCode;
///
/// let problem = ProblemDetails::new(
///     PROBLEM_UNKNOWN_COLLECTION,
///     "Unknown Collection",
///     StatusCode::NOT_FOUND,
/// )
/// .with_detail("Collection 'public.missing' not found")
/// .with_request_id("req-12345");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProblemDetails {
    /// URI reference identifying the problem type (relative).
    #[serde(rename = "type")]
    pub type_uri: String,

    /// Short, human-readable summary of the problem.
    pub title: String,

    /// HTTP status code for this problem.
    pub status: u16,

    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Request identifier of this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(type_uri: impl Into<String>, title: impl Into<String>, status: StatusCode) -> Self {
        Self {
            type_uri: type_uri.into(),
            title: title.into(),
            status: status.as_u16(),
            detail: None,
            instance: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.instance = Some(request_id.into());
        self
    }

    /// 400 for a malformed query parameter.
    pub fn bad_request(detail: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_INVALID_REQUEST,
            "Invalid Request",
            StatusCode::BAD_REQUEST,
        )
        .with_detail(detail)
        .with_request_id(request_id)
    }

    /// 404 for a collection id missing from the catalog.
    pub fn unknown_collection(id: &str, request_id: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_UNKNOWN_COLLECTION,
            "Unknown Collection",
            StatusCode::NOT_FOUND,
        )
        .with_detail(format!("Collection '{}' not found", id))
        .with_request_id(request_id)
    }

    /// 404 for an item id missing from its collection.
    pub fn feature_not_found(
        collection_id: &str,
        item_id: &str,
        request_id: impl Into<String>,
    ) -> Self {
        Self::new(
            PROBLEM_FEATURE_NOT_FOUND,
            "Feature Not Found",
            StatusCode::NOT_FOUND,
        )
        .with_detail(format!(
            "Feature '{}' not found in collection '{}'",
            item_id, collection_id
        ))
        .with_request_id(request_id)
    }

    pub fn internal_error(detail: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_INTERNAL_ERROR,
            "Internal Error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .with_detail(detail)
        .with_request_id(request_id)
    }

    pub fn service_unavailable(detail: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_SERVICE_UNAVAILABLE,
            "Service Unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .with_detail(detail)
        .with_request_id(request_id)
    }
}

impl std::fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.title,
            self.detail.as_deref().unwrap_or("")
        )
    }
}

impl std::error::Error for ProblemDetails {}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = Json(&self).into_response();
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        *response.status_mut() = status;
        response
    }
}

fn is_connectivity_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
    )
}

/// Convert library errors to ProblemDetails.
///
/// Internal details of database errors are logged, not returned.
pub fn from_lib_error(error: &LibError, request_id: &str) -> ProblemDetails {
    match error {
        LibError::UnknownCollection { id } => ProblemDetails::unknown_collection(id, request_id),
        LibError::UnknownFeature {
            collection_id,
            item_id,
        } => ProblemDetails::feature_not_found(collection_id, item_id, request_id),
        LibError::InvalidQuery { .. } => ProblemDetails::bad_request(error.to_string(), request_id),
        LibError::Database(db) if is_connectivity_error(db) => {
            tracing::error!(request_id = %request_id, error = %db, "database unreachable");
            ProblemDetails::service_unavailable("Database temporarily unavailable", request_id)
        }
        LibError::Io(io) => {
            tracing::error!(request_id = %request_id, error = %io, "database unreachable");
            ProblemDetails::service_unavailable("Database temporarily unavailable", request_id)
        }
        _ => {
            tracing::error!(request_id = %request_id, error = %error, "request failed");
            ProblemDetails::internal_error("Internal server error", request_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_details_serialization() {
        let problem = ProblemDetails::bad_request("Test error", "req-test");
        let json = serde_json::to_string(&problem).unwrap();

        assert!(json.contains("\"type\":\"/problems/invalid-request\""));
        assert!(json.contains("\"title\":\"Invalid Request\""));
        assert!(json.contains("\"status\":400"));
        assert!(json.contains("\"detail\":\"Test error\""));
        assert!(json.contains("\"instance\":\"req-test\""));
    }

    #[test]
    fn unknown_collection_is_404() {
        let error = LibError::UnknownCollection {
            id: "public.missing".to_string(),
        };
        let problem = from_lib_error(&error, "req-1");

        assert_eq!(problem.type_uri, PROBLEM_UNKNOWN_COLLECTION);
        assert_eq!(problem.status, 404);
        assert!(problem.detail.unwrap().contains("public.missing"));
    }

    #[test]
    fn unknown_feature_is_404() {
        let error = LibError::UnknownFeature {
            collection_id: "public.counties".to_string(),
            item_id: "99".to_string(),
        };
        let problem = from_lib_error(&error, "req-2");

        assert_eq!(problem.type_uri, PROBLEM_FEATURE_NOT_FOUND);
        assert_eq!(problem.status, 404);
    }

    #[test]
    fn invalid_query_is_400() {
        let problem = from_lib_error(&LibError::invalid_query("limit", "must be positive"), "req-3");
        assert_eq!(problem.status, 400);
        assert!(problem.detail.unwrap().contains("limit"));
    }

    #[test]
    fn pool_timeout_is_503() {
        let problem = from_lib_error(&LibError::Database(sqlx::Error::PoolTimedOut), "req-4");
        assert_eq!(problem.type_uri, PROBLEM_SERVICE_UNAVAILABLE);
        assert_eq!(problem.status, 503);
    }

    #[test]
    fn other_errors_hide_details() {
        let problem = from_lib_error(&LibError::Database(sqlx::Error::RowNotFound), "req-5");
        assert_eq!(problem.status, 500);
        assert_eq!(problem.detail.as_deref(), Some("Internal server error"));
    }

    #[test]
    fn response_uses_problem_content_type() {
        let response = ProblemDetails::unknown_collection("x", "req-6").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/problem+json"
        );
    }
}
