//! Liveness endpoint.
//!
//! `GET /healthz` answers without touching the database so that a slow or
//! unreachable database does not take the function out of rotation.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of the liveness response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub ping: String,
}

impl HealthStatus {
    pub fn pong() -> Self {
        Self {
            ping: "pong!".to_string(),
        }
    }
}

/// Liveness probe handler.
///
/// ```text
/// GET /healthz
/// {"ping":"pong!"}
/// ```
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses((status = 200, description = "Service is running", body = HealthStatus))
)]
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthStatus::pong()))
}
