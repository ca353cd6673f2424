//! Liveness and service-info handlers.
//!
//! - GET /healthz -> simple liveness ("ok")
//! - GET /api     -> service banner with the crate version
//! - fallback     -> JSON 404 for anything unrouted

use crate::errors::AppError;
use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Never touches storage, so it stays cheap enough for tight probe intervals.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /api`
pub async fn api_info() -> impl IntoResponse {
    Json(InfoResponse {
        message: "S3 prefix copy API",
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Router fallback for unknown paths.
pub async fn route_not_found() -> AppError {
    AppError::not_found("Route not found")
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct InfoResponse {
    message: &'static str,
    status: &'static str,
    version: &'static str,
}
