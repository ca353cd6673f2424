//! Defines the HTTP surface of the copy service.
//!
//! ## Structure
//! - `GET  /healthz`                       -> liveness
//! - `GET  /api`                           -> service info
//! - `PUT  /api/fetch-all-and-ingest-data` -> start a background prefix copy
//!
//! Anything else falls through to a JSON 404.

use crate::{
    errors::AppError,
    handlers::{
        copy_handlers::fetch_and_ingest,
        health_handlers::{api_info, healthz, route_not_found},
    },
    services::copy_service::CopyService,
};
use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`CopyService`) to all handlers.
pub fn routes() -> Router<CopyService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api", get(api_info))
        .route("/api/fetch-all-and-ingest-data", put(fetch_and_ingest))
        .fallback(route_not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    AppError::internal("Internal Server Error").into_response()
}
