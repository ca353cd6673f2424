//! HTTP handler that accepts a bulk prefix copy and starts it in the
//! background.
//!
//! The body is taken as raw JSON so each field can be checked in order and
//! answered with a precise 400 message instead of a generic rejection.

use crate::{
    errors::AppError,
    models::copy::CopyOptions,
    services::copy_service::CopyService,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

const ACCEPTED_MESSAGE: &str = "Request accepted. S3 copy operation started in the background.";

/// A request body that passed validation.
#[derive(Debug, PartialEq)]
struct CopyRequest {
    source_path: String,
    destination_path: String,
    options: CopyOptions,
}

#[derive(Serialize)]
struct AcceptedResponse {
    success: bool,
    message: &'static str,
    details: AcceptedDetails,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedDetails {
    source_path: String,
    destination_path: String,
    options: CopyOptions,
    timestamp: DateTime<Utc>,
    run_id: Uuid,
}

/// `PUT /api/fetch-all-and-ingest-data`
///
/// Validates the body, starts the copy run and answers 202 without waiting
/// for it. The run's outcome only shows up in the logs.
pub async fn fetch_and_ingest(
    State(service): State<CopyService>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = payload?;
    let request = parse_request(body)?;

    let ticket = service.start_copy(
        request.source_path.clone(),
        request.destination_path.clone(),
        request.options,
    );
    tracing::info!(
        run_id = %ticket.run_id,
        "accepted copy request from {} to {}",
        request.source_path,
        request.destination_path
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            success: true,
            message: ACCEPTED_MESSAGE,
            details: AcceptedDetails {
                source_path: request.source_path,
                destination_path: request.destination_path,
                options: request.options,
                timestamp: ticket.accepted_at,
                run_id: ticket.run_id,
            },
        }),
    ))
}

fn parse_request(body: Value) -> Result<CopyRequest, AppError> {
    let Value::Object(mut fields) = body else {
        return Err(AppError::bad_request("request body must be a JSON object"));
    };

    if is_missing(&fields, "sourcePath") {
        return Err(AppError::bad_request("sourcePath is required"));
    }
    if is_missing(&fields, "destinationPath") {
        return Err(AppError::bad_request("destinationPath is required"));
    }

    let (source_path, destination_path) =
        match (fields.remove("sourcePath"), fields.remove("destinationPath")) {
            (Some(Value::String(source)), Some(Value::String(destination))) => {
                (source, destination)
            }
            _ => {
                return Err(AppError::bad_request(
                    "sourcePath and destinationPath must be strings",
                ));
            }
        };

    let options = match fields.remove("options") {
        None | Some(Value::Null) => CopyOptions::default(),
        Some(value @ Value::Object(_)) => serde_json::from_value(value)
            .map_err(|err| AppError::bad_request(format!("invalid options: {err}")))?,
        Some(_) => return Err(AppError::bad_request("options must be an object if provided")),
    };

    Ok(CopyRequest {
        source_path,
        destination_path,
        options,
    })
}

/// Absent, null, empty string, `false` and zero all count as not provided.
fn is_missing(fields: &Map<String, Value>, name: &str) -> bool {
    match fields.get(name) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(_) => false,
    }
}
