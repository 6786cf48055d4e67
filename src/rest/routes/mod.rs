pub mod events;
pub mod functions;
pub mod health;
pub mod triggers;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

use crate::error::EngineError;

/// Shared handler error shape: `{"error": message}` plus the source location
/// for compile errors.
pub(super) fn engine_error(e: EngineError) -> (StatusCode, Json<Value>) {
    let status = e.status_code();
    let mut body = json!({ "error": e.to_string() });
    if let EngineError::Compile {
        location: Some(location),
        ..
    } = &e
    {
        body["location"] = json!(location);
    }
    (status, Json(body))
}
