// rest/routes/triggers.rs — Trigger CRUD, queue inspection and draining,
// and the execution log.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::engine_error;
use crate::engine::processor::QueueProcessor;
use crate::error::EngineError;
use crate::rest::auth::AuthedUser;
use crate::AppContext;

type HandlerResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub async fn list_triggers(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
) -> HandlerResult {
    let rows = ctx
        .storage
        .list_triggers(&user.id)
        .await
        .map_err(|e| engine_error(e.into()))?;
    Ok(Json(json!({ "triggers": rows })))
}

pub async fn get_trigger(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
) -> HandlerResult {
    let row = ctx
        .storage
        .trigger(&id, &user.id)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!(row)))
}

#[derive(Deserialize)]
pub struct CreateTriggerRequest {
    pub name: String,
    pub event: String,
    pub function_id: String,
    /// Parameter values (string → string) to bind at execution time.
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Encode the configured values for storage, rejecting non-string values up
/// front so binding can't hit them later.
fn encode_params(params: &Map<String, Value>) -> Result<String, EngineError> {
    let values: HashMap<&str, &str> = params
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.as_str(), s.as_str())),
            _ => Err(EngineError::Bind(format!(
                "parameter `{k}` must be a string"
            ))),
        })
        .collect::<Result<_, _>>()?;
    serde_json::to_string(&values).map_err(|e| EngineError::Serialization(e.to_string()))
}

pub async fn create_trigger(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Json(body): Json<CreateTriggerRequest>,
) -> HandlerResult {
    let function = ctx
        .storage
        .function(&body.function_id, &user.id)
        .await
        .map_err(engine_error)?;

    // The function must declare support for the event at creation time.
    // Later edits to the function are not re-validated against triggers.
    let unit = ctx
        .executor
        .compile(&function.source)
        .await
        .map_err(engine_error)?;
    if !unit.supports_event(&body.event) {
        return Err(engine_error(EngineError::compile(format!(
            "function `{}` does not declare support for event `{}`",
            function.name, body.event
        ))));
    }

    let params = encode_params(&body.params).map_err(engine_error)?;
    let row = ctx
        .storage
        .create_trigger(&user.id, &body.name, &body.event, &body.function_id, &params)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!(row)))
}

#[derive(Deserialize)]
pub struct UpdateTriggerRequest {
    pub name: Option<String>,
    pub event: Option<String>,
    pub function_id: Option<String>,
    pub params: Option<Map<String, Value>>,
}

pub async fn update_trigger(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateTriggerRequest>,
) -> HandlerResult {
    if let Some(function_id) = &body.function_id {
        ctx.storage
            .function(function_id, &user.id)
            .await
            .map_err(engine_error)?;
    }
    let params = match &body.params {
        Some(p) => Some(encode_params(p).map_err(engine_error)?),
        None => None,
    };
    let row = ctx
        .storage
        .update_trigger(
            &id,
            &user.id,
            body.name.as_deref(),
            body.event.as_deref(),
            body.function_id.as_deref(),
            params.as_deref(),
        )
        .await
        .map_err(engine_error)?;
    Ok(Json(json!(row)))
}

pub async fn delete_trigger(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
) -> HandlerResult {
    ctx.storage
        .delete_trigger(&id, &user.id)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({ "deleted": id })))
}

// ─── Queue & log ──────────────────────────────────────────────────────────────

pub async fn list_queue(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
) -> HandlerResult {
    let rows = ctx
        .storage
        .list_queue(&user.id)
        .await
        .map_err(|e| engine_error(e.into()))?;
    let list: Vec<Value> = rows
        .iter()
        .map(|q| {
            json!({
                "id": q.id,
                "trigger_id": q.trigger_id,
                "created_at": q.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "queue": list })))
}

/// Drain the caller's pending queue. Response maps each claimed queue-entry
/// id to the log entry it produced.
pub async fn process_queue(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
) -> HandlerResult {
    let processor = QueueProcessor::new(ctx.storage.clone(), ctx.executor.clone());
    let results = processor
        .process(&user.id)
        .await
        .map_err(engine_error)?;

    let mut body = Map::new();
    for (queue_id, result) in results {
        let value = match result {
            Ok(log) => json!(log),
            Err(e) => json!({ "error": e.to_string() }),
        };
        body.insert(queue_id, value);
    }
    Ok(Json(Value::Object(body)))
}

pub async fn list_log(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
) -> HandlerResult {
    let rows = ctx
        .storage
        .list_log(&user.id)
        .await
        .map_err(|e| engine_error(e.into()))?;
    Ok(Json(json!({ "log": rows })))
}
