// rest/routes/functions.rs — Function CRUD and interactive test runs.
//
// Source must compile before a function is created or updated, so every
// stored function has a valid default export. Responses carry the extracted
// `params` schema and `supportedEvents` so clients never parse source.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::engine_error;
use crate::engine::test_runner;
use crate::error::EngineError;
use crate::rest::auth::AuthedUser;
use crate::sandbox::CompiledFunction;
use crate::storage::FunctionRow;
use crate::AppContext;

type HandlerResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn function_json(row: &FunctionRow, unit: Option<&CompiledFunction>) -> Value {
    let mut body = json!(row);
    if let Some(unit) = unit {
        body["params"] = json!(unit.params);
        body["supportedEvents"] = json!(unit.supported_events);
    }
    body
}

pub async fn list_functions(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
) -> HandlerResult {
    let rows = ctx
        .storage
        .list_functions(&user.id)
        .await
        .map_err(|e| engine_error(e.into()))?;

    // Attach the schema where the stored source still compiles; sources that
    // have rotted (e.g. a remote import vanished) are listed without one.
    let mut list = Vec::with_capacity(rows.len());
    for row in &rows {
        let unit = ctx.executor.compile(&row.source).await.ok();
        list.push(function_json(row, unit.as_ref()));
    }
    Ok(Json(json!({ "functions": list })))
}

pub async fn get_function(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
) -> HandlerResult {
    let row = ctx
        .storage
        .function(&id, &user.id)
        .await
        .map_err(engine_error)?;
    let unit = ctx.executor.compile(&row.source).await.ok();
    Ok(Json(function_json(&row, unit.as_ref())))
}

#[derive(Deserialize)]
pub struct CreateFunctionRequest {
    pub name: String,
    pub source: String,
}

pub async fn create_function(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Json(body): Json<CreateFunctionRequest>,
) -> HandlerResult {
    let unit = ctx
        .executor
        .compile(&body.source)
        .await
        .map_err(engine_error)?;
    let row = ctx
        .storage
        .create_function(&user.id, &body.name, &body.source)
        .await
        .map_err(engine_error)?;
    Ok(Json(function_json(&row, Some(&unit))))
}

#[derive(Deserialize)]
pub struct UpdateFunctionRequest {
    pub name: Option<String>,
    pub source: Option<String>,
}

pub async fn update_function(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateFunctionRequest>,
) -> HandlerResult {
    let unit = match &body.source {
        Some(source) => Some(ctx.executor.compile(source).await.map_err(engine_error)?),
        None => None,
    };
    let row = ctx
        .storage
        .update_function(&id, &user.id, body.name.as_deref(), body.source.as_deref())
        .await
        .map_err(engine_error)?;
    Ok(Json(function_json(&row, unit.as_ref())))
}

pub async fn delete_function(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
) -> HandlerResult {
    ctx.storage
        .delete_function(&id, &user.id)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub struct TestFunctionRequest {
    /// JSON-encoded string map of parameter values, standing in for a
    /// trigger's config.
    #[serde(default = "empty_object")]
    pub params: String,
    /// JSON-encoded event payload handed to the function as its second
    /// argument.
    #[serde(default = "empty_object")]
    pub payload: String,
}

fn empty_object() -> String {
    "{}".to_string()
}

/// Run a function once with caller-supplied params and payload. Never
/// enqueues and never writes to the execution log.
pub async fn test_function(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<String>,
    Json(body): Json<TestFunctionRequest>,
) -> HandlerResult {
    let params: Value = serde_json::from_str(&body.params)
        .map_err(|e| engine_error(EngineError::Bind(format!("params is not valid JSON: {e}"))))?;
    let payload: Value = serde_json::from_str(&body.payload).map_err(|e| {
        engine_error(EngineError::Serialization(format!(
            "payload is not valid JSON: {e}"
        )))
    })?;

    let outcome =
        test_runner::test_function(&ctx.storage, &ctx.executor, &user.id, &id, &params, &payload)
            .await
            .map_err(engine_error)?;

    match outcome.error {
        None => Ok(Json(json!({
            "result": outcome.result,
            "console": outcome.console,
        }))),
        Some(message) => Err(engine_error(EngineError::Runtime(message))),
    }
}
