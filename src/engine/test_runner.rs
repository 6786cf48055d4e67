//! Interactive test runs.
//!
//! Same compile → bind → execute pipeline the processor uses, but synchronous
//! to the caller with caller-supplied params and payload, and it never
//! touches the queue or the execution log.

use std::collections::HashMap;

use serde_json::Value;

use super::binder;
use crate::error::EngineError;
use crate::sandbox::{ExecutionOutcome, SandboxExecutor};
use crate::storage::Storage;

pub async fn test_function(
    storage: &Storage,
    executor: &SandboxExecutor,
    user_id: &str,
    function_id: &str,
    params: &Value,
    payload: &Value,
) -> Result<ExecutionOutcome, EngineError> {
    let function = storage.function(function_id, user_id).await?;
    let unit = executor.compile(&function.source).await?;

    let values: HashMap<String, String> = serde_json::from_value(params.clone())
        .map_err(|e| EngineError::Bind(format!("params must be a string map: {e}")))?;
    let bound = binder::bind(&unit.params, &values)?;

    Ok(executor.execute(&unit, bound, payload.clone()).await)
}
