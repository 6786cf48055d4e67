//! Event matching: fan an incoming event out to queue entries.

use serde_json::Value;
use tracing::info;

use crate::error::EngineError;
use crate::storage::{QueueRow, Storage};

/// Enqueue one entry per trigger the user has registered for `event`.
///
/// Matching is name equality only — no wildcards, no payload inspection, no
/// deduplication. The payload snapshot taken here is what the processor
/// eventually hands to the function, regardless of later edits to the source
/// record.
pub async fn match_event(
    storage: &Storage,
    user_id: &str,
    event: &str,
    payload: &Value,
) -> Result<Vec<QueueRow>, EngineError> {
    let triggers = storage.triggers_for_event(user_id, event).await?;
    let snapshot =
        serde_json::to_string(payload).map_err(|e| EngineError::Serialization(e.to_string()))?;

    let mut queued = Vec::with_capacity(triggers.len());
    for trigger in &triggers {
        queued.push(storage.enqueue(user_id, &trigger.id, &snapshot).await?);
    }

    info!(event, matched = triggers.len(), "event fanned out to queue");
    Ok(queued)
}
