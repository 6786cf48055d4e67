//! Queue draining.
//!
//! `process` claims the user's entire pending snapshot atomically and runs
//! the entries concurrently. Each entry's load → compile → bind → execute
//! chain is caught at the entry boundary and projected into exactly one log
//! entry; nothing an individual entry does can abort the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::binder;
use crate::error::EngineError;
use crate::sandbox::{ExecutionOutcome, OutcomeStatus, SandboxExecutor};
use crate::storage::{LogRow, NewLogEntry, ProcessorStore, QueueRow};

pub struct QueueProcessor {
    store: Arc<dyn ProcessorStore>,
    executor: Arc<SandboxExecutor>,
}

impl QueueProcessor {
    pub fn new(store: Arc<dyn ProcessorStore>, executor: Arc<SandboxExecutor>) -> Self {
        Self { store, executor }
    }

    /// Drain everything pending for the user. Returns queue-entry id → the
    /// log entry it produced (or the storage error that prevented one).
    ///
    /// The claim removes the entries up front, so each gets exactly one
    /// attempt even if the daemon dies mid-batch.
    pub async fn process(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, Result<LogRow, EngineError>>, EngineError> {
        let mut claimed = self.store.claim_queue(user_id).await?;
        // Oldest first. Entries run concurrently, so this fixes dispatch
        // order only; log append order is completion order.
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        info!(user_id, claimed = claimed.len(), "draining trigger queue");

        let mut tasks = JoinSet::new();
        for entry in claimed {
            let store = self.store.clone();
            let executor = self.executor.clone();
            tasks.spawn(async move {
                let id = entry.id.clone();
                let result = process_entry(store, executor, entry).await;
                (id, result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(e) = &result {
                        error!(queue_id = %id, err = %e, "queue entry produced no log entry");
                    }
                    results.insert(id, result);
                }
                Err(e) => warn!(err = %e, "queue entry task panicked"),
            }
        }
        Ok(results)
    }
}

/// Run one claimed entry end to end and append its log entry.
///
/// Pipeline faults (missing trigger, compile error, bind error, sandbox
/// failure) become an `error` log entry; only a failure to write the log
/// itself escapes as `Err`.
async fn process_entry(
    store: Arc<dyn ProcessorStore>,
    executor: Arc<SandboxExecutor>,
    entry: QueueRow,
) -> Result<LogRow, EngineError> {
    let outcome = run_entry(&store, &executor, &entry).await.unwrap_or_else(|e| {
        ExecutionOutcome {
            status: OutcomeStatus::Error,
            result: None,
            error: Some(e.to_string()),
            console: Vec::new(),
        }
    });

    let result = match &outcome.result {
        Some(value) => serde_json::to_string(value).unwrap_or_default(),
        None => String::new(),
    };
    store
        .append_log(NewLogEntry {
            user_id: entry.user_id.clone(),
            trigger_id: entry.trigger_id.clone(),
            status: outcome.status.as_str().to_string(),
            result,
            error: outcome.error.unwrap_or_default(),
            console: outcome.console,
        })
        .await
}

async fn run_entry(
    store: &Arc<dyn ProcessorStore>,
    executor: &Arc<SandboxExecutor>,
    entry: &QueueRow,
) -> Result<ExecutionOutcome, EngineError> {
    let trigger = store.trigger(&entry.trigger_id, &entry.user_id).await?;
    let function = store.function(&trigger.function_id, &entry.user_id).await?;

    let unit = executor.compile(&function.source).await?;
    let values: HashMap<String, String> = serde_json::from_str(&trigger.params)
        .map_err(|e| EngineError::Bind(format!("trigger params are not a string map: {e}")))?;
    let bound = binder::bind(&unit.params, &values)?;
    let payload: Value = serde_json::from_str(&entry.payload)
        .map_err(|e| EngineError::Serialization(format!("corrupt payload snapshot: {e}")))?;

    Ok(executor.execute(&unit, bound, payload).await)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::storage::Storage;

    const ECHO_FN: &str = r#"
        export const supportedEvents = ["transaction_created"];
        export default async (params, payload) => {
            console.log("seen", payload.id);
            return { seen: payload.id };
        };
    "#;

    const THROWING_FN: &str = r#"
        export const supportedEvents = ["transaction_created"];
        export default (params, payload) => { throw new Error("entry failed"); };
    "#;

    struct Env {
        _dir: tempfile::TempDir,
        storage: Arc<Storage>,
        processor: QueueProcessor,
        user_id: String,
    }

    async fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        let user = storage.create_user("alice", "key").await.unwrap();
        let executor = Arc::new(SandboxExecutor::new(SandboxConfig::default()));
        let processor = QueueProcessor::new(storage.clone(), executor);
        Env {
            _dir: dir,
            storage,
            processor,
            user_id: user.id,
        }
    }

    async fn seed_trigger(env: &Env, source: &str) -> String {
        let f = env
            .storage
            .create_function(&env.user_id, "fn", source)
            .await
            .unwrap();
        env.storage
            .create_trigger(&env.user_id, "t", "transaction_created", &f.id, "{}")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn drains_the_queue_and_logs_each_entry() {
        let env = env().await;
        let trigger_id = seed_trigger(&env, ECHO_FN).await;
        for i in [1062, 1063] {
            env.storage
                .enqueue(&env.user_id, &trigger_id, &format!("{{\"id\":{i}}}"))
                .await
                .unwrap();
        }

        let results = env.processor.process(&env.user_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(env.storage.list_queue(&env.user_id).await.unwrap().is_empty());

        let logs = env.storage.list_log(&env.user_id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == "completed"));

        // The 1062 entry logged what it saw, console included.
        let log = logs
            .iter()
            .find(|l| l.result.contains("1062"))
            .expect("log for payload 1062");
        assert!(log.console.contains("seen 1062"));
    }

    #[tokio::test]
    async fn one_failing_entry_does_not_abort_the_batch() {
        let env = env().await;
        let good = seed_trigger(&env, ECHO_FN).await;
        let bad_fn = env
            .storage
            .create_function(&env.user_id, "bad", THROWING_FN)
            .await
            .unwrap();
        let bad = env
            .storage
            .create_trigger(&env.user_id, "bad", "transaction_created", &bad_fn.id, "{}")
            .await
            .unwrap()
            .id;

        env.storage
            .enqueue(&env.user_id, &good, "{\"id\":1}")
            .await
            .unwrap();
        env.storage
            .enqueue(&env.user_id, &bad, "{\"id\":2}")
            .await
            .unwrap();

        let results = env.processor.process(&env.user_id).await.unwrap();
        assert_eq!(results.len(), 2);

        let logs = env.storage.list_log(&env.user_id).await.unwrap();
        assert_eq!(logs.len(), 2);
        let failed = logs.iter().find(|l| l.status == "error").expect("error log");
        assert!(failed.error.contains("entry failed"));
        assert!(logs.iter().any(|l| l.status == "completed"));
    }

    #[tokio::test]
    async fn missing_trigger_yields_an_error_log_entry() {
        let env = env().await;
        let trigger_id = seed_trigger(&env, ECHO_FN).await;
        env.storage
            .enqueue(&env.user_id, &trigger_id, "{\"id\":1}")
            .await
            .unwrap();
        // Deleting the trigger also clears its pending entries; re-enqueue a
        // dangling reference the way a crashed half-written state would look.
        env.storage.delete_trigger(&trigger_id, &env.user_id).await.unwrap();
        env.storage
            .enqueue(&env.user_id, &trigger_id, "{\"id\":1}")
            .await
            .unwrap();

        let results = env.processor.process(&env.user_id).await.unwrap();
        assert_eq!(results.len(), 1);
        let logs = env.storage.list_log(&env.user_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "error");
        assert!(logs[0].error.contains("not found"));
    }

    #[tokio::test]
    async fn bind_failure_is_an_error_log_entry() {
        let env = env().await;
        let f = env
            .storage
            .create_function(
                &env.user_id,
                "needs-key",
                r#"
                export const params = { apiKey: { name: "API Key", type: "string" } };
                export const supportedEvents = ["transaction_created"];
                export default (params, payload) => params.apiKey;
                "#,
            )
            .await
            .unwrap();
        // Trigger configured without the required value.
        let t = env
            .storage
            .create_trigger(&env.user_id, "t", "transaction_created", &f.id, "{}")
            .await
            .unwrap();
        env.storage
            .enqueue(&env.user_id, &t.id, "{}")
            .await
            .unwrap();

        env.processor.process(&env.user_id).await.unwrap();
        let logs = env.storage.list_log(&env.user_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "error");
        assert!(logs[0].error.contains("apiKey"));
    }

    #[tokio::test]
    async fn processing_an_empty_queue_is_a_no_op() {
        let env = env().await;
        let results = env.processor.process(&env.user_id).await.unwrap();
        assert!(results.is_empty());
        assert!(env.storage.list_log(&env.user_id).await.unwrap().is_empty());
    }
}
