use anyhow::{Context as _, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::error::EngineError;
use crate::sandbox::ConsoleLine;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    /// Lowercase hex SHA-256 of the API key. The key itself is never stored.
    pub api_key_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct FunctionRow {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TriggerRow {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
    /// Event name this trigger fires on, e.g. `transaction_created`.
    pub event: String,
    pub function_id: String,
    /// JSON object of configured parameter values (string → string).
    pub params: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One pending (trigger, payload snapshot) pair awaiting a drain.
///
/// The payload is captured at enqueue time — later edits to the source
/// transaction never reach a pending job.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct QueueRow {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub trigger_id: String,
    pub payload: String,
    pub created_at: String,
}

/// Immutable record of one execution attempt. Never updated after insert.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct LogRow {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub trigger_id: String,
    /// `completed` | `error`.
    pub status: String,
    /// Serialized JSON result for completed runs, empty otherwise.
    pub result: String,
    /// Error message for failed runs, empty otherwise.
    pub error: String,
    /// JSON array of captured `{msg, is_err}` console lines, in emit order.
    pub console: String,
    pub created_at: String,
}

/// Fields for a log insert, produced by the processor from one outcome.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub user_id: String,
    pub trigger_id: String,
    pub status: String,
    pub result: String,
    pub error: String,
    pub console: Vec<ConsoleLine>,
}

// ─── Store seam ───────────────────────────────────────────────────────────────

/// The slice of storage the queue processor depends on, injected by `Arc` so
/// tests can drain against a scratch database.
///
/// `claim_queue` must be atomic: under concurrent drains every pending entry
/// is claimed by exactly one caller.
#[async_trait::async_trait]
pub trait ProcessorStore: Send + Sync {
    async fn claim_queue(&self, user_id: &str) -> Result<Vec<QueueRow>, EngineError>;
    async fn trigger(&self, id: &str, user_id: &str) -> Result<TriggerRow, EngineError>;
    async fn function(&self, id: &str, user_id: &str) -> Result<FunctionRow, EngineError>;
    async fn append_log(&self, entry: NewLogEntry) -> Result<LogRow, EngineError>;
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("ledgerd.db");
        let opts = sqlx::sqlite::SqliteConnectOptions::from_str(&format!(
            "sqlite://{}?mode=rwc",
            db_path.display()
        ))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let stmts = [
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS functions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                event TEXT NOT NULL,
                function_id TEXT NOT NULL,
                params TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS trigger_queue (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                trigger_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS trigger_log (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                trigger_id TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT NOT NULL,
                error TEXT NOT NULL,
                console TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_triggers_user_event ON triggers (user_id, event)",
            "CREATE INDEX IF NOT EXISTS idx_queue_user ON trigger_queue (user_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_log_user ON trigger_log (user_id, created_at)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("failed to run database migration")?;
        }
        Ok(())
    }

    // ─── Users ──────────────────────────────────────────────────────────────

    /// Lowercase hex SHA-256 used for API keys at rest.
    pub fn hash_api_key(api_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn create_user(&self, name: &str, api_key: &str) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, name, api_key_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(Self::hash_api_key(api_key))
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .context("user not found after insert")
    }

    pub async fn user_by_api_key(&self, api_key: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE api_key_hash = ?")
            .bind(Self::hash_api_key(api_key))
            .fetch_optional(&self.pool)
            .await?)
    }

    // ─── Functions ──────────────────────────────────────────────────────────

    pub async fn create_function(
        &self,
        user_id: &str,
        name: &str,
        source: &str,
    ) -> Result<FunctionRow, EngineError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO functions (id, user_id, name, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(name)
        .bind(source)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.function(&id, user_id).await
    }

    pub async fn function(&self, id: &str, user_id: &str) -> Result<FunctionRow, EngineError> {
        sqlx::query_as("SELECT * FROM functions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::NotFound("function"))
    }

    pub async fn list_functions(&self, user_id: &str) -> Result<Vec<FunctionRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM functions WHERE user_id = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Replace a function's fields wholesale (source is never diffed).
    pub async fn update_function(
        &self,
        id: &str,
        user_id: &str,
        name: Option<&str>,
        source: Option<&str>,
    ) -> Result<FunctionRow, EngineError> {
        let existing = self.function(id, user_id).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE functions SET name = ?, source = ?, updated_at = ? WHERE id = ?")
            .bind(name.unwrap_or(&existing.name))
            .bind(source.unwrap_or(&existing.source))
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.function(id, user_id).await
    }

    /// Delete a function. Blocked while any trigger still references it.
    pub async fn delete_function(&self, id: &str, user_id: &str) -> Result<(), EngineError> {
        self.function(id, user_id).await?;
        let (referencing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM triggers WHERE function_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if referencing > 0 {
            return Err(EngineError::FunctionInUse(referencing as usize));
        }
        sqlx::query("DELETE FROM functions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Triggers ───────────────────────────────────────────────────────────

    pub async fn create_trigger(
        &self,
        user_id: &str,
        name: &str,
        event: &str,
        function_id: &str,
        params: &str,
    ) -> Result<TriggerRow, EngineError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO triggers (id, user_id, name, event, function_id, params, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(name)
        .bind(event)
        .bind(function_id)
        .bind(params)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.trigger(&id, user_id).await
    }

    pub async fn trigger(&self, id: &str, user_id: &str) -> Result<TriggerRow, EngineError> {
        sqlx::query_as("SELECT * FROM triggers WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::NotFound("trigger"))
    }

    pub async fn list_triggers(&self, user_id: &str) -> Result<Vec<TriggerRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM triggers WHERE user_id = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// All of a user's triggers registered for `event`. Equality match only.
    pub async fn triggers_for_event(&self, user_id: &str, event: &str) -> Result<Vec<TriggerRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM triggers WHERE user_id = ? AND event = ? ORDER BY created_at",
        )
        .bind(user_id)
        .bind(event)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn update_trigger(
        &self,
        id: &str,
        user_id: &str,
        name: Option<&str>,
        event: Option<&str>,
        function_id: Option<&str>,
        params: Option<&str>,
    ) -> Result<TriggerRow, EngineError> {
        let existing = self.trigger(id, user_id).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE triggers SET name = ?, event = ?, function_id = ?, params = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(name.unwrap_or(&existing.name))
        .bind(event.unwrap_or(&existing.event))
        .bind(function_id.unwrap_or(&existing.function_id))
        .bind(params.unwrap_or(&existing.params))
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.trigger(id, user_id).await
    }

    /// Triggers are deleted independently of their function. Pending queue
    /// entries for the trigger are removed with it.
    pub async fn delete_trigger(&self, id: &str, user_id: &str) -> Result<(), EngineError> {
        self.trigger(id, user_id).await?;
        sqlx::query("DELETE FROM trigger_queue WHERE trigger_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM triggers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Trigger queue ──────────────────────────────────────────────────────

    pub async fn enqueue(
        &self,
        user_id: &str,
        trigger_id: &str,
        payload: &str,
    ) -> Result<QueueRow, EngineError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO trigger_queue (id, user_id, trigger_id, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(trigger_id)
        .bind(payload)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM trigger_queue WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::NotFound("queue entry"))
    }

    pub async fn list_queue(&self, user_id: &str) -> Result<Vec<QueueRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM trigger_queue WHERE user_id = ? ORDER BY created_at",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    // ─── Trigger log ────────────────────────────────────────────────────────

    pub async fn list_log(&self, user_id: &str) -> Result<Vec<LogRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM trigger_log WHERE user_id = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }
}

#[async_trait::async_trait]
impl ProcessorStore for Storage {
    /// Atomically claim-and-remove the user's entire pending snapshot.
    ///
    /// A single `DELETE ... RETURNING` statement: concurrent drains never see
    /// the same entry twice, so each entry gets exactly one processing
    /// attempt regardless of its outcome.
    async fn claim_queue(&self, user_id: &str) -> Result<Vec<QueueRow>, EngineError> {
        Ok(sqlx::query_as(
            "DELETE FROM trigger_queue WHERE user_id = ? RETURNING *",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn trigger(&self, id: &str, user_id: &str) -> Result<TriggerRow, EngineError> {
        Storage::trigger(self, id, user_id).await
    }

    async fn function(&self, id: &str, user_id: &str) -> Result<FunctionRow, EngineError> {
        Storage::function(self, id, user_id).await
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogRow, EngineError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let console = serde_json::to_string(&entry.console)
            .map_err(|e| EngineError::Internal(e.into()))?;
        sqlx::query(
            "INSERT INTO trigger_log (id, user_id, trigger_id, status, result, error, console, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&entry.user_id)
        .bind(&entry.trigger_id)
        .bind(&entry.status)
        .bind(&entry.result)
        .bind(&entry.error)
        .bind(&console)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM trigger_log WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::NotFound("log entry"))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
