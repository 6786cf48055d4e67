//! Engine error taxonomy.
//!
//! Every failure mode of the compile → bind → execute pipeline is a variant
//! here. All variants are caught at the queue-entry or test-runner boundary
//! and converted into a structured outcome — none may crash the processor or
//! the daemon.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad source: syntax error or invalid module shape (missing/invalid
    /// default export, wrong arity).
    #[error("compile error: {reason}")]
    Compile {
        reason: String,
        /// V8-reported position (`file:line:col`) when available.
        location: Option<String>,
    },

    /// A parameter required by the function's declared schema is missing or
    /// cannot be coerced from the trigger's configured values.
    #[error("parameter bind error: {0}")]
    Bind(String),

    /// Wall-clock limit expired; the isolate was forcibly torn down.
    #[error("execution timed out")]
    Timeout,

    /// The function threw, a promise rejected, or the isolate faulted.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Output exceeded the configured byte cap, or the return value is not
    /// JSON-serializable.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A referenced function, trigger, or user does not exist (or is owned by
    /// someone else — indistinguishable by design).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Deleting a function that a trigger still references is blocked.
    #[error("function is referenced by {0} trigger(s)")]
    FunctionInUse(usize),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
            location: None,
        }
    }

    /// HTTP status the REST layer reports for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Compile { .. } | Self::Bind(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::FunctionInUse(_) => StatusCode::CONFLICT,
            Self::Timeout | Self::Runtime(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row"),
            other => Self::Internal(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_by_variant() {
        assert_eq!(
            EngineError::compile("x").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            EngineError::Bind("k".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            EngineError::NotFound("function").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::FunctionInUse(2).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            EngineError::Timeout.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn timeout_message_is_stable() {
        // The log/outcome message the UI matches on.
        assert_eq!(EngineError::Timeout.to_string(), "execution timed out");
    }
}
