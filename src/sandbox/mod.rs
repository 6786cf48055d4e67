//! V8 sandbox for user-authored functions.
//!
//! Submodules: `compiler` validates source and extracts static exports,
//! `runtime` executes compiled functions in throwaway isolates, `ops` is the
//! host capability surface, `loader` serves the in-memory main module and
//! remote imports.

pub mod compiler;
pub mod loader;
pub mod ops;
pub mod runtime;

pub use compiler::CompiledFunction;
pub use runtime::SandboxExecutor;

use serde::{Deserialize, Serialize};

/// One captured console line, in emit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub msg: String,
    pub is_err: bool,
}

/// Result of one sandboxed invocation. Every failure mode lands here as a
/// structured error — executing never panics the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// `completed` | `error`.
    pub status: OutcomeStatus,
    /// JSON value the function resolved to, for completed runs.
    pub result: Option<serde_json::Value>,
    /// Error message, for failed runs.
    pub error: Option<String>,
    /// Console output captured during the run, truncation marker included.
    pub console: Vec<ConsoleLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Error => "error",
        }
    }
}
