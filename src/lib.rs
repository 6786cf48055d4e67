pub mod config;
pub mod engine;
pub mod error;
pub mod rest;
pub mod sandbox;
pub mod storage;

use std::sync::Arc;

use config::DaemonConfig;
use sandbox::SandboxExecutor;
use storage::Storage;

/// Shared application state passed to every REST handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    pub executor: Arc<SandboxExecutor>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: DaemonConfig, storage: Storage) -> Self {
        let executor = Arc::new(SandboxExecutor::new(config.sandbox.clone()));
        Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            executor,
            started_at: std::time::Instant::now(),
        }
    }
}
