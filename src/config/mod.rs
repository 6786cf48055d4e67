use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4410;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── SandboxConfig ────────────────────────────────────────────────────────────

/// Sandbox resource limits (`[sandbox]` in config.toml).
///
/// Applied to every function invocation — production queue processing and
/// interactive test runs alike.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit per invocation in milliseconds. Default: 10 000.
    pub timeout_ms: u64,
    /// Cap on captured console output and on the serialized return value, in
    /// bytes. Console output past the cap is truncated with a marker line; an
    /// oversized return value fails the invocation. Default: 1 MiB.
    pub max_output_bytes: usize,
    /// V8 heap limit per isolate in bytes. Default: 64 MiB.
    pub max_heap_bytes: usize,
    /// Maximum simultaneously live isolates. Default: 8.
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_output_bytes: 1024 * 1024,
            max_heap_bytes: 64 * 1024 * 1024,
            max_concurrent: 8,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST server port (default: 4410).
    port: Option<u16>,
    /// Bind address for the REST server (default: "127.0.0.1").
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,ledgerd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured).
    log_format: Option<String>,
    /// Sandbox limits (`[sandbox]`).
    sandbox: Option<SandboxConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Bind address for the REST server (LEDGERD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    /// Per-invocation sandbox limits.
    pub sandbox: SandboxConfig,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("LEDGERD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let bind_address = bind_address
            .or(std::env::var("LEDGERD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let sandbox = toml.sandbox.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            log_format,
            bind_address,
            sandbox,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/ledgerd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("ledgerd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/ledgerd or ~/.local/share/ledgerd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("ledgerd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("ledgerd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\ledgerd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("ledgerd");
        }
    }
    // Fallback
    PathBuf::from(".ledgerd")
}
