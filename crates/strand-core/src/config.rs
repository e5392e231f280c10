use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

/// Top-level Strand configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Initial delay between node attempts. 0 disables backoff.
    #[serde(default = "default_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    /// Upper bound on the delay between node attempts.
    #[serde(default = "default_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    /// How long `trigger_and_wait` waits before reporting "no result yet".
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Capacity of the execution event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_initial_backoff_ms: default_initial_backoff_ms(),
            retry_max_backoff_ms: default_max_backoff_ms(),
            wait_timeout_secs: default_wait_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 { 200 }
fn default_max_backoff_ms() -> u64 { 5_000 }
fn default_wait_timeout_secs() -> u64 { 300 }
fn default_event_capacity() -> usize { 256 }

/// Persistent storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for graphs, runs and decision logs.
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    /// How long to wait for a run lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Locks older than this are considered abandoned.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

fn default_storage_dir() -> String { "~/.strand/storage".to_string() }
fn default_lock_timeout_ms() -> u64 { 5_000 }
fn default_stale_lock_secs() -> u64 { 300 }

/// JSONL runtime logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for log files. Default: <storage dir>/logs
    #[serde(default)]
    pub dir: Option<String>,
    /// Verbosity: 1 = run summary, 2 = per node, 3 = per edge.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> u8 { 1 }

/// Condition sandbox resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_max_expression_len")]
    pub max_expression_len: usize,
    /// Largest list/string/range an expression may build, nested elements
    /// included. Ten times this bounds the cells one evaluation may allocate.
    #[serde(default = "default_max_collection_len")]
    pub max_collection_len: usize,
    /// Maximum syntactic nesting depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_expression_len: default_max_expression_len(),
            max_collection_len: default_max_collection_len(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_expression_len() -> usize { 4_096 }
fn default_max_collection_len() -> usize { 10_000 }
fn default_max_depth() -> usize { 64 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StrandError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| StrandError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the storage directory (expand ~).
    pub fn storage_dir(&self) -> PathBuf {
        expand_home(&self.storage.dir)
    }

    /// Resolve the JSONL log directory.
    pub fn log_dir(&self) -> PathBuf {
        match self.log.dir {
            Some(ref dir) => expand_home(dir),
            None => self.storage_dir().join("logs"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
