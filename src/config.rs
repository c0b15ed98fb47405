//! Engine configuration
//!
//! Defaults suit a production worker. Every field can be overridden from the
//! environment (a `.env` file is honored).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the registry recovers the OS id of a freshly spawned program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidDiscovery {
    /// Diff the judge's direct children before and after the spawn
    TreeDiff,
    /// Trust the id reported by the spawn call
    SpawnReported,
}

impl FromStr for PidDiscovery {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tree-diff" | "tree_diff" => Ok(PidDiscovery::TreeDiff),
            "spawn-reported" | "spawn_reported" => Ok(PidDiscovery::SpawnReported),
            other => anyhow::bail!("Invalid pid discovery strategy: {}", other),
        }
    }
}

/// Which processes are killed when the engine shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownScope {
    /// Every descendant of the judge process
    ProcessTree,
    /// Only programs this engine still tracks, with their descendants
    Owned,
}

impl FromStr for ShutdownScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "process-tree" | "process_tree" => Ok(ShutdownScope::ProcessTree),
            "owned" => Ok(ShutdownScope::Owned),
            other => anyhow::bail!("Invalid shutdown scope: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which per-submission program directories are created
    pub temp_root: PathBuf,
    /// Interval between process registry reconciliation passes
    pub poll_interval: Duration,
    /// Worker pool size
    pub worker_threads: usize,
    /// Compiler subprocesses are killed after this long
    pub compile_timeout: Duration,
    pub pid_discovery: PidDiscovery,
    pub shutdown_scope: ShutdownScope,
    /// Maximum number of captured output bytes kept on a testcase run
    pub output_preview_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("judge-engine"),
            poll_interval: Duration::from_millis(1000),
            worker_threads: num_cpus::get().max(1),
            compile_timeout: Duration::from_millis(30_000),
            pid_discovery: PidDiscovery::TreeDiff,
            shutdown_scope: ShutdownScope::ProcessTree,
            output_preview_bytes: 4096,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(root) = std::env::var("JUDGE_TEMP_ROOT") {
            config.temp_root = PathBuf::from(root);
        }
        if let Some(ms) = env_parse::<u64>("JUDGE_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(workers) = env_parse::<usize>("JUDGE_WORKERS")? {
            config.worker_threads = workers.max(1);
        }
        if let Some(ms) = env_parse::<u64>("JUDGE_COMPILE_TIMEOUT_MS")? {
            config.compile_timeout = Duration::from_millis(ms);
        }
        if let Some(strategy) = env_parse::<PidDiscovery>("JUDGE_PID_DISCOVERY")? {
            config.pid_discovery = strategy;
        }
        if let Some(scope) = env_parse::<ShutdownScope>("JUDGE_SHUTDOWN_SCOPE")? {
            config.shutdown_scope = scope;
        }
        if let Some(bytes) = env_parse::<usize>("JUDGE_OUTPUT_PREVIEW_BYTES")? {
            config.output_preview_bytes = bytes;
        }

        Ok(config)
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    /// Intervals below one millisecond are raised to one millisecond
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_shutdown_scope(mut self, scope: ShutdownScope) -> Self {
        self.shutdown_scope = scope;
        self
    }

    pub fn with_pid_discovery(mut self, strategy: PidDiscovery) -> Self {
        self.pid_discovery = strategy;
        self
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(None),
    }
}
