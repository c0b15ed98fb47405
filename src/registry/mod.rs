//! Process registry - child process bookkeeping
//!
//! This module provides:
//! - `ChildProcessHandle`: a tracked program with its limits and peak memory
//! - `ProcessRegistry`: the launch contract the tester talks to
//! - `PolledRegistry`: pid recovery by tree diffing plus a background poller
//!   that samples memory, evicts exited processes and kills memory hogs
//!
//! The registry does NOT enforce time or output limits (the tester does).

pub mod polled;
pub mod tree;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tracing::warn;

use crate::error::JudgeResult;
use crate::launcher::SourceLauncher;

pub use polled::PolledRegistry;
pub use tree::{ProcEntry, ProcessTree, ProcfsTree, TreeSnapshot};

/// Serializes every subprocess spawn of the whole OS process.
///
/// A pid diff is only meaningful if no other spawn happens between the two
/// snapshots, and the process tree is shared by every engine in the process.
static SPAWN_GATE: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

pub fn spawn_gate() -> &'static tokio::sync::Mutex<()> {
    &SPAWN_GATE
}

/// Send SIGKILL to `pid`. A process that is already gone is not an error.
pub fn force_kill(pid: u32) -> nix::Result<()> {
    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// A running program tracked by the registry
#[derive(Debug)]
pub struct ChildProcessHandle {
    pid: u32,
    time_limit: Duration,
    memory_limit_kb: u64,
    peak_memory_kb: AtomicU64,
    memory_killed: AtomicBool,
    evicted: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl ChildProcessHandle {
    pub fn new(pid: u32, child: Child, time_limit: Duration, memory_limit_kb: u64) -> Self {
        Self {
            pid,
            time_limit,
            memory_limit_kb,
            peak_memory_kb: AtomicU64::new(0),
            memory_killed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            child: Mutex::new(Some(child)),
        }
    }

    /// Handle with no OS handle attached
    #[cfg(test)]
    pub(crate) fn detached(pid: u32, time_limit: Duration, memory_limit_kb: u64) -> Self {
        Self {
            pid,
            time_limit,
            memory_limit_kb,
            peak_memory_kb: AtomicU64::new(0),
            memory_killed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            child: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn memory_limit_kb(&self) -> u64 {
        self.memory_limit_kb
    }

    pub fn peak_memory_kb(&self) -> u64 {
        self.peak_memory_kb.load(Ordering::Acquire)
    }

    /// Raise the recorded peak; returns the new peak
    pub fn record_memory(&self, kb: u64) -> u64 {
        self.peak_memory_kb.fetch_max(kb, Ordering::AcqRel).max(kb)
    }

    pub fn exceeds_memory_limit(&self) -> bool {
        self.peak_memory_kb() > self.memory_limit_kb
    }

    /// Whether the poller killed this process for its memory use
    pub fn was_memory_killed(&self) -> bool {
        self.memory_killed.load(Ordering::Acquire)
    }

    /// Whether the registry has stopped tracking this process
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Hand the OS handle to the caller. Only the first call gets it.
    pub fn take_child(&self) -> Option<Child> {
        self.child.lock().ok()?.take()
    }

    pub fn kill(&self) {
        if let Err(e) = force_kill(self.pid) {
            warn!("Failed to kill process {}: {}", self.pid, e);
        }
    }

    pub(crate) fn mark_memory_killed(&self) {
        self.memory_killed.store(true, Ordering::Release);
    }

    pub(crate) fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::Release);
    }
}

/// Launch contract between the tester and whatever tracks child processes
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// Start the launcher's program and begin tracking it.
    ///
    /// Fails with an internal error if the program cannot be spawned or its
    /// OS id cannot be recovered unambiguously.
    async fn launch_child_process(
        &self,
        launcher: &dyn SourceLauncher,
        time_limit: Duration,
        memory_limit_kb: u64,
    ) -> JudgeResult<std::sync::Arc<ChildProcessHandle>>;

    /// Number of processes currently tracked
    fn tracked(&self) -> usize;

    /// Stop background work and kill leftover processes
    async fn shutdown(&self);
}
