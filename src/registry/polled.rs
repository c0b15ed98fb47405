//! Polling process registry
//!
//! Spawns are serialized through the spawn gate and the new program's pid is
//! recovered by diffing the judge's direct children around the spawn. A
//! background task walks the process tree once per tick to sample memory,
//! evict processes that exited and kill those over their memory budget.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::tree::{ProcessTree, ProcfsTree};
use super::{force_kill, spawn_gate, ChildProcessHandle, ProcessRegistry};
use crate::config::{EngineConfig, PidDiscovery, ShutdownScope};
use crate::error::{JudgeError, JudgeResult};
use crate::launcher::SourceLauncher;

/// What one reconciliation pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub sampled: usize,
    pub exited: usize,
    pub memory_killed: usize,
}

struct Inner {
    tree: Arc<dyn ProcessTree>,
    table: Mutex<HashMap<u32, Arc<ChildProcessHandle>>>,
    self_pid: u32,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HashMap<u32, Arc<ChildProcessHandle>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict(&self, pid: u32) {
        if let Some(handle) = self.table().remove(&pid) {
            handle.mark_evicted();
        }
    }

    /// One pass over every tracked handle. Runs without holding the table
    /// lock while it reads the OS, so spawns are never blocked by polling.
    fn reconcile(&self) -> Result<ReconcileStats> {
        let handles: Vec<Arc<ChildProcessHandle>> = self.table().values().cloned().collect();
        let mut stats = ReconcileStats::default();
        if handles.is_empty() {
            return Ok(stats);
        }

        let snapshot = self.tree.snapshot()?;

        for handle in handles {
            let pid = handle.pid();

            if !snapshot.is_running_child(pid, self.self_pid) {
                debug!("Process {} exited, no longer tracked", pid);
                self.evict(pid);
                stats.exited += 1;
                continue;
            }

            if let Some(kb) = self.tree.memory_kb(pid) {
                handle.record_memory(kb);
                stats.sampled += 1;
            }

            if handle.exceeds_memory_limit() {
                warn!(
                    "Process {} exceeded memory limit ({} KB > {} KB), killing",
                    pid,
                    handle.peak_memory_kb(),
                    handle.memory_limit_kb()
                );
                handle.mark_memory_killed();
                handle.kill();
                self.evict(pid);
                stats.memory_killed += 1;
            }
        }

        Ok(stats)
    }
}

pub struct PolledRegistry {
    inner: Arc<Inner>,
    pid_discovery: PidDiscovery,
    shutdown_scope: ShutdownScope,
    stop: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl PolledRegistry {
    /// Registry over `/proc` with its poller already running
    pub fn start(config: &EngineConfig) -> Arc<Self> {
        Self::start_with_tree(config, Arc::new(ProcfsTree))
    }

    pub fn start_with_tree(config: &EngineConfig, tree: Arc<dyn ProcessTree>) -> Arc<Self> {
        let (stop, stop_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            tree,
            table: Mutex::new(HashMap::new()),
            self_pid: std::process::id(),
        });

        let poller = spawn_poller(inner.clone(), config.poll_interval, stop_rx);
        info!(
            "Process registry started (poll interval {:?}, pid discovery {:?})",
            config.poll_interval, config.pid_discovery
        );

        Arc::new(Self {
            inner,
            pid_discovery: config.pid_discovery,
            shutdown_scope: config.shutdown_scope,
            stop,
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Handle for `pid`, if it is still tracked
    pub fn get(&self, pid: u32) -> Option<Arc<ChildProcessHandle>> {
        self.inner.table().get(&pid).cloned()
    }

    pub fn tracked_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.inner.table().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Run one reconciliation pass right now
    pub fn reconcile_now(&self) -> Result<ReconcileStats> {
        self.inner.reconcile()
    }

    /// Direct children of the judge, read on the blocking pool
    async fn children_now(&self) -> Result<HashSet<u32>> {
        let tree = self.inner.tree.clone();
        let self_pid = self.inner.self_pid;
        tokio::task::spawn_blocking(move || -> Result<HashSet<u32>> {
            Ok(tree.snapshot()?.children_of(self_pid))
        })
            .await
            .context("Process tree walk panicked")?
    }

    async fn spawn_with_tree_diff(&self, launcher: &dyn SourceLauncher) -> JudgeResult<(u32, Child)> {
        let before = self.children_now().await?;

        let mut child = launcher.launch()?;

        let after = match self.children_now().await {
            Ok(children) => children,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e.into());
            }
        };

        let new: Vec<u32> = after.difference(&before).copied().collect();
        let reported = child.id();
        match new.as_slice() {
            [pid] if reported.map_or(true, |r| r == *pid) => Ok((*pid, child)),
            _ => {
                let _ = child.start_kill();
                Err(JudgeError::internal(format!(
                    "Ambiguous child process tracking: {} new children {:?} (spawn reported {:?})",
                    new.len(),
                    new,
                    reported
                )))
            }
        }
    }

    fn spawn_reported(&self, launcher: &dyn SourceLauncher) -> JudgeResult<(u32, Child)> {
        let child = launcher.launch()?;
        let pid = child
            .id()
            .ok_or_else(|| JudgeError::internal("Spawned program has no process id"))?;
        Ok((pid, child))
    }

    fn shutdown_victims(&self) -> Vec<u32> {
        let self_pid = self.inner.self_pid;
        let snapshot = match self.inner.tree.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to walk process tree on shutdown: {:#}", e);
                return self.tracked_pids();
            }
        };

        match self.shutdown_scope {
            ShutdownScope::ProcessTree => snapshot.descendants_of(self_pid),
            ShutdownScope::Owned => {
                let mut victims = Vec::new();
                for pid in self.tracked_pids() {
                    if snapshot.is_running_child(pid, self_pid) {
                        victims.push(pid);
                        victims.extend(snapshot.descendants_of(pid));
                    }
                }
                victims
            }
        }
    }
}

#[async_trait]
impl ProcessRegistry for PolledRegistry {
    async fn launch_child_process(
        &self,
        launcher: &dyn SourceLauncher,
        time_limit: Duration,
        memory_limit_kb: u64,
    ) -> JudgeResult<Arc<ChildProcessHandle>> {
        let (pid, child) = {
            let _gate = spawn_gate().lock().await;
            match self.pid_discovery {
                PidDiscovery::TreeDiff => self.spawn_with_tree_diff(launcher).await?,
                PidDiscovery::SpawnReported => self.spawn_reported(launcher)?,
            }
        };

        let handle = Arc::new(ChildProcessHandle::new(
            pid,
            child,
            time_limit,
            memory_limit_kb,
        ));
        self.inner.table().insert(pid, handle.clone());

        debug!(
            "Tracking {} program as pid {} (time limit {:?}, memory limit {} KB)",
            launcher.language(),
            pid,
            time_limit,
            memory_limit_kb
        );
        Ok(handle)
    }

    fn tracked(&self) -> usize {
        self.inner.table().len()
    }

    async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                warn!("Process registry poller ended abnormally: {}", e);
            }
        }

        let victims = self.shutdown_victims();
        for &pid in &victims {
            if let Err(e) = force_kill(pid) {
                warn!("Failed to kill process {} on shutdown: {}", pid, e);
            }
        }

        for (_, handle) in self.inner.table().drain() {
            handle.mark_evicted();
        }
        info!(
            "Process registry stopped, killed {} leftover processes",
            victims.len()
        );
    }
}

fn spawn_poller(
    inner: Arc<Inner>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let inner = inner.clone();
                    match tokio::task::spawn_blocking(move || inner.reconcile()).await {
                        Ok(Ok(stats)) if stats.exited + stats.memory_killed > 0 => {
                            debug!("Reconciled process table: {:?}", stats);
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!("Process table reconciliation failed: {:#}", e),
                        Err(e) => error!("Process table reconciliation panicked: {}", e),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Process registry poller stopped");
    })
}
