//! Process tree introspection
//!
//! The registry only needs three things from the OS: who is whose parent,
//! whether a process is still running, and how much memory it holds.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};

/// One live (or zombie) process as seen during a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: u32,
    pub ppid: u32,
    pub zombie: bool,
}

/// Point-in-time view of the process table
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    entries: HashMap<u32, ProcEntry>,
}

impl TreeSnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = ProcEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.pid, e)).collect(),
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcEntry> {
        self.entries.get(&pid)
    }

    /// Whether `pid` exists, has not exited, and is still a child of `parent`
    pub fn is_running_child(&self, pid: u32, parent: u32) -> bool {
        matches!(self.get(pid), Some(e) if !e.zombie && e.ppid == parent)
    }

    /// Direct children of `parent`, zombies included
    pub fn children_of(&self, parent: u32) -> HashSet<u32> {
        self.entries
            .values()
            .filter(|e| e.ppid == parent)
            .map(|e| e.pid)
            .collect()
    }

    /// Every descendant of `root`, breadth first, `root` excluded
    pub fn descendants_of(&self, root: u32) -> Vec<u32> {
        let mut by_parent: HashMap<u32, Vec<u32>> = HashMap::new();
        for e in self.entries.values() {
            by_parent.entry(e.ppid).or_default().push(e.pid);
        }

        let mut found = Vec::new();
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(pid) = queue.pop_front() {
            for &child in by_parent.get(&pid).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        found
    }
}

/// Source of process tree snapshots and memory readings
pub trait ProcessTree: Send + Sync {
    fn snapshot(&self) -> Result<TreeSnapshot>;

    /// Memory held by `pid` in KB, `None` if the process is gone
    fn memory_kb(&self, pid: u32) -> Option<u64>;
}

/// `ProcessTree` backed by `/proc`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsTree;

impl ProcessTree for ProcfsTree {
    fn snapshot(&self) -> Result<TreeSnapshot> {
        let processes =
            procfs::process::all_processes().context("Failed to enumerate processes")?;

        let mut entries = Vec::new();
        for process in processes {
            // Processes can vanish mid-walk
            let Ok(process) = process else { continue };
            let Ok(stat) = process.stat() else { continue };
            entries.push(ProcEntry {
                pid: stat.pid as u32,
                ppid: stat.ppid as u32,
                zombie: stat.state == 'Z',
            });
        }

        Ok(TreeSnapshot::from_entries(entries))
    }

    fn memory_kb(&self, pid: u32) -> Option<u64> {
        let status = procfs::process::Process::new(pid as i32)
            .and_then(|p| p.status())
            .ok()?;
        // VmHWM is the peak resident set, so spikes between polls still count
        match (status.vmhwm, status.vmrss) {
            (Some(hwm), Some(rss)) => Some(hwm.max(rss)),
            (hwm, rss) => hwm.or(rss),
        }
    }
}
