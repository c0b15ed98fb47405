//! Persistence collaborator interface
//!
//! The engine reports finished submissions and every testcase run here. It
//! never reads anything back, and a failed write is logged, not retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::core::{Submission, TestcaseRun};

#[async_trait]
pub trait JudgeStore: Send + Sync {
    /// Record the submission's status, score, duration and memory
    async fn update_submission(&self, submission: &Submission) -> Result<()>;

    async fn insert_testcase_run(&self, run: &TestcaseRun) -> Result<()>;
}

/// Store that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    submissions: Mutex<HashMap<i64, Submission>>,
    runs: Mutex<Vec<TestcaseRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submission(&self, id: i64) -> Option<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn runs_for(&self, submission_id: i64) -> Vec<TestcaseRun> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JudgeStore for MemoryStore {
    async fn update_submission(&self, submission: &Submission) -> Result<()> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(submission.id, submission.clone());
        Ok(())
    }

    async fn insert_testcase_run(&self, run: &TestcaseRun) -> Result<()> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(run.clone());
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record<'a> {
    Submission(&'a Submission),
    TestcaseRun(&'a TestcaseRun),
}

/// Store that appends one JSON document per record to a file
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl JsonLinesStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: Record<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to append to {:?}", self.path))?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl JudgeStore for JsonLinesStore {
    async fn update_submission(&self, submission: &Submission) -> Result<()> {
        self.append(Record::Submission(submission)).await
    }

    async fn insert_testcase_run(&self, run: &TestcaseRun) -> Result<()> {
        self.append(Record::TestcaseRun(run)).await
    }
}
