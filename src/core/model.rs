//! Data handed to the engine by its callers and the records it produces.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use super::status::ExecutionStatus;

/// A user submission
///
/// Created by the submitting service. Only the judger mutates the result
/// fields, and a submission is terminal once `status` leaves `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub problem_id: i64,
    pub author_id: i64,
    pub code: String,
    pub language: String,
    pub created_at: SystemTime,
    pub status: ExecutionStatus,
    pub score: u32,
    /// Sum of batch durations in milliseconds
    pub duration_ms: u64,
    pub peak_memory_kb: u64,
}

impl Submission {
    pub fn new(
        id: i64,
        problem_id: i64,
        author_id: i64,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            problem_id,
            author_id,
            code: code.into(),
            language: language.into(),
            created_at: SystemTime::now(),
            status: ExecutionStatus::Pending,
            score: 0,
            duration_ms: 0,
            peak_memory_kb: 0,
        }
    }
}

/// Where a problem is published. The engine carries this but never
/// judges differently because of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemKind {
    #[default]
    Practice,
    Contest { submission_limit: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub output_limit_kb: u64,
    pub batches: Vec<Batch>,
    #[serde(default)]
    pub kind: ProblemKind,
}

impl Problem {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    pub fn total_points(&self) -> u32 {
        self.batches.iter().map(|b| b.points).sum()
    }

    pub fn testcase_count(&self) -> usize {
        self.batches.iter().map(|b| b.testcases.len()).sum()
    }
}

/// Weighted group of testcases, scored all-or-nothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub points: u32,
    pub testcases: Vec<Testcase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testcase {
    pub id: i64,
    pub input: String,
    /// Leading and trailing whitespace is insignificant
    pub expected_output: String,
}

/// Recorded outcome of running one testcase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestcaseRun {
    pub submission_id: i64,
    pub testcase_id: i64,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub peak_memory_kb: u64,
    pub output: String,
}

impl TestcaseRun {
    pub fn new(testcase_id: i64, status: ExecutionStatus) -> Self {
        Self {
            submission_id: 0,
            testcase_id,
            status,
            duration_ms: 0,
            peak_memory_kb: 0,
            output: String::new(),
        }
    }

    pub fn skipped(testcase_id: i64) -> Self {
        Self::new(testcase_id, ExecutionStatus::Skipped)
    }
}

/// Aggregated outcome of one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: i64,
    pub awarded_points: u32,
    pub duration_ms: u64,
    pub runs: Vec<TestcaseRun>,
}

impl BatchResult {
    pub fn is_all_clear(&self) -> bool {
        self.runs.iter().all(|r| r.status.is_all_clear())
    }
}

/// What `judge` hands back to its caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub submission_id: i64,
    pub status: ExecutionStatus,
    pub score: u32,
    pub duration_ms: u64,
    pub peak_memory_kb: u64,
    pub batches: Vec<BatchResult>,
    /// Compile error or internal error detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmissionResult {
    /// Result for a submission that never reached testing
    pub fn rejected(submission_id: i64, status: ExecutionStatus, message: Option<String>) -> Self {
        Self {
            submission_id,
            status,
            score: 0,
            duration_ms: 0,
            peak_memory_kb: 0,
            batches: vec![],
            message,
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = &TestcaseRun> {
        self.batches.iter().flat_map(|b| b.runs.iter())
    }
}
