//! Judger module for processing submissions
//!
//! A submission moves through: source check, launcher resolution and
//! preparation, batch testing, finalization. Any failure before testing ends
//! the submission with a dedicated status; failures during testing only
//! degrade the affected testcase.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::checker::SourceChecker;
use crate::config::EngineConfig;
use crate::core::{
    most_severe, Batch, BatchResult, ExecutionStatus, Problem, Submission, SubmissionResult,
    TestcaseRun,
};
use crate::error::{JudgeError, JudgeResult};
use crate::languages::LanguageRegistry;
use crate::launcher::{resolve_launcher, LaunchContext, SourceLauncher};
use crate::pool::WorkerPool;
use crate::registry::ProcessRegistry;
use crate::store::JudgeStore;
use crate::tester::Tester;

/// Limits every testcase of a problem runs under
#[derive(Debug, Clone, Copy)]
struct RunLimits {
    time_limit: Duration,
    memory_limit_kb: u64,
    output_limit_kb: u64,
}

impl RunLimits {
    fn of(problem: &Problem) -> Self {
        Self {
            time_limit: problem.time_limit(),
            memory_limit_kb: problem.memory_limit_kb,
            output_limit_kb: problem.output_limit_kb,
        }
    }
}

pub struct Judger {
    languages: Arc<LanguageRegistry>,
    checker: SourceChecker,
    tester: Tester,
    pool: WorkerPool,
    store: Arc<dyn JudgeStore>,
    launch_ctx: LaunchContext,
}

impl Judger {
    pub fn new(
        config: &EngineConfig,
        languages: Arc<LanguageRegistry>,
        registry: Arc<dyn ProcessRegistry>,
        store: Arc<dyn JudgeStore>,
    ) -> Self {
        Self {
            checker: SourceChecker::new(languages.clone()),
            languages,
            tester: Tester::new(registry, config.output_preview_bytes),
            pool: WorkerPool::new(config.worker_threads),
            store,
            launch_ctx: LaunchContext {
                temp_root: config.temp_root.clone(),
                compile_timeout: config.compile_timeout,
            },
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Judge `submission` against `problem`, write the outcome onto the
    /// submission and persist it. Never fails: every error becomes a status.
    pub async fn judge(&self, submission: &mut Submission, problem: &Problem) -> SubmissionResult {
        info!(
            "Judging submission {}: problem_id={}, language={}, batches={}, testcases={}, points={}",
            submission.id,
            problem.id,
            submission.language,
            problem.batches.len(),
            problem.testcase_count(),
            problem.total_points()
        );

        let result = self.evaluate(submission, problem).await;
        self.finalize(submission, result).await
    }

    async fn evaluate(&self, submission: &Submission, problem: &Problem) -> SubmissionResult {
        match self.checker.is_clean(&submission.code, &submission.language) {
            Ok(true) => {}
            Ok(false) => {
                return SubmissionResult::rejected(
                    submission.id,
                    ExecutionStatus::IllegalCode,
                    None,
                )
            }
            Err(e) => return rejected_by(submission.id, e),
        }

        let launcher = match self.acquire_launcher(submission).await {
            Ok(launcher) => launcher,
            Err(e) => return rejected_by(submission.id, e),
        };

        let batches = self
            .run_batches(problem, launcher.clone(), RunLimits::of(problem))
            .await;
        launcher.close().await;

        aggregate(submission.id, batches)
    }

    /// Resolve and prepare a launcher on the worker pool. A launcher whose
    /// preparation fails is closed before the error is returned.
    async fn acquire_launcher(&self, submission: &Submission) -> JudgeResult<Arc<dyn SourceLauncher>> {
        let languages = self.languages.clone();
        let ctx = self.launch_ctx.clone();
        let submission = submission.clone();

        let task = self.pool.spawn(async move {
            let launcher = resolve_launcher(&submission, &languages, &ctx)?;
            if let Err(e) = launcher.prepare().await {
                launcher.close().await;
                return Err(e);
            }
            Ok(launcher)
        });

        task.await
            .map_err(|e| JudgeError::internal(format!("Launcher task failed: {}", e)))?
    }

    /// Batches run concurrently; results come back in problem order
    async fn run_batches(
        &self,
        problem: &Problem,
        launcher: Arc<dyn SourceLauncher>,
        limits: RunLimits,
    ) -> Vec<BatchResult> {
        let handles: Vec<_> = problem
            .batches
            .iter()
            .map(|batch| {
                tokio::spawn(run_batch(
                    batch.clone(),
                    self.tester.clone(),
                    self.pool.clone(),
                    launcher.clone(),
                    limits,
                ))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (batch, handle) in problem.batches.iter().zip(handles) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Batch {} task failed: {}", batch.id, e);
                    results.push(failed_batch(batch));
                }
            }
        }
        results
    }

    async fn finalize(&self, submission: &mut Submission, mut result: SubmissionResult) -> SubmissionResult {
        submission.status = result.status;
        submission.score = result.score;
        submission.duration_ms = result.duration_ms;
        submission.peak_memory_kb = result.peak_memory_kb;

        for batch in &mut result.batches {
            for run in &mut batch.runs {
                run.submission_id = submission.id;
            }
        }

        if let Err(e) = self.store.update_submission(submission).await {
            error!("Failed to store submission {}: {:#}", submission.id, e);
        }
        for run in result.runs() {
            if let Err(e) = self.store.insert_testcase_run(run).await {
                error!(
                    "Failed to store run of testcase {} for submission {}: {:#}",
                    run.testcase_id, submission.id, e
                );
            }
        }

        info!(
            "Submission summary: submission_id={}, status={}, score={}, duration_ms={}, peak_memory_kb={}",
            submission.id, result.status, result.score, result.duration_ms, result.peak_memory_kb
        );
        result
    }
}

fn rejected_by(submission_id: i64, e: JudgeError) -> SubmissionResult {
    let status = e.status();
    let message = match e {
        JudgeError::CompileError(msg) => {
            info!("Submission {} failed to compile", submission_id);
            Some(msg)
        }
        JudgeError::Internal(inner) => {
            error!("Internal error while judging submission {}: {:#}", submission_id, inner);
            Some(format!("{:#}", inner))
        }
        other => {
            warn!("Submission {} rejected: {}", submission_id, other);
            Some(other.to_string())
        }
    };
    SubmissionResult::rejected(submission_id, status, message)
}

/// Testcases of one batch in order. After the first testcase that is not
/// ALL_CLEAR the rest are marked SKIPPED without running.
async fn run_batch(
    batch: Batch,
    tester: Tester,
    pool: WorkerPool,
    launcher: Arc<dyn SourceLauncher>,
    limits: RunLimits,
) -> BatchResult {
    let mut runs = Vec::with_capacity(batch.testcases.len());
    let mut failed = false;

    for testcase in batch.testcases {
        if failed {
            runs.push(TestcaseRun::skipped(testcase.id));
            continue;
        }

        let testcase_id = testcase.id;
        let tester = tester.clone();
        let launcher = launcher.clone();
        let run = pool
            .spawn(async move {
                tester
                    .test(
                        &testcase,
                        launcher.as_ref(),
                        limits.time_limit,
                        limits.memory_limit_kb,
                        limits.output_limit_kb,
                    )
                    .await
            })
            .await
            .unwrap_or_else(|e| {
                error!("Testcase {} task failed: {}", testcase_id, e);
                TestcaseRun::new(testcase_id, ExecutionStatus::InternalError)
            });

        failed = !run.status.is_all_clear();
        runs.push(run);
    }

    score_batch(batch.id, batch.points, runs)
}

/// Points are awarded only when every run is ALL_CLEAR
fn score_batch(batch_id: i64, points: u32, runs: Vec<TestcaseRun>) -> BatchResult {
    let all_clear = runs.iter().all(|r| r.status.is_all_clear());
    BatchResult {
        batch_id,
        awarded_points: if all_clear { points } else { 0 },
        duration_ms: runs.iter().map(|r| r.duration_ms).sum(),
        runs,
    }
}

fn failed_batch(batch: &Batch) -> BatchResult {
    let runs = batch
        .testcases
        .iter()
        .map(|tc| TestcaseRun::new(tc.id, ExecutionStatus::InternalError))
        .collect();
    score_batch(batch.id, batch.points, runs)
}

fn aggregate(submission_id: i64, batches: Vec<BatchResult>) -> SubmissionResult {
    let status = most_severe(batches.iter().flat_map(|b| b.runs.iter().map(|r| r.status)));
    let score = batches.iter().map(|b| b.awarded_points).sum();
    let duration_ms = batches.iter().map(|b| b.duration_ms).sum();
    let peak_memory_kb = batches
        .iter()
        .flat_map(|b| b.runs.iter().map(|r| r.peak_memory_kb))
        .max()
        .unwrap_or(0);

    SubmissionResult {
        submission_id,
        status,
        score,
        duration_ms,
        peak_memory_kb,
        batches,
        message: None,
    }
}
