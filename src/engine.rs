//! Engine lifecycle: owns the process registry and the judger.
//!
//! `start` brings the poller up, `shutdown` stops it and kills whatever the
//! configured scope covers. Call `shutdown` exactly once on exit; dropping
//! the engine without it leaves the poller running until the runtime ends.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::core::{Problem, Submission, SubmissionResult};
use crate::judger::Judger;
use crate::languages::LanguageRegistry;
use crate::registry::{PolledRegistry, ProcessRegistry};
use crate::store::JudgeStore;

pub struct JudgeEngine {
    config: EngineConfig,
    registry: Arc<PolledRegistry>,
    judger: Judger,
}

impl JudgeEngine {
    pub fn start(
        config: EngineConfig,
        languages: Arc<LanguageRegistry>,
        store: Arc<dyn JudgeStore>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.temp_root)
            .with_context(|| format!("Failed to create temp root {:?}", config.temp_root))?;

        let registry = PolledRegistry::start(&config);
        let judger = Judger::new(&config, languages.clone(), registry.clone(), store);

        info!(
            "Judge engine started: workers={}, temp_root={:?}, languages=[{}]",
            judger.pool().size(),
            config.temp_root,
            languages.supported().join(", ")
        );

        Ok(Self {
            config,
            registry,
            judger,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PolledRegistry> {
        &self.registry
    }

    pub async fn judge(&self, submission: &mut Submission, problem: &Problem) -> SubmissionResult {
        self.judger.judge(submission, problem).await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down judge engine ({} tracked processes)", self.registry.tracked());
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShutdownScope;
    use crate::core::{Batch, ExecutionStatus, Testcase};
    use crate::store::{JsonLinesStore, MemoryStore};
    use crate::test_support::have_program;
    use std::time::Duration;

    const SUM_CODE: &str = "a, b = map(int, input().split())\nprint(a + b)\n";

    fn config(root: &std::path::Path) -> EngineConfig {
        EngineConfig::default()
            .with_temp_root(root.join("programs"))
            .with_poll_interval(Duration::from_millis(50))
            .with_shutdown_scope(ShutdownScope::Owned)
    }

    fn languages() -> Arc<LanguageRegistry> {
        Arc::new(LanguageRegistry::builtin().unwrap())
    }

    fn problem(time_limit_ms: u64) -> Problem {
        Problem {
            id: 9,
            time_limit_ms,
            memory_limit_kb: 256 * 1024,
            output_limit_kb: 64,
            batches: vec![Batch {
                id: 1,
                points: 10,
                testcases: vec![Testcase {
                    id: 1,
                    input: "4 5".into(),
                    expected_output: "9".into(),
                }],
            }],
            kind: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_start_creates_temp_root() {
        let root = tempfile::tempdir().unwrap();
        let engine =
            JudgeEngine::start(config(root.path()), languages(), Arc::new(MemoryStore::new()))
                .unwrap();

        assert!(root.path().join("programs").is_dir());
        assert_eq!(engine.registry().tracked(), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_problem_is_all_clear() {
        let root = tempfile::tempdir().unwrap();
        let engine =
            JudgeEngine::start(config(root.path()), languages(), Arc::new(MemoryStore::new()))
                .unwrap();
        let mut p = problem(1000);
        p.batches.clear();
        let mut submission = Submission::new(1, 9, 1, "python", "print(1)\n");

        let result = engine.judge(&mut submission, &p).await;
        assert_eq!(result.status, ExecutionStatus::AllClear);
        assert_eq!(result.score, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_submissions_with_json_store() {
        if !have_program("python3") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonLinesStore::new(root.path().join("results.jsonl")));
        let engine = Arc::new(
            JudgeEngine::start(config(root.path()), languages(), store.clone()).unwrap(),
        );

        let tasks: Vec<_> = (1..=4)
            .map(|id| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let mut submission = Submission::new(id, 9, 1, "py", SUM_CODE);
                    engine.judge(&mut submission, &problem(2000)).await
                })
            })
            .collect();

        for task in tasks {
            let result = task.await.unwrap();
            assert_eq!(result.status, ExecutionStatus::AllClear);
            assert_eq!(result.score, 10);
        }

        let lines = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(lines.lines().count(), 8);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_program() {
        if !have_program("python3") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            JudgeEngine::start(config(root.path()), languages(), Arc::new(MemoryStore::new()))
                .unwrap(),
        );

        let judging = {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut submission =
                    Submission::new(1, 9, 1, "python", "import time\ntime.sleep(30)\n");
                engine.judge(&mut submission, &problem(20_000)).await
            })
        };

        // Wait for the program to be registered
        for _ in 0..100 {
            if engine.registry().tracked() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(engine.registry().tracked(), 1);

        engine.shutdown().await;
        assert_eq!(engine.registry().tracked(), 0);

        let result = tokio::time::timeout(Duration::from_secs(5), judging)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(result.status, ExecutionStatus::AllClear);
    }
}
