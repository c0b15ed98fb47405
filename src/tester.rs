//! Tester - runs one testcase against a launched program
//!
//! Every failure mode ends up as a status on the returned `TestcaseRun`;
//! nothing is propagated to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::core::utils::{compare_output, normalize_input, output_preview};
use crate::core::{ExecutionStatus, Testcase, TestcaseRun};
use crate::error::JudgeError;
use crate::launcher::SourceLauncher;
use crate::registry::ProcessRegistry;

/// Extra time granted to collect buffered stdout after the program exits
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured stdout, capped at the output limit
#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Vec<u8>,
    exceeded: bool,
}

/// Aborts the I/O tasks of a run on every exit path
struct IoTasks {
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<std::io::Result<CapturedOutput>>>,
}

impl Drop for IoTasks {
    fn drop(&mut self) {
        self.writer.abort();
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

#[derive(Clone)]
pub struct Tester {
    registry: Arc<dyn ProcessRegistry>,
    output_preview_bytes: usize,
}

impl Tester {
    pub fn new(registry: Arc<dyn ProcessRegistry>, output_preview_bytes: usize) -> Self {
        Self {
            registry,
            output_preview_bytes,
        }
    }

    /// Run `testcase` once and classify the outcome
    pub async fn test(
        &self,
        testcase: &Testcase,
        launcher: &dyn SourceLauncher,
        time_limit: Duration,
        memory_limit_kb: u64,
        output_limit_kb: u64,
    ) -> TestcaseRun {
        let mut run = TestcaseRun::new(testcase.id, ExecutionStatus::Pending);
        let input = normalize_input(&testcase.input);

        let handle = match self
            .registry
            .launch_child_process(launcher, time_limit, memory_limit_kb)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                log_launch_failure(testcase.id, &e);
                run.status = e.status();
                return run;
            }
        };

        let Some(mut child) = handle.take_child() else {
            let e = JudgeError::ProcessNotFound(handle.pid());
            log_launch_failure(testcase.id, &e);
            run.status = e.status();
            return run;
        };

        let output_limit = (output_limit_kb as usize).saturating_mul(1024);
        let mut io = IoTasks {
            writer: spawn_writer(child.stdin.take(), input),
            reader: child
                .stdout
                .take()
                .map(|stdout| tokio::spawn(read_bounded(stdout, output_limit))),
        };

        let started = Instant::now();
        let waited = tokio::time::timeout(handle.time_limit(), child.wait()).await;
        run.duration_ms = started.elapsed().as_millis() as u64;
        run.peak_memory_kb = handle.peak_memory_kb();

        match waited {
            Err(_) => {
                run.status = ExecutionStatus::TimeLimitExceeded;
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out process {}: {}", handle.pid(), e);
                }
            }
            Ok(Err(e)) => {
                error!(
                    "Failed to wait for process {} on testcase {}: {}",
                    handle.pid(),
                    testcase.id,
                    e
                );
                run.status = ExecutionStatus::InternalError;
            }
            Ok(Ok(exit)) => {
                if handle.was_memory_killed() || handle.exceeds_memory_limit() {
                    run.status = ExecutionStatus::MemoryLimitExceeded;
                } else if exit.code().is_none() {
                    // Killed by a signal the registry did not send: a crash, not an exit code
                    run.status = ExecutionStatus::RuntimeError;
                } else if !exit.success() {
                    run.status = ExecutionStatus::InvalidReturn;
                }
            }
        }

        if run.status == ExecutionStatus::Pending {
            match collect_output(io.reader.take()).await {
                Ok(captured) if captured.exceeded => {
                    run.status = ExecutionStatus::OutputLimitExceeded;
                }
                Ok(captured) => {
                    let actual = String::from_utf8_lossy(&captured.bytes);
                    run.status = if compare_output(&actual, &testcase.expected_output) {
                        ExecutionStatus::AllClear
                    } else {
                        ExecutionStatus::WrongAnswer
                    };
                    run.output = output_preview(&captured.bytes, self.output_preview_bytes);
                }
                Err(e) => {
                    error!("Failed to read output of testcase {}: {:#}", testcase.id, e);
                    run.status = ExecutionStatus::InternalError;
                }
            }
        }

        drop(io);
        drop(child);

        debug!(
            "Testcase {} finished: status={}, duration_ms={}, peak_memory_kb={}",
            testcase.id, run.status, run.duration_ms, run.peak_memory_kb
        );
        run
    }
}

fn log_launch_failure(testcase_id: i64, e: &JudgeError) {
    match e {
        JudgeError::Internal(inner) => {
            error!("Failed to launch program for testcase {}: {:#}", testcase_id, inner)
        }
        other => warn!("Program for testcase {} not launched: {}", testcase_id, other),
    }
}

/// Feed `input` to the program and close its stdin
fn spawn_writer(stdin: Option<ChildStdin>, input: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut stdin) = stdin else { return };
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            // A program may legitimately exit without reading its input
            debug!("Stopped writing program input: {}", e);
        }
    })
}

/// Drain stdout, keeping at most `limit` bytes. Reading continues past the
/// limit so a chatty program never blocks on a full pipe.
async fn read_bounded(mut stdout: ChildStdout, limit: usize) -> std::io::Result<CapturedOutput> {
    let mut captured = CapturedOutput::default();
    let mut total = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = stdout.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        total = total.saturating_add(n);
        if total > limit {
            captured.exceeded = true;
            captured.bytes.clear();
            continue;
        }
        captured.bytes.extend_from_slice(&chunk[..n]);
    }

    Ok(captured)
}

async fn collect_output(
    reader: Option<JoinHandle<std::io::Result<CapturedOutput>>>,
) -> anyhow::Result<CapturedOutput> {
    let Some(reader) = reader else {
        return Ok(CapturedOutput::default());
    };

    // A leftover grandchild can keep the pipe open after the program exits
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, reader).await {
        Ok(joined) => Ok(joined??),
        Err(_) => anyhow::bail!("Program output stayed open after exit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ShutdownScope};
    use crate::languages::LanguageRegistry;
    use crate::launcher::{InterpretedLauncher, ProgramDir};
    use crate::registry::{ChildProcessHandle, PolledRegistry};
    use crate::error::JudgeResult;
    use crate::test_support::have_program;
    use async_trait::async_trait;

    const MB: u64 = 1024;

    fn registry(poll: Duration) -> Arc<PolledRegistry> {
        PolledRegistry::start(
            &EngineConfig::default()
                .with_poll_interval(poll)
                .with_shutdown_scope(ShutdownScope::Owned),
        )
    }

    async fn python(root: &std::path::Path, code: &str) -> InterpretedLauncher {
        let languages = LanguageRegistry::builtin().unwrap();
        let dir = ProgramDir::create(root, 31).unwrap();
        let launcher =
            InterpretedLauncher::new(languages.get("python").unwrap().clone(), dir).with_code(code);
        launcher.prepare().await.unwrap();
        launcher
    }

    fn testcase(input: &str, expected: &str) -> Testcase {
        Testcase {
            id: 1,
            input: input.to_string(),
            expected_output: expected.to_string(),
        }
    }

    async fn run(code: &str, tc: &Testcase, time_limit_ms: u64, memory_kb: u64, output_kb: u64) -> TestcaseRun {
        let root = tempfile::tempdir().unwrap();
        let registry = registry(Duration::from_millis(50));
        let tester = Tester::new(registry.clone(), 4096);
        let launcher = python(root.path(), code).await;
        let result = tester
            .test(tc, &launcher, Duration::from_millis(time_limit_ms), memory_kb, output_kb)
            .await;
        registry.shutdown().await;
        result
    }

    #[tokio::test]
    async fn test_all_clear() {
        if !have_program("python3") {
            return;
        }
        let code = "input()\ns = input()\nprint(len(s) - 6)\n";
        let result = run(code, &testcase("a\nasdasdasd", "3"), 5000, 256 * MB, 64).await;
        assert_eq!(result.status, ExecutionStatus::AllClear);
        assert_eq!(result.output.trim(), "3");
    }

    #[tokio::test]
    async fn test_wrong_answer_on_interior_whitespace() {
        if !have_program("python3") {
            return;
        }
        let result = run("print('a  b')", &testcase("", "a b"), 5000, 256 * MB, 64).await;
        assert_eq!(result.status, ExecutionStatus::WrongAnswer);
    }

    #[tokio::test]
    async fn test_time_limit_exceeded() {
        if !have_program("python3") {
            return;
        }
        let result = run("while True:\n    pass\n", &testcase("", ""), 300, 256 * MB, 64).await;
        assert_eq!(result.status, ExecutionStatus::TimeLimitExceeded);
        assert!(result.duration_ms >= 300);
    }

    #[tokio::test]
    async fn test_invalid_return() {
        if !have_program("python3") {
            return;
        }
        let result = run("import sys\nprint(3)\nsys.exit(4)\n", &testcase("", "3"), 5000, 256 * MB, 64).await;
        assert_eq!(result.status, ExecutionStatus::InvalidReturn);
    }

    #[tokio::test]
    async fn test_signal_death_is_runtime_error() {
        if !have_program("python3") {
            return;
        }
        let code = "import signal, sys\nprint(3)\nsys.stdout.flush()\nsignal.raise_signal(signal.SIGSEGV)\n";
        let result = run(code, &testcase("", "3"), 5000, 256 * MB, 64).await;
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
    }

    #[tokio::test]
    async fn test_output_limit_exceeded() {
        if !have_program("python3") {
            return;
        }
        let code = "print('x' * 10000)\n";
        let result = run(code, &testcase("", "x"), 5000, 256 * MB, 1).await;
        assert_eq!(result.status, ExecutionStatus::OutputLimitExceeded);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_memory_limit_exceeded() {
        if !have_program("python3") {
            return;
        }
        let code = "import time\nblob = b'x' * (200 * 1024 * 1024)\ntime.sleep(3)\nprint(1)\n";
        let result = run(code, &testcase("", "1"), 10_000, 64 * MB, 64).await;
        assert_eq!(result.status, ExecutionStatus::MemoryLimitExceeded);
        assert!(result.peak_memory_kb > 64 * MB);
    }

    struct FailingRegistry(fn() -> JudgeError);

    #[async_trait]
    impl ProcessRegistry for FailingRegistry {
        async fn launch_child_process(
            &self,
            _launcher: &dyn SourceLauncher,
            _time_limit: Duration,
            _memory_limit_kb: u64,
        ) -> JudgeResult<Arc<ChildProcessHandle>> {
            Err((self.0)())
        }

        fn tracked(&self) -> usize {
            0
        }

        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn test_launch_failures_map_to_statuses() {
        let root = tempfile::tempdir().unwrap();
        let languages = LanguageRegistry::builtin().unwrap();
        let dir = ProgramDir::create(root.path(), 32).unwrap();
        let launcher = InterpretedLauncher::new(languages.get("python").unwrap().clone(), dir);
        let tc = testcase("", "");

        let tester = Tester::new(
            Arc::new(FailingRegistry(|| JudgeError::internal("two new children"))),
            4096,
        );
        let result = tester.test(&tc, &launcher, Duration::from_secs(1), MB, 1).await;
        assert_eq!(result.status, ExecutionStatus::InternalError);

        let tester = Tester::new(
            Arc::new(FailingRegistry(|| JudgeError::ProcessNotFound(7))),
            4096,
        );
        let result = tester.test(&tc, &launcher, Duration::from_secs(1), MB, 1).await;
        assert_eq!(result.status, ExecutionStatus::WrongAnswer);
    }
}
