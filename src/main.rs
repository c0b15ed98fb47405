use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use judge_engine::{
    telemetry, EngineConfig, JsonLinesStore, JudgeEngine, JudgeStore, LanguageRegistry,
    MemoryStore, Problem, Submission,
};

/// One line of the job stream
#[derive(Debug, Deserialize)]
struct JudgeJob {
    submission_id: i64,
    #[serde(default)]
    author_id: i64,
    language: String,
    code: String,
    problem: Problem,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let config = EngineConfig::from_env()?;

    // Load language configurations
    let languages = match std::env::var("LANGUAGES_CONFIG") {
        Ok(path) => {
            let registry = LanguageRegistry::from_file(&path)?;
            info!("Loaded language configurations from {}", path);
            registry
        }
        Err(_) => LanguageRegistry::builtin()?,
    };

    let store: Arc<dyn JudgeStore> = match std::env::var("JUDGE_STORE_PATH") {
        Ok(path) => {
            info!("Recording results to {}", path);
            Arc::new(JsonLinesStore::new(path))
        }
        Err(_) => Arc::new(MemoryStore::new()),
    };

    let engine = Arc::new(JudgeEngine::start(config, Arc::new(languages), store)?);
    info!("Waiting for jobs on stdin...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut jobs = Vec::new();

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<JudgeJob>(&line) {
                    Ok(job) => jobs.push(tokio::spawn(process_job(engine.clone(), stdout.clone(), job))),
                    Err(e) => warn!("Failed to parse job data: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read job stream: {}", e);
                    break;
                }
            },
            _ = &mut interrupted => {
                warn!("Interrupted, abandoning {} in-flight jobs", jobs.len());
                engine.shutdown().await;
                return Ok(());
            }
        }
    }

    info!("Job stream closed, finishing {} in-flight jobs", jobs.len());
    let drain = async {
        for job in jobs {
            if let Err(e) = job.await {
                error!("Judge task failed: {}", e);
            }
        }
    };

    tokio::select! {
        _ = drain => {}
        _ = &mut interrupted => warn!("Interrupted while finishing in-flight jobs"),
    }

    engine.shutdown().await;
    Ok(())
}

/// Judge one job and print its result as a single JSON line
async fn process_job(engine: Arc<JudgeEngine>, stdout: Arc<Mutex<Stdout>>, job: JudgeJob) {
    info!(
        "Received judge job: submission_id={}, language={}",
        job.submission_id, job.language
    );

    let mut submission = Submission::new(
        job.submission_id,
        job.problem.id,
        job.author_id,
        job.language,
        job.code,
    );
    let result = engine.judge(&mut submission, &job.problem).await;

    match serde_json::to_string(&result) {
        Ok(mut json) => {
            json.push('\n');
            let mut stdout = stdout.lock().await;
            let written = match stdout.write_all(json.as_bytes()).await {
                Ok(()) => stdout.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!("Failed to write result of submission {}: {}", result.submission_id, e);
            }
        }
        Err(e) => error!("Failed to encode result of submission {}: {}", result.submission_id, e),
    }
}
