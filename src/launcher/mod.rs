//! Launcher module - per-language program preparation and start-up
//!
//! This module provides a uniform interface for turning a submission into a
//! runnable program:
//! - `InterpretedLauncher`: writes the source and runs it through an interpreter
//! - `CompiledLauncher`: writes the source, compiles it, runs the binary
//!
//! The launcher module does NOT:
//! - Track processes or enforce limits (see `registry` and `tester`)
//! - Compare outputs or determine statuses

pub mod compiled;
pub mod interpreted;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::core::Submission;
use crate::error::JudgeResult;
use crate::languages::{LanguageConfig, LanguageKind, LanguageRegistry};

pub use compiled::CompiledLauncher;
pub use interpreted::InterpretedLauncher;

/// Per-submission working directory, removed on `close` or drop
#[derive(Debug)]
pub struct ProgramDir {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl ProgramDir {
    /// Create a fresh directory for `submission_id` under `root`
    pub fn create(root: &Path, submission_id: i64) -> JudgeResult<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create temp root {:?}", root))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("submission-{}-", submission_id))
            .tempdir_in(root)
            .with_context(|| format!("Failed to create program directory under {:?}", root))?;

        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Delete the directory. Calling it again is a no-op.
    pub fn close(&self) {
        let dir = self
            .dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dir) = dir {
            if let Err(e) = dir.close() {
                warn!("Failed to remove program directory {:?}: {}", self.path, e);
            } else {
                debug!("Removed program directory {:?}", self.path);
            }
        }
    }
}

/// Settings shared by every launcher of an engine
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub temp_root: PathBuf,
    pub compile_timeout: Duration,
}

/// Language-specific strategy for preparing and starting a submission
#[async_trait]
pub trait SourceLauncher: Send + Sync {
    fn config(&self) -> &LanguageConfig;

    fn program_dir(&self) -> &ProgramDir;

    /// Write the source and build it if the language needs it.
    ///
    /// Fails with `CompileError` when the compiler rejects the code and with
    /// `Internal` on I/O trouble.
    async fn prepare(&self) -> JudgeResult<()>;

    fn language(&self) -> &str {
        &self.config().tag
    }

    fn extension(&self) -> &str {
        self.config().extension()
    }

    fn entry_point(&self) -> &str {
        &self.config().program
    }

    /// Start the program with piped stdin/stdout
    fn launch(&self) -> JudgeResult<Child> {
        let mut command = build_command(&self.config().run_command, self.program_dir().path());
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().with_context(|| {
            format!(
                "Failed to spawn {} program {:?}",
                self.language(),
                self.config().run_command
            )
        })?;
        Ok(child)
    }

    /// Remove the program directory
    async fn close(&self) {
        self.program_dir().close();
    }
}

/// Command for `template` running inside `dir`. A leading `./` resolves
/// against `dir`, not the judge's own working directory.
pub(crate) fn build_command(template: &[String], dir: &Path) -> Command {
    let program = template.first().map(String::as_str).unwrap_or_default();
    let program = match program.strip_prefix("./") {
        Some(local) => dir.join(local),
        None => PathBuf::from(program),
    };

    let mut command = Command::new(program);
    command.args(template.iter().skip(1)).current_dir(dir);
    command
}

/// Write the submitted source into the program directory
pub(crate) async fn write_source(config: &LanguageConfig, dir: &ProgramDir, code: &str) -> JudgeResult<PathBuf> {
    let source_path = dir.path().join(&config.source_file);
    tokio::fs::write(&source_path, code)
        .await
        .with_context(|| format!("Failed to write source file {:?}", source_path))?;
    Ok(source_path)
}

/// Pick the launcher for a submission's language and give it a fresh
/// program directory. Nothing is written or compiled yet.
pub fn resolve_launcher(
    submission: &Submission,
    languages: &LanguageRegistry,
    ctx: &LaunchContext,
) -> JudgeResult<Arc<dyn SourceLauncher>> {
    let config = languages.get(&submission.language)?.clone();
    let dir = ProgramDir::create(&ctx.temp_root, submission.id)?;

    debug!(
        "Resolved {:?} launcher for submission {} in {:?}",
        config.kind(),
        submission.id,
        dir.path()
    );

    let launcher: Arc<dyn SourceLauncher> = match config.kind() {
        LanguageKind::Interpreted => Arc::new(
            InterpretedLauncher::new(config, dir).with_code(submission.code.clone()),
        ),
        LanguageKind::Compiled => Arc::new(CompiledLauncher::new(
            config,
            dir,
            submission.code.clone(),
            ctx.compile_timeout,
        )),
    };
    Ok(launcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JudgeError;

    fn ctx(root: &Path) -> LaunchContext {
        LaunchContext {
            temp_root: root.to_path_buf(),
            compile_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_program_dir_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = ProgramDir::create(&root.path().join("nested"), 7).unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("submission-7-"));

        dir.close();
        assert!(dir.is_closed());
        assert!(!path.exists());
        dir.close();
    }

    #[test]
    fn test_program_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let dir = ProgramDir::create(root.path(), 8).unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_build_command_resolves_local_program() {
        let dir = Path::new("/tmp/some-program");
        let command = build_command(&["./main".to_string()], dir);
        assert_eq!(
            command.as_std().get_program(),
            dir.join("main").as_os_str()
        );

        let command = build_command(&["python3".to_string(), "main.py".to_string()], dir);
        assert_eq!(command.as_std().get_program(), "python3");
        assert_eq!(command.as_std().get_args().collect::<Vec<_>>(), vec!["main.py"]);
    }

    #[test]
    fn test_resolve_picks_variant() {
        let root = tempfile::tempdir().unwrap();
        let languages = LanguageRegistry::builtin().unwrap();

        let py = Submission::new(1, 1, 1, "python", "print(1)");
        let launcher = resolve_launcher(&py, &languages, &ctx(root.path())).unwrap();
        assert_eq!(launcher.language(), "python");
        assert_eq!(launcher.extension(), "py");
        assert_eq!(launcher.entry_point(), "main.py");

        let cpp = Submission::new(2, 1, 1, "C++", "int main() {}");
        let launcher = resolve_launcher(&cpp, &languages, &ctx(root.path())).unwrap();
        assert_eq!(launcher.language(), "cpp");
        assert_eq!(launcher.entry_point(), "main");
    }

    #[test]
    fn test_resolve_unknown_language_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let languages = LanguageRegistry::builtin().unwrap();
        let sub = Submission::new(3, 1, 1, "fortran", "program x");

        match resolve_launcher(&sub, &languages, &ctx(root.path())) {
            Err(JudgeError::UnknownLanguage(tag)) => assert_eq!(tag, "fortran"),
            _ => panic!("expected unknown language"),
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
