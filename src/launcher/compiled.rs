//! Launcher for compiled languages
//!
//! Preparation writes the source and runs the compiler synchronously inside
//! the program directory. The compiler's stderr becomes the compile error
//! message.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{build_command, write_source, ProgramDir, SourceLauncher};
use crate::error::{JudgeError, JudgeResult};
use crate::languages::LanguageConfig;
use crate::registry::spawn_gate;

#[derive(Debug)]
pub struct CompiledLauncher {
    config: LanguageConfig,
    dir: ProgramDir,
    code: String,
    compile_timeout: Duration,
}

impl CompiledLauncher {
    pub fn new(
        config: LanguageConfig,
        dir: ProgramDir,
        code: impl Into<String>,
        compile_timeout: Duration,
    ) -> Self {
        Self {
            config,
            dir,
            code: code.into(),
            compile_timeout,
        }
    }

    async fn compile(&self) -> JudgeResult<()> {
        let compile_cmd = match &self.config.compile_command {
            Some(cmd) => cmd,
            None => return Ok(()),
        };

        debug!("Compiling with {:?} in {:?}", compile_cmd, self.dir.path());

        let mut command = build_command(compile_cmd, self.dir.path());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = {
            let _gate = spawn_gate().lock().await;
            command
                .spawn()
                .with_context(|| format!("Failed to run compiler {:?}", compile_cmd))?
        };

        // Dropping the child on timeout kills the compiler
        let output = match tokio::time::timeout(self.compile_timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to wait for compiler")?,
            Err(_) => {
                info!(
                    "Compilation of {} program timed out after {:?}",
                    self.config.tag, self.compile_timeout
                );
                return Err(JudgeError::CompileError("Compilation timed out".to_string()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() && stderr.trim().is_empty() {
            return Ok(());
        }

        let error_msg = if !stderr.trim().is_empty() {
            stderr
        } else if !stdout.trim().is_empty() {
            stdout
        } else {
            match output.status.code() {
                Some(code) => format!("Compilation failed with exit code {}", code),
                None => "Compiler crashed".to_string(),
            }
        };

        Err(JudgeError::CompileError(error_msg))
    }
}

#[async_trait]
impl SourceLauncher for CompiledLauncher {
    fn config(&self) -> &LanguageConfig {
        &self.config
    }

    fn program_dir(&self) -> &ProgramDir {
        &self.dir
    }

    async fn prepare(&self) -> JudgeResult<()> {
        write_source(&self.config, &self.dir, &self.code).await?;
        self.compile().await?;

        // javac produces Main.class, not Main
        let entry = self.dir.path().join(&self.config.program);
        let class_file = entry.with_extension("class");
        if !entry.exists() && !class_file.exists() {
            return Err(JudgeError::internal(format!(
                "Compiler succeeded but produced no {:?}",
                self.config.program
            )));
        }

        info!("Compiled {} program in {:?}", self.config.tag, self.dir.path());
        Ok(())
    }
}
