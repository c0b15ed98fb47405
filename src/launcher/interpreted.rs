//! Launcher for interpreted languages
//!
//! Preparation only writes the source file; the interpreter is started
//! directly on every launch.

use async_trait::async_trait;
use tracing::debug;

use super::{write_source, ProgramDir, SourceLauncher};
use crate::error::JudgeResult;
use crate::languages::LanguageConfig;

#[derive(Debug)]
pub struct InterpretedLauncher {
    config: LanguageConfig,
    dir: ProgramDir,
    code: String,
}

impl InterpretedLauncher {
    pub fn new(config: LanguageConfig, dir: ProgramDir) -> Self {
        Self {
            config,
            dir,
            code: String::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }
}

#[async_trait]
impl SourceLauncher for InterpretedLauncher {
    fn config(&self) -> &LanguageConfig {
        &self.config
    }

    fn program_dir(&self) -> &ProgramDir {
        &self.dir
    }

    async fn prepare(&self) -> JudgeResult<()> {
        let source_path = write_source(&self.config, &self.dir, &self.code).await?;
        debug!("Wrote {} source to {:?}", self.config.tag, source_path);
        Ok(())
    }
}
