//! Language configuration for compilation and execution

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{JudgeError, JudgeResult};

/// Whether a language needs a compile step before it can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageKind {
    Compiled,
    Interpreted,
}

/// Configuration for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Canonical language tag (e.g., "cpp")
    pub tag: String,
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    /// Entry point inside the program directory (e.g., "main" or "Main")
    pub program: String,
    /// Compile command template (None if not needed)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Substrings a submission must not contain
    pub banned: Vec<String>,
}

impl LanguageConfig {
    pub fn kind(&self) -> LanguageKind {
        if self.compile_command.is_some() {
            LanguageKind::Compiled
        } else {
            LanguageKind::Interpreted
        }
    }

    /// File extension of the source file, without the dot
    pub fn extension(&self) -> &str {
        Path::new(&self.source_file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    program: Option<String>,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    banned: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Lookup table of languages keyed by lowercase tag and alias
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: HashMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    /// Languages shipped with the engine
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language table {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> =
            toml::from_str(content).context("Invalid language table")?;

        let mut languages = HashMap::new();

        for (name, raw) in raw_configs {
            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }

            let tag = name.to_lowercase();
            let program = raw.program.unwrap_or_else(|| raw.source_file.clone());
            let config = LanguageConfig {
                tag: tag.clone(),
                source_file: raw.source_file,
                program,
                compile_command: raw
                    .compile_command
                    .map(|cmd| into_command(&cmd))
                    .filter(|cmd| !cmd.is_empty()),
                run_command,
                banned: raw.banned,
            };

            for alias in raw.aliases {
                languages.insert(alias.to_lowercase(), config.clone());
            }
            languages.insert(tag, config);
        }

        Ok(Self { languages })
    }

    /// Get language configuration by language tag
    pub fn get(&self, language: &str) -> JudgeResult<&LanguageConfig> {
        self.languages
            .get(&language.trim().to_lowercase())
            .ok_or_else(|| JudgeError::UnknownLanguage(language.to_string()))
    }

    /// Get all supported language tags, aliases included
    pub fn supported(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.languages.keys().cloned().collect();
        tags.sort();
        tags
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
