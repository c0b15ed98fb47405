//! Source checker
//!
//! A plain substring scan of submitted code against a per-language deny-list.
//! The scan is case-sensitive and does not tokenize. It is a blacklist that
//! keeps obvious process/file/network access out, not a sandbox.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::JudgeResult;
use crate::languages::LanguageRegistry;

#[derive(Debug, Clone)]
pub struct SourceChecker {
    languages: Arc<LanguageRegistry>,
}

impl SourceChecker {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self { languages }
    }

    /// Returns `Ok(false)` when `code` contains a banned substring.
    ///
    /// Fails with `UnknownLanguage` when `language` has no registered
    /// deny-list.
    pub fn is_clean(&self, code: &str, language: &str) -> JudgeResult<bool> {
        let config = self.languages.get(language)?;

        match find_banned(code, &config.banned) {
            Some(token) => {
                info!(
                    "Rejected {} submission: contains banned token {:?}",
                    config.tag, token
                );
                Ok(false)
            }
            None => {
                debug!("{} submission passed source check", config.tag);
                Ok(true)
            }
        }
    }
}

/// First banned token contained in `code`
fn find_banned<'a>(code: &str, banned: &'a [String]) -> Option<&'a str> {
    banned
        .iter()
        .map(String::as_str)
        .find(|token| !token.is_empty() && code.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JudgeError;

    fn checker() -> SourceChecker {
        SourceChecker::new(Arc::new(LanguageRegistry::builtin().unwrap()))
    }

    #[test]
    fn test_clean_python() {
        let code = "a = input()\nb = input()\nprint(len(b) - 6)\n";
        assert!(checker().is_clean(code, "python").unwrap());
    }

    #[test]
    fn test_banned_python_import() {
        let code = "import os\nos.system('rm -rf /')\n";
        assert!(!checker().is_clean(code, "python").unwrap());
        assert!(!checker().is_clean("import subprocess", "py").unwrap());
    }

    #[test]
    fn test_scan_is_case_sensitive() {
        assert!(checker().is_clean("print('IMPORT OS')", "python").unwrap());
    }

    #[test]
    fn test_banned_token_anywhere_in_text() {
        // No tokenization: a banned token inside a comment still counts.
        let code = "int main() { /* fork */ return 0; }";
        assert!(!checker().is_clean(code, "c").unwrap());
    }

    #[test]
    fn test_rust_escape_attempt_rejected() {
        let code = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/test-codes/rust_escape.rs"
        ));
        assert!(!checker().is_clean(code, "rust").unwrap());
    }

    #[test]
    fn test_python_escape_attempt_rejected() {
        let code = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/test-codes/python_escape.py"
        ));
        assert!(!checker().is_clean(code, "python").unwrap());
    }

    #[test]
    fn test_unknown_language() {
        match checker().is_clean("+[]", "brainfuck") {
            Err(JudgeError::UnknownLanguage(tag)) => assert_eq!(tag, "brainfuck"),
            other => panic!("unexpected: {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_empty_token_is_ignored() {
        assert_eq!(find_banned("anything", &["".to_string()]), None);
    }
}
