//! Error taxonomy for the judge engine
//!
//! User errors (unknown language, compile error) come from the submission
//! itself. Everything else is an internal error caused by the host.

use thiserror::Error;

use crate::core::ExecutionStatus;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnknownLanguage(String),

    #[error("compilation failed: {0}")]
    CompileError(String),

    #[error("process {0} is no longer tracked")]
    ProcessNotFound(u32),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JudgeError {
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        JudgeError::Internal(anyhow::anyhow!("{}", msg))
    }

    /// Status a submission or testcase ends with when this error surfaces
    pub fn status(&self) -> ExecutionStatus {
        match self {
            JudgeError::UnknownLanguage(_) => ExecutionStatus::UnknownLanguage,
            JudgeError::CompileError(_) => ExecutionStatus::CompileError,
            JudgeError::ProcessNotFound(_) => ExecutionStatus::WrongAnswer,
            JudgeError::Internal(_) => ExecutionStatus::InternalError,
        }
    }
}

impl From<std::io::Error> for JudgeError {
    fn from(e: std::io::Error) -> Self {
        JudgeError::Internal(e.into())
    }
}

pub type JudgeResult<T> = std::result::Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            JudgeError::UnknownLanguage("brainfuck".into()).status(),
            ExecutionStatus::UnknownLanguage
        );
        assert_eq!(
            JudgeError::CompileError("main.c:1: error".into()).status(),
            ExecutionStatus::CompileError
        );
        assert_eq!(
            JudgeError::ProcessNotFound(42).status(),
            ExecutionStatus::WrongAnswer
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        assert_eq!(JudgeError::from(io).status(), ExecutionStatus::InternalError);
    }

    #[test]
    fn test_internal_error_keeps_context() {
        let err: anyhow::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
                .context("Failed to create program directory");
        let err = JudgeError::from(err.unwrap_err());
        let rendered = match &err {
            JudgeError::Internal(e) => format!("{:#}", e),
            _ => unreachable!(),
        };
        assert!(rendered.contains("Failed to create program directory"));
        assert!(rendered.contains("gone"));
        assert_eq!(err.status(), ExecutionStatus::InternalError);
    }
}
