//! Code-execution engine for an online judge.
//!
//! A submission is statically checked, prepared (written and, if needed,
//! compiled) into its own directory, then run once per testcase while a
//! polling registry watches every spawned process for memory use and exit.

pub mod checker;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod judger;
pub mod languages;
pub mod launcher;
pub mod pool;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod tester;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use core::{
    Batch, BatchResult, ExecutionStatus, Problem, ProblemKind, Submission, SubmissionResult,
    Testcase, TestcaseRun,
};
pub use engine::JudgeEngine;
pub use error::{JudgeError, JudgeResult};
pub use languages::LanguageRegistry;
pub use store::{JsonLinesStore, JudgeStore, MemoryStore};
