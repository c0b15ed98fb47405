pub mod model;
pub mod status;
pub mod utils;

pub use model::{
    Batch, BatchResult, Problem, ProblemKind, Submission, SubmissionResult, Testcase, TestcaseRun,
};
pub use status::{most_severe, ExecutionStatus};
