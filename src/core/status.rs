use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome tag for a testcase run or a whole submission.
///
/// Variants are declared from most to least severe, so the derived `Ord`
/// doubles as the aggregation priority: a smaller value always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    InternalError,
    UnknownLanguage,
    IllegalCode,
    CompileError,
    InvalidReturn,
    WrongAnswer,
    OutputLimitExceeded,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    Skipped,
    AllClear,
}

impl ExecutionStatus {
    pub fn is_all_clear(self) -> bool {
        self == ExecutionStatus::AllClear
    }

}

/// Most severe status in `statuses`, or `AllClear` when there is none.
pub fn most_severe<I>(statuses: I) -> ExecutionStatus
where
    I: IntoIterator<Item = ExecutionStatus>,
{
    statuses
        .into_iter()
        .fold(ExecutionStatus::AllClear, std::cmp::min)
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::InternalError => "internal_error",
            ExecutionStatus::UnknownLanguage => "unknown_language",
            ExecutionStatus::IllegalCode => "illegal_code",
            ExecutionStatus::CompileError => "compile_error",
            ExecutionStatus::InvalidReturn => "invalid_return",
            ExecutionStatus::WrongAnswer => "wrong_answer",
            ExecutionStatus::OutputLimitExceeded => "output_limit_exceeded",
            ExecutionStatus::TimeLimitExceeded => "time_limit_exceeded",
            ExecutionStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::AllClear => "all_clear",
        };
        write!(f, "{}", s)
    }
}
