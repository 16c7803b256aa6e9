//! Contest entities the judging pipeline reads and produces.
//!
//! Only the fields the judge consumes are modelled; contest, member and
//! leaderboard data stay with their owning services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reference to a blob held by the attachment store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    /// Original file name, used as the staged file name inside the sandbox.
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Supported submission languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    /// C++ 17
    #[serde(rename = "CPP_17")]
    Cpp17,
    /// Java 21
    #[serde(rename = "JAVA_21")]
    Java21,
    /// Python 3.12
    #[serde(rename = "PYTHON_312")]
    Python312,
}

impl Language {
    /// Every language the platform accepts. The registry must cover all of them.
    pub const ALL: [Language; 3] = [Language::Cpp17, Language::Java21, Language::Python312];

    /// Key used for per-language sections in `autojudge.toml`.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Cpp17 => "cpp_17",
            Self::Java21 => "java_21",
            Self::Python312 => "python_312",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpp17 => write!(f, "CPP_17"),
            Self::Java21 => write!(f, "JAVA_21"),
            Self::Python312 => write!(f, "PYTHON_312"),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cpp_17" | "cpp17" => Ok(Self::Cpp17),
            "java_21" | "java21" => Ok(Self::Java21),
            "python_312" | "python312" => Ok(Self::Python312),
            _ => anyhow::bail!("Unknown language: '{s}'. Supported: cpp_17, java_21, python_312"),
        }
    }
}

/// Lifecycle of a submission with respect to judging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Waiting for (or undergoing) automatic judging.
    Judging,
    /// The auto judge could not produce an answer.
    Failed,
    /// An answer is available.
    Judged,
}

/// Closed set of judging outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Answer {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "ACCEPTED",
            Self::WrongAnswer => "WRONG_ANSWER",
            Self::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            Self::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::CompilationError => "COMPILATION_ERROR",
        };
        f.write_str(s)
    }
}

/// A problem as seen by the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: Uuid,
    /// Wall-clock limit per test case, in milliseconds.
    pub time_limit_ms: u64,
    /// Memory ceiling of the sandbox, in bytes.
    pub memory_limit_bytes: u64,
    /// CSV of `[input, expectedOutput]` rows.
    pub test_cases: Attachment,
}

/// A contestant's code entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub problem_id: Uuid,
    pub member_id: Uuid,
    pub language: Language,
    pub status: Status,
    #[serde(default)]
    pub answer: Option<Answer>,
    pub created_at: DateTime<Utc>,
    pub code: Attachment,
}

/// Immutable record of one judging attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub answer: Answer,
    /// Number of test cases loaded, regardless of how many ran.
    pub total_test_cases: usize,
    /// Index of the last case attempted; `None` when no case ran.
    pub last_test_case: Option<usize>,
    /// The test-case attachment the attempt was judged against.
    pub input: Attachment,
    /// Program output for each completed case, in order.
    pub outputs: Vec<String>,
    pub created_at: DateTime<Utc>,
}
