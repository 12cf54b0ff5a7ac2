//! Task status vocabulary.
//!
//! Tasks are the units of work analyses hang off. Their lifecycle is linear:
//! OPEN -> IN_PROGRESS -> COMPLETED.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "OPEN",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
        }
    }

    /// Start moves OPEN forward; complete accepts OPEN or IN_PROGRESS.
    pub fn can_start(self) -> bool {
        self == TaskStatus::Open
    }

    pub fn can_complete(self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
