use log::warn;
use serde::{Deserialize, Serialize};

/// Progress of one (stage, state) item of an aggregation run, stored as an integer in
/// `aggregation_stage.status`.
#[repr(i64)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending = 0, // Not yet attempted, or reset for a retry
    Running = 1, // Picked up by a worker
    Done = 2,    // Committed
    Failed = 3,  // Retries exhausted or a non-transient error
}

impl StageStatus {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => StageStatus::Pending,
            1 => StageStatus::Running,
            2 => StageStatus::Done,
            3 => StageStatus::Failed,
            _ => {
                warn!(
                    "Invalid StageStatus value in database: {}, defaulting to Pending",
                    value
                );
                StageStatus::Pending
            }
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            StageStatus::Pending => "P",
            StageStatus::Running => "R",
            StageStatus::Done => "D",
            StageStatus::Failed => "F",
        }
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            StageStatus::Pending => "Pending",
            StageStatus::Running => "Running",
            StageStatus::Done => "Done",
            StageStatus::Failed => "Failed",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" | "P" => Some(StageStatus::Pending),
            "RUNNING" | "R" => Some(StageStatus::Running),
            "DONE" | "D" => Some(StageStatus::Done),
            "FAILED" | "F" => Some(StageStatus::Failed),
            _ => None,
        }
    }

    /// No worker will pick the item up again within the current run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Done | StageStatus::Failed)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}
