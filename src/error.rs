use rusqlite::Error as RusqliteError;
use rusqlite::ErrorCode;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Aggregation record not found: {0}")]
    RecordNotFound(String),

    #[error("Aggregation {agg_uuid} stopped, failed stages: {}", failed.join(", "))]
    StagesFailed { agg_uuid: String, failed: Vec<String> },

    #[error("Error: {0}")]
    Error(String),
}

impl AggError {
    /// Lock contention and pool checkout timeouts clear up on their own; everything else
    /// needs an operator.
    pub fn is_transient(&self) -> bool {
        match self {
            AggError::DatabaseError(RusqliteError::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            AggError::PoolError(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> AggError {
        AggError::DatabaseError(RusqliteError::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_busy_and_locked_are_transient() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_transient());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_transient());
    }

    #[test]
    fn test_other_errors_are_not_transient() {
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).is_transient());
        assert!(!AggError::ConfigurationError("missing".into()).is_transient());
        assert!(!AggError::Error("boom".into()).is_transient());
    }

    #[test]
    fn test_stages_failed_message_lists_stages() {
        let err = AggError::StagesFailed {
            agg_uuid: "abc".into(),
            failed: vec!["agg_awc".into(), "gm_forms[st1]".into()],
        };
        assert_eq!(
            err.to_string(),
            "Aggregation abc stopped, failed stages: agg_awc, gm_forms[st1]"
        );
    }
}
