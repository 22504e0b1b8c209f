mod registry;
mod schema;

use log::error;
use rusqlite::{Connection, OptionalExtension};

use crate::error::AggError;

pub use registry::{ConnectionRegistry, PooledConn};
pub use schema::{CREATE_SCHEMA_SQL, SCHEMA_VERSION};

pub struct Database;

impl Database {
    /// Creates the base schema if absent and checks the stored version.
    pub fn ensure_schema(conn: &Connection) -> Result<(), AggError> {
        Self::immediate_transaction(conn, |conn| {
            conn.execute_batch(CREATE_SCHEMA_SQL)?;
            Ok(())
        })?;

        let stored_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version.as_deref() {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(AggError::Error(format!(
                "Schema version mismatch: database has {}, expected {}",
                other, SCHEMA_VERSION
            ))),
            None => Err(AggError::Error("Schema version missing".to_string())),
        }
    }

    /// Runs `f` inside `BEGIN IMMEDIATE ... COMMIT`, rolling back if it fails.
    /// When the connection is already inside a transaction, `f` joins it.
    pub fn immediate_transaction<F, T>(conn: &Connection, f: F) -> Result<T, AggError>
    where
        F: FnOnce(&Connection) -> Result<T, AggError>,
    {
        if !conn.is_autocommit() {
            return f(conn);
        }

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    error!("Rollback failed after error '{}': {}", e, rollback_err);
                }
                Err(e)
            }
        }
    }
}
