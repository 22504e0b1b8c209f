use chrono::NaiveDate;
use rusqlite::Connection;

use crate::error::AggError;

/// One aggregation step of the monthly pipeline.
///
/// `create_table` prepares the step's output partitions and `aggregate` fills them. Both may
/// be called repeatedly for the same inputs without changing the result.
///
/// Non-atomic steps manage their own transactions (one per state for form helpers), so a
/// failure leaves sibling states' committed work alone. Atomic steps are run by the caller
/// inside a single transaction covering both calls.
pub trait Aggregator: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_table(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError>;

    fn aggregate(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError>;

    fn is_atomic(&self) -> bool {
        false
    }
}
