use chrono::{Datelike, NaiveDate};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AggregationConfig;
use crate::db::Database;
use crate::error::AggError;
use crate::utils::Utils;

/// One orchestration run over one month.
///
/// `state_ids` is fixed when the record is created so that a retried stage sees the same
/// states as the first attempt, even if the location tree changed in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub agg_uuid: String,
    pub agg_date: NaiveDate,
    pub run_date: NaiveDate,
    pub state_ids: Vec<String>,
    pub interval: i32,
    pub created_at: String,
}

impl AggregationRecord {
    /// Persists a new record, or returns the stored one when `agg_uuid` already exists.
    pub fn create(
        conn: &Connection,
        agg_uuid: Option<&str>,
        run_date: NaiveDate,
        interval: i32,
        state_ids: Vec<String>,
    ) -> Result<Self, AggError> {
        let agg_uuid = match agg_uuid {
            Some(id) => id.to_owned(),
            None => Uuid::new_v4().to_string(),
        };

        Database::immediate_transaction(conn, |conn| {
            if let Some(existing) = Self::find(conn, &agg_uuid)? {
                info!(
                    "Aggregation record {} already exists for {}",
                    agg_uuid,
                    Utils::format_date(existing.agg_date)
                );
                return Ok(existing);
            }

            let record = AggregationRecord {
                agg_date: Utils::shift_month(run_date, interval)?,
                agg_uuid: agg_uuid.clone(),
                run_date,
                state_ids,
                interval,
                created_at: Utils::now_timestamp(),
            };
            let state_json = serde_json::to_string(&record.state_ids)
                .map_err(|e| AggError::Error(format!("cannot encode state ids: {}", e)))?;
            conn.execute(
                "INSERT INTO aggregation_record
                    (agg_uuid, agg_date, run_date, state_ids, interval, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    record.agg_uuid,
                    Utils::format_date(record.agg_date),
                    Utils::format_date(record.run_date),
                    state_json,
                    record.interval,
                    record.created_at,
                ],
            )?;
            info!(
                "Created aggregation record {} for {} ({} state(s), interval {})",
                record.agg_uuid,
                Utils::format_date(record.agg_date),
                record.state_ids.len(),
                record.interval
            );
            Ok(record)
        })
    }

    pub fn find(conn: &Connection, agg_uuid: &str) -> Result<Option<Self>, AggError> {
        let row: Option<(String, String, String, String, i32, String)> = conn
            .query_row(
                "SELECT agg_uuid, agg_date, run_date, state_ids, interval, created_at
                 FROM aggregation_record WHERE agg_uuid = ?",
                [agg_uuid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?;

        let Some((agg_uuid, agg_date, run_date, state_json, interval, created_at)) = row else {
            return Ok(None);
        };
        let state_ids: Vec<String> = serde_json::from_str(&state_json).map_err(|e| {
            AggError::Error(format!("corrupt state ids on record {}: {}", agg_uuid, e))
        })?;
        Ok(Some(AggregationRecord {
            agg_date: Utils::parse_date(&agg_date)?,
            run_date: Utils::parse_date(&run_date)?,
            agg_uuid,
            state_ids,
            interval,
            created_at,
        }))
    }

    pub fn load(conn: &Connection, agg_uuid: &str) -> Result<Self, AggError> {
        Self::find(conn, agg_uuid)?.ok_or_else(|| AggError::RecordNotFound(agg_uuid.to_owned()))
    }

    /// Current-month runs always execute. Backfills of earlier months only run on the
    /// configured days.
    pub fn run_aggregation_queries(&self, config: &AggregationConfig) -> bool {
        if self.interval == 0 {
            return true;
        }
        let run_date = self.run_date;
        if config.run_weekdays().contains(&run_date.weekday()) {
            return true;
        }
        if config.historical_run_month_days.contains(&run_date.day()) {
            return true;
        }
        let month_day = run_date.format("%m-%d").to_string();
        config
            .historical_run_dates
            .iter()
            .any(|md| md.trim() == month_day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Database::ensure_schema(&conn).unwrap();
        conn
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn record(run_date: NaiveDate, interval: i32) -> AggregationRecord {
        AggregationRecord {
            agg_uuid: "r".into(),
            agg_date: Utils::shift_month(run_date, interval).unwrap(),
            run_date,
            state_ids: vec![],
            interval,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_create_computes_agg_date_and_persists() {
        let conn = conn();
        let created = AggregationRecord::create(
            &conn,
            None,
            d(2019, 3, 14),
            -1,
            vec!["st1".into(), "st2".into()],
        )
        .unwrap();
        assert_eq!(created.agg_date, d(2019, 2, 1));
        assert!(Uuid::parse_str(&created.agg_uuid).is_ok());

        let loaded = AggregationRecord::load(&conn, &created.agg_uuid).unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn test_create_with_existing_uuid_keeps_original() {
        let conn = conn();
        let first =
            AggregationRecord::create(&conn, Some("fixed"), d(2019, 3, 14), 0, vec!["st1".into()])
                .unwrap();
        let second = AggregationRecord::create(
            &conn,
            Some("fixed"),
            d(2019, 4, 2),
            -2,
            vec!["st1".into(), "st9".into()],
        )
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.state_ids, vec!["st1"]);
    }

    #[test]
    fn test_missing_record_is_reported() {
        let conn = conn();
        assert!(matches!(
            AggregationRecord::load(&conn, "nope"),
            Err(AggError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_current_month_always_runs() {
        let config = Config::default().aggregation;
        // A Tuesday in the middle of the month
        assert!(record(d(2019, 1, 15), 0).run_aggregation_queries(&config));
    }

    #[test]
    fn test_backfill_skipped_outside_schedule() {
        let config = Config::default().aggregation;
        assert!(!record(d(2019, 1, 15), -1).run_aggregation_queries(&config));
        assert!(!record(d(2019, 1, 16), -2).run_aggregation_queries(&config));
    }

    #[test]
    fn test_backfill_schedule_table() {
        let config = Config::default().aggregation;
        let cases = [
            (d(2019, 1, 1), true),   // day 1
            (d(2019, 1, 2), true),   // day 2
            (d(2019, 1, 3), true),   // day 3
            (d(2019, 1, 4), false),  // Friday
            (d(2019, 1, 5), true),   // Saturday
            (d(2019, 1, 6), false),  // Sunday
            (d(2019, 1, 10), false), // Thursday
            (d(2019, 1, 12), true),  // Saturday
            (d(2019, 11, 11), true), // Monday, fixed date
            (d(2019, 11, 12), false),
            (d(2020, 2, 29), true), // Saturday
        ];
        for (run_date, expected) in cases {
            assert_eq!(
                record(run_date, -1).run_aggregation_queries(&config),
                expected,
                "{}",
                run_date
            );
        }
    }
}
