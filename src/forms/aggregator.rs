use chrono::NaiveDate;
use log::{info, warn};
use logging_timer::timer;
use rusqlite::{types::ToSql, Connection};

use super::{Fold, FormSpec, KeyColumn};
use crate::aggregator::Aggregator;
use crate::db::Database;
use crate::error::AggError;
use crate::partitions::{PartitionKey, PartitionManager};
use crate::sql::{execute_named, query_count, Ident, Sql};
use crate::utils::{Utils, EPOCH_TIMESTAMP};

/// Per-(state, month) aggregate of one form type.
///
/// Each run folds only the forms newer than the case's `latest_time_end_processed`, so
/// repeating a run without new submissions changes nothing.
pub struct FormAggregator {
    spec: &'static FormSpec,
}

impl FormAggregator {
    pub fn new(spec: &'static FormSpec) -> Self {
        FormAggregator { spec }
    }

    pub fn spec(&self) -> &'static FormSpec {
        self.spec
    }

    pub fn partition(&self, state_id: &str, month: NaiveDate) -> Result<Ident, AggError> {
        PartitionManager::state_partition(self.spec.target_table, state_id, month)
    }

    fn aggregate_state(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_id: &str,
    ) -> Result<(), AggError> {
        let _tmr = timer!(log::Level::Debug; "FormAggregator::aggregate", "{} {} {}", self.spec.kind, state_id, month);

        let current = self.partition(state_id, month)?;
        let prev_month = Utils::prev_month(month)?;
        let previous = self.partition(state_id, prev_month)?;
        let has_previous = PartitionManager::exists(conn, &previous)?;

        let month_str = Utils::format_date(month);
        let next_month_str = Utils::format_date(Utils::next_month(month)?);
        let params: [(&str, &dyn ToSql); 4] = [
            (":state_id", &state_id),
            (":month", &month_str),
            (":next_month", &next_month_str),
            (":epoch", &EPOCH_TIMESTAMP),
        ];

        let null_keys = query_count(conn, &self.null_key_count_sql()?, &params)?;
        if null_keys > 0 {
            warn!(
                "{}: skipped {} form(s) without {} in state {} for {}",
                self.spec.kind, null_keys, self.spec.key_source, state_id, month_str
            );
        }

        let upsert = self.upsert_sql(&current)?;
        let seed = if has_previous && self.spec.carries_forward() {
            Some(self.seed_sql(&current, &previous)?)
        } else {
            None
        };

        let (seeded, upserted) = Database::immediate_transaction(conn, |conn| {
            let seeded = match &seed {
                Some(sql) => execute_named(conn, sql, &params)?,
                None => 0,
            };
            let upserted = execute_named(conn, &upsert, &params)?;
            Ok((seeded, upserted))
        })?;

        info!(
            "{}: state {} month {}: {} row(s) carried forward, {} row(s) upserted",
            self.spec.kind, state_id, month_str, seeded, upserted
        );
        Ok(())
    }

    fn key_ident(&self) -> Result<Ident, AggError> {
        Ident::new(self.spec.key.name())
    }

    fn source_filter(&self) -> Sql {
        match self.spec.filter {
            Some(filter) => Sql::composed(format!("AND ({})", filter)),
            None => Sql::text(""),
        }
    }

    /// Columns carried into a new month: identity, watermark and every carried fold.
    fn carried_columns(&self) -> Vec<String> {
        let mut cols = self.identity_columns();
        for col in self.spec.columns.iter().filter(|c| c.fold.is_carried()) {
            cols.push(col.name.to_owned());
            if let Some(recorded) = col.recorded_name() {
                cols.push(recorded);
            }
        }
        cols
    }

    /// True for previous-month rows that hold at least one carried value.
    fn carried_value_predicate(&self) -> Result<Sql, AggError> {
        let mut checks = Vec::new();
        for col in self.spec.columns.iter().filter(|c| c.fold.is_carried()) {
            checks.push(Sql::composed(format!(
                "prev.{} IS NOT NULL",
                Ident::new(col.name)?.quoted()
            )));
        }
        if checks.is_empty() {
            return Ok(Sql::text("0"));
        }
        Ok(Sql::join(checks, " OR "))
    }

    fn identity_columns(&self) -> Vec<String> {
        let mut cols = vec![
            "state_id".to_owned(),
            "supervisor_id".to_owned(),
            "month".to_owned(),
        ];
        if self.spec.key != KeyColumn::SupervisorId {
            cols.push(self.spec.key.name().to_owned());
        }
        cols.push("latest_time_end_processed".to_owned());
        cols
    }

    fn null_key_count_sql(&self) -> Result<Sql, AggError> {
        let source = Ident::table(self.spec.source_table)?;
        let key_source = Ident::new(self.spec.key_source)?;
        Sql::render(
            "SELECT COUNT(*) FROM {source} ucr
             WHERE ucr.state_id = :state_id
               AND ucr.time_end >= :month AND ucr.time_end < :next_month
               AND ucr.{key_source} IS NULL
               {filter}",
            &[
                ("source", Sql::ident(&source)),
                ("key_source", Sql::ident(&key_source)),
                ("filter", self.source_filter()),
            ],
        )
    }

    fn seed_sql(&self, current: &Ident, previous: &Ident) -> Result<Sql, AggError> {
        let key = self.key_ident()?;
        let columns = self.carried_columns();
        let mut select = Vec::with_capacity(columns.len());
        for col in &columns {
            let ident = Ident::new(col)?;
            if col == "month" {
                select.push(Sql::text(":month"));
            } else {
                select.push(Sql::composed(format!("prev.{}", ident.quoted())));
            }
        }
        Sql::render(
            "INSERT INTO {current} ({columns})
             SELECT {select}
             FROM {previous} prev
             WHERE prev.state_id = :state_id
               AND ({has_value})
               AND NOT EXISTS (SELECT 1 FROM {current} cur WHERE cur.{key} = prev.{key})
             ON CONFLICT DO NOTHING",
            &[
                ("current", Sql::ident(current)),
                ("previous", Sql::ident(previous)),
                ("has_value", self.carried_value_predicate()?),
                (
                    "columns",
                    PartitionManager::quoted_list(columns.iter().map(String::as_str))?,
                ),
                ("select", Sql::join(select, ", ")),
                ("key", Sql::ident(&key)),
            ],
        )
    }

    fn upsert_sql(&self, current: &Ident) -> Result<Sql, AggError> {
        let source = Ident::table(self.spec.source_table)?;
        let key = self.key_ident()?;
        let key_source = Ident::new(self.spec.key_source)?;
        let full_frame = "ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING";

        let mut folds = Vec::new();
        let mut insert_cols = self.identity_columns();
        let mut insert_values = vec![
            Sql::text(":state_id"),
            Sql::composed(format!(
                "COALESCE((SELECT cur.supervisor_id FROM {} cur WHERE cur.{} = f.agg_key LIMIT 1), f.supervisor_id, '')",
                current.quoted(),
                key.quoted()
            )),
            Sql::text(":month"),
        ];
        if self.spec.key != KeyColumn::SupervisorId {
            insert_values.push(Sql::text("f.agg_key"));
        }
        insert_values.push(Sql::text("f.latest_time_end"));

        let mut updates = vec![Sql::text(
            "latest_time_end_processed = MAX(latest_time_end_processed, excluded.latest_time_end_processed)",
        )];

        for col in self.spec.columns {
            let name = Ident::new(col.name)?.quoted();
            let src = col.source;
            let fold = match col.fold {
                Fold::Latest | Fold::LatestRecorded | Fold::LatestInMonth => format!(
                    "LAST_VALUE({src}) OVER (PARTITION BY ucr.agg_key ORDER BY ({src}) IS NOT NULL, ucr.time_end, ucr.doc_id {full_frame}) AS {name}"
                ),
                Fold::Ever => format!("MAX({src}) OVER (PARTITION BY ucr.agg_key) AS {name}"),
                Fold::SumInMonth => format!("SUM({src}) OVER (PARTITION BY ucr.agg_key) AS {name}"),
            };
            folds.push(Sql::composed(fold));
            insert_cols.push(col.name.to_owned());

            match col.fold {
                Fold::SumInMonth => {
                    insert_values.push(Sql::composed(format!("COALESCE(f.{name}, 0)")));
                    updates.push(Sql::composed(format!(
                        "{name} = {name} + COALESCE(excluded.{name}, 0)"
                    )));
                }
                Fold::Ever => {
                    insert_values.push(Sql::composed(format!("f.{name}")));
                    updates.push(Sql::composed(format!(
                        "{name} = CASE WHEN excluded.{name} IS NULL THEN {name} \
                         WHEN {name} IS NULL THEN excluded.{name} \
                         ELSE MAX({name}, excluded.{name}) END"
                    )));
                }
                _ => {
                    insert_values.push(Sql::composed(format!("f.{name}")));
                    updates.push(Sql::composed(format!(
                        "{name} = COALESCE(excluded.{name}, {name})"
                    )));
                }
            }

            if let Some(recorded) = col.recorded_name() {
                let rec = Ident::new(&recorded)?.quoted();
                folds.push(Sql::composed(format!(
                    "MAX(CASE WHEN ({src}) IS NOT NULL THEN ucr.time_end END) OVER (PARTITION BY ucr.agg_key) AS {rec}"
                )));
                insert_cols.push(recorded);
                insert_values.push(Sql::composed(format!("f.{rec}")));
                updates.push(Sql::composed(format!(
                    "{rec} = COALESCE(excluded.{rec}, {rec})"
                )));
            }
        }

        Sql::render(
            "WITH new_forms AS (
                SELECT ucr.*, ucr.{key_source} AS agg_key
                FROM {source} ucr
                WHERE ucr.state_id = :state_id
                  AND ucr.time_end >= :month AND ucr.time_end < :next_month
                  AND ucr.{key_source} IS NOT NULL
                  {filter}
                  AND ucr.time_end > COALESCE(
                      (SELECT MAX(cur.latest_time_end_processed) FROM {current} cur
                       WHERE cur.{key} = ucr.{key_source}),
                      :epoch)
            ),
            folded AS (
                SELECT DISTINCT
                    ucr.agg_key AS agg_key,
                    LAST_VALUE(ucr.supervisor_id) OVER (
                        PARTITION BY ucr.agg_key
                        ORDER BY ucr.supervisor_id IS NOT NULL, ucr.time_end, ucr.doc_id
                        {full_frame}) AS supervisor_id,
                    MAX(ucr.time_end) OVER (PARTITION BY ucr.agg_key) AS latest_time_end,
                    {folds}
                FROM new_forms ucr
            )
            INSERT INTO {current} ({insert_cols})
            SELECT {insert_values}
            FROM folded f
            WHERE 1
            ON CONFLICT ({unique}) DO UPDATE SET {updates}",
            &[
                ("key_source", Sql::ident(&key_source)),
                ("source", Sql::ident(&source)),
                ("filter", self.source_filter()),
                ("current", Sql::ident(current)),
                ("key", Sql::ident(&key)),
                ("full_frame", Sql::text(full_frame)),
                ("folds", Sql::join(folds, ",\n                    ")),
                (
                    "insert_cols",
                    PartitionManager::quoted_list(insert_cols.iter().map(String::as_str))?,
                ),
                ("insert_values", Sql::join(insert_values, ", ")),
                (
                    "unique",
                    PartitionManager::quoted_list(self.spec.unique_key())?,
                ),
                ("updates", Sql::join(updates, ",\n                ")),
            ],
        )
    }
}

impl Aggregator for FormAggregator {
    fn name(&self) -> &'static str {
        self.spec.kind.stage_name()
    }

    fn create_table(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError> {
        let schema = self.spec.table_schema();
        for state_id in state_ids {
            PartitionManager::ensure_partition(
                conn,
                &schema,
                &PartitionKey::State(state_id.clone(), month),
            )?;
        }
        Ok(())
    }

    fn aggregate(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError> {
        for state_id in state_ids {
            self.aggregate_state(conn, month, state_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::forms::FormKind;
    use crate::sql::query_rows;
    use pretty_assertions::assert_eq;
    use rusqlite::params;

    pub(crate) fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Database::ensure_schema(&conn).unwrap();
        conn
    }

    pub(crate) fn add_gm_form(conn: &Connection, doc_id: &str, case_id: Option<&str>, time_end: &str, weight: Option<f64>) {
        conn.execute(
            "INSERT INTO ucr_growth_monitoring_forms
                (doc_id, case_id, state_id, supervisor_id, awc_id, time_end, weight_child, zscore_grading_wfa)
             VALUES (?, ?, 'st1', 's1', 'a1', ?, ?, 3)",
            params![doc_id, case_id, time_end, weight],
        )
        .unwrap();
    }

    fn add_thr_form(conn: &Connection, doc_id: &str, case_id: &str, kind: &str, time_end: &str, days: i64) {
        conn.execute(
            "INSERT INTO ucr_thr_forms
                (doc_id, case_id, beneficiary_type, state_id, supervisor_id, awc_id, time_end, days_ration_given, photo_thr)
             VALUES (?, ?, ?, 'st1', 's1', 'a1', ?, ?, 'photo.jpg')",
            params![doc_id, case_id, kind, time_end, days],
        )
        .unwrap();
    }

    fn run(conn: &Connection, kind: FormKind, m: NaiveDate) {
        let agg = kind.aggregator();
        let states = vec!["st1".to_string()];
        agg.create_table(conn, m, &states).unwrap();
        agg.aggregate(conn, m, &states).unwrap();
    }

    fn gm_row(conn: &Connection, m: NaiveDate) -> (Option<f64>, String, Option<String>) {
        let table = FormKind::GrowthMonitoring.aggregator().partition("st1", m).unwrap();
        conn.query_row(
            &format!(
                "SELECT weight_child, latest_time_end_processed, weight_child_last_recorded FROM {} WHERE case_id = 'c1'",
                table.quoted()
            ),
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap()
    }

    fn all_rows(conn: &Connection, kind: FormKind, m: NaiveDate) -> Vec<Vec<(String, rusqlite::types::Value)>> {
        let table = kind.aggregator().partition("st1", m).unwrap();
        query_rows(
            conn,
            &Sql::composed(format!("SELECT * FROM {} ORDER BY 1, 2, 3, 4", table.quoted())),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_latest_weight_and_watermark_advance() {
        let conn = conn();
        let april = month(2017, 4);
        add_gm_form(&conn, "f1", Some("c1"), "2017-04-15 10:00:00", Some(8.0));
        run(&conn, FormKind::GrowthMonitoring, april);

        let (weight, watermark, recorded) = gm_row(&conn, april);
        assert_eq!(weight, Some(8.0));
        assert_eq!(watermark, "2017-04-15 10:00:00");
        assert_eq!(recorded.as_deref(), Some("2017-04-15 10:00:00"));

        add_gm_form(&conn, "f2", Some("c1"), "2017-04-20 09:30:00", Some(9.0));
        run(&conn, FormKind::GrowthMonitoring, april);

        let (weight, watermark, _) = gm_row(&conn, april);
        assert_eq!(weight, Some(9.0));
        assert_eq!(watermark, "2017-04-20 09:30:00");
    }

    #[test]
    fn test_null_values_do_not_erase_latest() {
        let conn = conn();
        let april = month(2017, 4);
        add_gm_form(&conn, "f1", Some("c1"), "2017-04-15 10:00:00", Some(8.0));
        add_gm_form(&conn, "f2", Some("c1"), "2017-04-20 10:00:00", None);
        run(&conn, FormKind::GrowthMonitoring, april);

        let (weight, watermark, recorded) = gm_row(&conn, april);
        assert_eq!(weight, Some(8.0));
        assert_eq!(watermark, "2017-04-20 10:00:00");
        assert_eq!(recorded.as_deref(), Some("2017-04-15 10:00:00"));
    }

    #[test]
    fn test_rerun_without_new_forms_is_a_no_op() {
        let conn = conn();
        let april = month(2017, 4);
        add_gm_form(&conn, "f1", Some("c1"), "2017-04-15 10:00:00", Some(8.0));
        add_thr_form(&conn, "t1", "c1", "child", "2017-04-03 10:00:00", 10);
        add_thr_form(&conn, "t2", "c1", "child", "2017-04-18 10:00:00", 15);
        for kind in [FormKind::GrowthMonitoring, FormKind::ChildThr] {
            run(&conn, kind, april);
            let first = all_rows(&conn, kind, april);
            run(&conn, kind, april);
            let second = all_rows(&conn, kind, april);
            assert_eq!(first, second, "{}", kind);
        }
    }

    #[test]
    fn test_sums_count_each_form_once() {
        let conn = conn();
        let april = month(2017, 4);
        add_thr_form(&conn, "t1", "c1", "child", "2017-04-03 10:00:00", 10);
        add_thr_form(&conn, "t2", "c1", "child", "2017-04-18 10:00:00", 15);
        run(&conn, FormKind::ChildThr, april);
        run(&conn, FormKind::ChildThr, april);
        add_thr_form(&conn, "t3", "c1", "child", "2017-04-25 10:00:00", 5);
        run(&conn, FormKind::ChildThr, april);

        let table = FormKind::ChildThr.aggregator().partition("st1", april).unwrap();
        let days: i64 = conn
            .query_row(
                &format!("SELECT days_ration_given_child FROM {} WHERE case_id = 'c1'", table.quoted()),
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(days, 30);
    }

    #[test]
    fn test_filter_separates_beneficiaries() {
        let conn = conn();
        let april = month(2017, 4);
        add_thr_form(&conn, "t1", "c1", "child", "2017-04-03 10:00:00", 10);
        add_thr_form(&conn, "t2", "m1", "ccs", "2017-04-04 10:00:00", 20);
        run(&conn, FormKind::CcsThr, april);
        run(&conn, FormKind::ThrImages, april);

        let ccs = FormKind::CcsThr.aggregator().partition("st1", april).unwrap();
        let cases: Vec<String> = {
            let mut stmt = conn
                .prepare(&format!("SELECT case_id FROM {}", ccs.quoted()))
                .unwrap();
            stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
        };
        assert_eq!(cases, vec!["m1".to_string()]);

        let images = FormKind::ThrImages.aggregator().partition("st1", april).unwrap();
        let count: i64 = conn
            .query_row(
                &format!("SELECT thr_images_count FROM {} WHERE awc_id = 'a1'", images.quoted()),
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_carried_values_seed_next_month() {
        let conn = conn();
        add_gm_form(&conn, "f1", Some("c1"), "2017-04-20 09:30:00", Some(9.0));
        add_thr_form(&conn, "t1", "c1", "child", "2017-04-03 10:00:00", 10);
        run(&conn, FormKind::GrowthMonitoring, month(2017, 4));
        run(&conn, FormKind::ChildThr, month(2017, 4));
        run(&conn, FormKind::GrowthMonitoring, month(2017, 5));
        run(&conn, FormKind::ChildThr, month(2017, 5));

        let (weight, watermark, recorded) = gm_row(&conn, month(2017, 5));
        assert_eq!(weight, Some(9.0));
        assert_eq!(watermark, "2017-04-20 09:30:00");
        assert_eq!(recorded.as_deref(), Some("2017-04-20 09:30:00"));

        // Monthly sums are not carried
        let table = FormKind::ChildThr.aggregator().partition("st1", month(2017, 5)).unwrap();
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table.quoted()), [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);

        add_gm_form(&conn, "f2", Some("c1"), "2017-05-02 08:00:00", Some(9.5));
        run(&conn, FormKind::GrowthMonitoring, month(2017, 5));
        let (weight, watermark, _) = gm_row(&conn, month(2017, 5));
        assert_eq!(weight, Some(9.5));
        assert_eq!(watermark, "2017-05-02 08:00:00");
    }

    fn row_count(conn: &Connection, kind: FormKind, m: NaiveDate) -> i64 {
        let table = kind.aggregator().partition("st1", m).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.quoted()), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_in_month_forms_start_each_month_empty() {
        let conn = conn();
        add_thr_form(&conn, "t1", "c1", "child", "2017-04-03 10:00:00", 10);
        conn.execute(
            "INSERT INTO ucr_ls_awc_visit_forms (doc_id, state_id, supervisor_id, awc_id, time_end, visit_type)
             VALUES ('v1', 'st1', 's1', 'a1', '2017-04-10 10:00:00', 'scheduled')",
            [],
        )
        .unwrap();
        for kind in [FormKind::ThrImages, FormKind::LsAwcVisit] {
            run(&conn, kind, month(2017, 4));
            run(&conn, kind, month(2017, 5));
            assert_eq!(row_count(&conn, kind, month(2017, 4)), 1, "{}", kind);
            assert_eq!(row_count(&conn, kind, month(2017, 5)), 0, "{}", kind);
        }
    }

    #[test]
    fn test_rows_without_carried_values_are_not_seeded() {
        let conn = conn();
        for (doc, case, vid) in [("f1", "m1", None), ("f2", "m2", Some(1))] {
            conn.execute(
                "INSERT INTO ucr_ccs_complementary_feeding_forms
                    (doc_id, ccs_record_case_id, state_id, supervisor_id, awc_id, time_end,
                     play_comp_feeding_vid, hand_wash)
                 VALUES (?, ?, 'st1', 's1', 'a1', '2017-04-12 10:00:00', ?, 1)",
                params![doc, case, vid],
            )
            .unwrap();
        }
        run(&conn, FormKind::CcsComplementaryFeeding, month(2017, 4));
        run(&conn, FormKind::CcsComplementaryFeeding, month(2017, 5));

        let table = FormKind::CcsComplementaryFeeding
            .aggregator()
            .partition("st1", month(2017, 5))
            .unwrap();
        let cases: Vec<String> = {
            let mut stmt = conn
                .prepare(&format!("SELECT case_id FROM {}", table.quoted()))
                .unwrap();
            stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
        };
        assert_eq!(cases, vec!["m2".to_string()]);
    }

    #[test]
    fn test_watermark_never_decreases() {
        let conn = conn();
        let april = month(2017, 4);
        add_gm_form(&conn, "f1", Some("c1"), "2017-04-20 10:00:00", Some(8.0));
        run(&conn, FormKind::GrowthMonitoring, april);
        let (_, before, _) = gm_row(&conn, april);

        // Late-synced form with an older time_end than the watermark
        add_gm_form(&conn, "f0", Some("c1"), "2017-04-02 10:00:00", Some(7.0));
        run(&conn, FormKind::GrowthMonitoring, april);
        let (weight, after, _) = gm_row(&conn, april);

        assert!(after >= before);
        assert_eq!(weight, Some(8.0));
    }

    #[test]
    fn test_forms_without_case_are_skipped() {
        let conn = conn();
        let april = month(2017, 4);
        add_gm_form(&conn, "f1", None, "2017-04-15 10:00:00", Some(8.0));
        add_gm_form(&conn, "f2", Some("c1"), "2017-04-15 10:00:00", Some(8.0));
        run(&conn, FormKind::GrowthMonitoring, april);

        assert_eq!(all_rows(&conn, FormKind::GrowthMonitoring, april).len(), 1);
    }

    #[test]
    fn test_supervisor_change_keeps_one_row_per_case() {
        let conn = conn();
        let april = month(2017, 4);
        add_gm_form(&conn, "f1", Some("c1"), "2017-04-10 10:00:00", Some(8.0));
        run(&conn, FormKind::GrowthMonitoring, april);
        conn.execute(
            "INSERT INTO ucr_growth_monitoring_forms
                (doc_id, case_id, state_id, supervisor_id, awc_id, time_end, weight_child)
             VALUES ('f2', 'c1', 'st1', 's9', 'a9', '2017-04-12 10:00:00', 8.4)",
            [],
        )
        .unwrap();
        run(&conn, FormKind::GrowthMonitoring, april);

        let rows = all_rows(&conn, FormKind::GrowthMonitoring, april);
        assert_eq!(rows.len(), 1);
        let (weight, _, _) = gm_row(&conn, april);
        assert_eq!(weight, Some(8.4));
    }

    #[test]
    fn test_supervisor_keyed_counts() {
        let conn = conn();
        let april = month(2017, 4);
        for (doc, visit) in [("v1", "scheduled"), ("v2", "unscheduled"), ("v3", "scheduled")] {
            conn.execute(
                "INSERT INTO ucr_ls_awc_visit_forms (doc_id, state_id, supervisor_id, awc_id, time_end, visit_type)
                 VALUES (?, 'st1', 's1', 'a1', '2017-04-10 10:00:00', ?)",
                params![doc, visit],
            )
            .unwrap();
        }
        run(&conn, FormKind::LsAwcVisit, april);

        let table = FormKind::LsAwcVisit.aggregator().partition("st1", april).unwrap();
        let (visits, unscheduled): (i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT awc_visits, awc_visits_unscheduled FROM {} WHERE supervisor_id = 's1'",
                    table.quoted()
                ),
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((visits, unscheduled), (3, 1));
    }

    #[test]
    fn test_every_form_kind_runs_on_empty_sources() {
        let conn = conn();
        for kind in <FormKind as strum::IntoEnumIterator>::iter() {
            run(&conn, kind, month(2017, 4));
            run(&conn, kind, month(2017, 5));
        }
    }
}
