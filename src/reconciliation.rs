//! Operator tooling for checking the pipeline's outputs.
//!
//! `ucr_reconciliation_status` tracks, per day and UCR table, whether every source document
//! expected for that day made it into the table. [`verify_rollup`] recomputes rollup parents
//! from their children. Neither ever corrects data; they only report.

use std::collections::HashSet;

use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::{params, params_from_iter, types::Value, Connection};
use serde::Serialize;

use crate::db::Database;
use crate::error::AggError;
use crate::locations::Hierarchy;
use crate::partitions::PartitionManager;
use crate::rollup::RollupKind;
use crate::sql::{query_rows, Ident, Sql};
use crate::utils::Utils;

/// Keeps `IN (...)` lists under SQLite's default bound-parameter limit.
const DOC_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UcrReconciliationStatus {
    pub id: i64,
    pub db_alias: String,
    pub day: NaiveDate,
    pub table_id: String,
    pub doc_type_filter: String,
    pub documents_missing: Option<i64>,
    pub last_processed_date: Option<String>,
    pub verified_date: Option<String>,
}

impl UcrReconciliationStatus {
    pub fn is_verified(&self) -> bool {
        self.verified_date.is_some()
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<(Self, String)> {
        Ok((
            UcrReconciliationStatus {
                id: row.get(0)?,
                db_alias: row.get(1)?,
                day: NaiveDate::MIN,
                table_id: row.get(3)?,
                doc_type_filter: row.get(4)?,
                documents_missing: row.get(5)?,
                last_processed_date: row.get(6)?,
                verified_date: row.get(7)?,
            },
            row.get(2)?,
        ))
    }
}

const SELECT_STATUS: &str = "SELECT id, db_alias, day, table_id, doc_type_filter,
        documents_missing, last_processed_date, verified_date
     FROM ucr_reconciliation_status";

fn load_statuses(
    conn: &Connection,
    sql: &str,
    args: &[&str],
) -> Result<Vec<UcrReconciliationStatus>, AggError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), UcrReconciliationStatus::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        let (mut status, day) = row?;
        status.day = Utils::parse_date(&day)?;
        out.push(status);
    }
    Ok(out)
}

/// Creates a pending row for each (table, doc type filter) on `day`. Existing rows are kept.
pub fn setup_for_day(
    conn: &Connection,
    db_alias: &str,
    day: NaiveDate,
    tables: &[(&str, &str)],
) -> Result<Vec<UcrReconciliationStatus>, AggError> {
    let day_str = Utils::format_date(day);
    Database::immediate_transaction(conn, |conn| {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO ucr_reconciliation_status
                (db_alias, day, table_id, doc_type_filter)
             VALUES (?, ?, ?, ?)",
        )?;
        for (table_id, doc_type_filter) in tables {
            Ident::table(table_id)?;
            stmt.execute(params![db_alias, day_str, table_id, doc_type_filter])?;
        }
        Ok(())
    })?;
    load_statuses(
        conn,
        &format!("{} WHERE db_alias = ? AND day = ? ORDER BY table_id, doc_type_filter", SELECT_STATUS),
        &[db_alias, &day_str],
    )
}

/// Counts the expected documents absent from the status row's UCR table and records the
/// result. A row with nothing missing is marked verified.
pub fn reconcile(
    conn: &Connection,
    status: &UcrReconciliationStatus,
    expected_doc_ids: &[String],
) -> Result<UcrReconciliationStatus, AggError> {
    let table = Ident::table(&status.table_id)?;
    let mut found: HashSet<String> = HashSet::new();
    for chunk in expected_doc_ids.chunks(DOC_CHUNK) {
        let sql = Sql::render(
            "SELECT doc_id FROM {table} WHERE doc_id IN ({placeholders})",
            &[
                ("table", Sql::ident(&table)),
                ("placeholders", Sql::composed(vec!["?"; chunk.len()].join(", "))),
            ],
        )?;
        let mut stmt = conn.prepare(sql.as_str())?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| r.get::<_, String>(0))?;
        for row in rows {
            found.insert(row?);
        }
    }

    let expected: HashSet<&String> = expected_doc_ids.iter().collect();
    let missing = expected.iter().filter(|id| !found.contains(id.as_str())).count() as i64;
    let now = Utils::now_timestamp();
    let verified = if missing == 0 { Some(now.clone()) } else { None };

    conn.execute(
        "UPDATE ucr_reconciliation_status
         SET documents_missing = ?, last_processed_date = ?,
             verified_date = COALESCE(?, verified_date)
         WHERE id = ?",
        params![missing, now, verified, status.id],
    )?;
    if missing > 0 {
        warn!(
            "{} on {}: {} of {} expected document(s) missing from {}",
            status.db_alias,
            Utils::format_date(status.day),
            missing,
            expected.len(),
            status.table_id
        );
    }

    let mut updated = load_statuses(
        conn,
        &format!("{} WHERE id = ?", SELECT_STATUS),
        &[&status.id.to_string()],
    )?;
    updated
        .pop()
        .ok_or_else(|| AggError::Error(format!("reconciliation status {} disappeared", status.id)))
}

/// Rows for `day` that have not been verified yet.
pub fn unverified(
    conn: &Connection,
    db_alias: &str,
    day: NaiveDate,
) -> Result<Vec<UcrReconciliationStatus>, AggError> {
    load_statuses(
        conn,
        &format!(
            "{} WHERE db_alias = ? AND day = ? AND verified_date IS NULL
             ORDER BY table_id, doc_type_filter",
            SELECT_STATUS
        ),
        &[db_alias, &Utils::format_date(day)],
    )
}

/// A rollup parent whose value differs from the sum of its children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupMismatch {
    pub kind: &'static str,
    pub month: NaiveDate,
    /// Level of the parent row.
    pub level: u8,
    /// Location ids of the parent, state first.
    pub location: Vec<String>,
    pub dims: Vec<String>,
    pub column: String,
    pub parent: Option<f64>,
    pub children: Option<f64>,
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(r) => Some(*r),
        Value::Text(t) => t.parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::Text(t) => t.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        _ => String::new(),
    }
}

/// Recomputes every parent level of `kind` for `month` from the level below it.
pub fn verify_rollup(
    conn: &Connection,
    kind: RollupKind,
    month: NaiveDate,
) -> Result<Vec<RollupMismatch>, AggError> {
    let spec = kind.spec();
    let mut mismatches = Vec::new();

    for level in 1..spec.leaf_level {
        let parent = spec.partition(month, level)?;
        let child = spec.partition(month, level + 1)?;
        if !PartitionManager::exists(conn, &parent)? || !PartitionManager::exists(conn, &child)? {
            warn!(
                "{}: level {} or {} missing for {}, not verified",
                kind.name(),
                level,
                level + 1,
                Utils::format_date(month)
            );
            continue;
        }

        let mut keys = Vec::new();
        for id in Hierarchy::Icds.id_columns(level) {
            keys.push(Ident::new(&id)?);
        }
        let prefix_len = keys.len();
        for (dim, _) in spec.dims {
            keys.push(Ident::new(dim)?);
        }
        let columns: Vec<Ident> = spec
            .summed_columns(level)
            .into_iter()
            .map(Ident::new)
            .collect::<Result<_, _>>()?;
        if columns.is_empty() {
            continue;
        }

        let key_list = Sql::join(keys.iter().map(|k| Sql::composed(format!("c.{}", k.quoted()))), ", ");
        let join_on = Sql::join(
            keys.iter()
                .map(|k| Sql::composed(format!("p.{0} = c.{0}", k.quoted()))),
            " AND ",
        );
        let sums = Sql::join(
            columns
                .iter()
                .map(|c| Sql::composed(format!("SUM({0}) AS {0}", c.quoted()))),
            ", ",
        );
        let pairs = Sql::join(
            columns
                .iter()
                .map(|c| Sql::composed(format!("p.{0}, c.{0}", c.quoted()))),
            ", ",
        );
        let differs = Sql::join(
            columns
                .iter()
                .map(|c| Sql::composed(format!("p.{0} IS NOT c.{0}", c.quoted()))),
            " OR ",
        );
        let group = PartitionManager::quoted_list(keys.iter().map(Ident::as_str))?;

        // Child groups against their parent, including groups with no parent row
        let by_children = Sql::render(
            "WITH c AS (SELECT {group}, {sums} FROM {child} GROUP BY {group})
             SELECT {key_list}, {pairs}
             FROM c LEFT JOIN {parent} p ON {join_on}
             WHERE {differs}",
            &[
                ("group", group.clone()),
                ("sums", sums),
                ("child", Sql::ident(&child)),
                ("key_list", key_list),
                ("pairs", pairs),
                ("parent", Sql::ident(&parent)),
                ("join_on", join_on.clone()),
                ("differs", differs),
            ],
        )?;
        for row in query_rows(conn, &by_children, &[])? {
            let (key_values, values) = row.split_at(keys.len());
            for (i, column) in columns.iter().enumerate() {
                let p = as_f64(&values[2 * i].1);
                let c = as_f64(&values[2 * i + 1].1);
                if p != c {
                    mismatches.push(RollupMismatch {
                        kind: kind.name(),
                        month,
                        level,
                        location: key_values[..prefix_len].iter().map(|(_, v)| as_string(v)).collect(),
                        dims: key_values[prefix_len..].iter().map(|(_, v)| as_string(v)).collect(),
                        column: column.to_string(),
                        parent: p,
                        children: c,
                    });
                }
            }
        }

        // Parent rows with no children at all
        let orphans = Sql::render(
            "SELECT {parent_keys}, {parent_cols} FROM {parent} p
             WHERE NOT EXISTS (SELECT 1 FROM {child} c WHERE {join_on})",
            &[
                (
                    "parent_keys",
                    Sql::join(keys.iter().map(|k| Sql::composed(format!("p.{}", k.quoted()))), ", "),
                ),
                (
                    "parent_cols",
                    Sql::join(columns.iter().map(|c| Sql::composed(format!("p.{}", c.quoted()))), ", "),
                ),
                ("parent", Sql::ident(&parent)),
                ("child", Sql::ident(&child)),
                ("join_on", join_on),
            ],
        )?;
        for row in query_rows(conn, &orphans, &[])? {
            let (key_values, values) = row.split_at(keys.len());
            for (i, column) in columns.iter().enumerate() {
                let p = as_f64(&values[i].1);
                if p.is_some() {
                    mismatches.push(RollupMismatch {
                        kind: kind.name(),
                        month,
                        level,
                        location: key_values[..prefix_len].iter().map(|(_, v)| as_string(v)).collect(),
                        dims: key_values[prefix_len..].iter().map(|(_, v)| as_string(v)).collect(),
                        column: column.to_string(),
                        parent: p,
                        children: None,
                    });
                }
            }
        }
    }

    info!(
        "{} for {}: {} rollup mismatch(es)",
        kind.name(),
        Utils::format_date(month),
        mismatches.len()
    );
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::tests::{
        add_registered_children, conn_with_snapshot, create_fact_partitions, month, run,
    };
    use pretty_assertions::assert_eq;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Database::ensure_schema(&conn).unwrap();
        conn
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 1, 15).unwrap()
    }

    fn add_form(conn: &Connection, doc_id: &str) {
        conn.execute(
            "INSERT INTO ucr_growth_monitoring_forms (doc_id, case_id, state_id, time_end)
             VALUES (?, 'c1', 'st1', '2019-01-15 10:00:00')",
            [doc_id],
        )
        .unwrap();
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = conn();
        let tables = [
            ("ucr_growth_monitoring_forms", "growth_monitoring"),
            ("ucr_thr_forms", "thr"),
        ];
        let first = setup_for_day(&conn, "icds-ucr", day(), &tables).unwrap();
        let second = setup_for_day(&conn, "icds-ucr", day(), &tables).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(first.iter().all(|s| !s.is_verified() && s.documents_missing.is_none()));
    }

    #[test]
    fn test_setup_rejects_unknown_table() {
        let conn = conn();
        assert!(setup_for_day(&conn, "icds-ucr", day(), &[("sqlite_master", "x")]).is_err());
    }

    #[test]
    fn test_reconcile_counts_missing_documents() {
        let conn = conn();
        add_form(&conn, "f1");
        add_form(&conn, "f2");
        let status = setup_for_day(&conn, "icds-ucr", day(), &[("ucr_growth_monitoring_forms", "gm")])
            .unwrap()
            .remove(0);

        let expected: Vec<String> = ["f1", "f2", "f3"].iter().map(|s| s.to_string()).collect();
        let updated = reconcile(&conn, &status, &expected).unwrap();
        assert_eq!(updated.documents_missing, Some(1));
        assert!(updated.last_processed_date.is_some());
        assert!(!updated.is_verified());
        assert_eq!(unverified(&conn, "icds-ucr", day()).unwrap().len(), 1);

        add_form(&conn, "f3");
        let updated = reconcile(&conn, &updated, &expected).unwrap();
        assert_eq!(updated.documents_missing, Some(0));
        assert!(updated.is_verified());
        assert!(unverified(&conn, "icds-ucr", day()).unwrap().is_empty());
    }

    #[test]
    fn test_consistent_rollup_has_no_mismatches() {
        let conn = conn_with_snapshot();
        create_fact_partitions(&conn);
        add_registered_children(&conn, "a1", "s1", 3, 0);
        add_registered_children(&conn, "a2", "s1", 5, 0);
        run(&conn, RollupKind::ChildHealth);
        run(&conn, RollupKind::CcsRecord);
        run(&conn, RollupKind::Awc);

        for kind in [RollupKind::ChildHealth, RollupKind::CcsRecord, RollupKind::Awc] {
            assert_eq!(verify_rollup(&conn, kind, month()).unwrap(), vec![]);
        }
    }

    #[test]
    fn test_tampered_parent_is_reported() {
        let conn = conn_with_snapshot();
        create_fact_partitions(&conn);
        add_registered_children(&conn, "a1", "s1", 3, 0);
        add_registered_children(&conn, "a2", "s1", 5, 0);
        run(&conn, RollupKind::ChildHealth);
        run(&conn, RollupKind::CcsRecord);
        run(&conn, RollupKind::Awc);

        let supervisor = RollupKind::Awc.spec().partition(month(), 4).unwrap();
        conn.execute(
            &format!(
                "UPDATE {} SET registered_children = registered_children + 1 WHERE supervisor_id = 's1'",
                supervisor.quoted()
            ),
            [],
        )
        .unwrap();

        let mismatches = verify_rollup(&conn, RollupKind::Awc, month()).unwrap();
        let found: Vec<(u8, &str, Option<f64>, Option<f64>)> = mismatches
            .iter()
            .map(|m| (m.level, m.column.as_str(), m.parent, m.children))
            .collect();
        assert_eq!(
            found,
            vec![
                (3, "registered_children", Some(8.0), Some(9.0)),
                (4, "registered_children", Some(9.0), Some(8.0)),
            ]
        );
        assert_eq!(mismatches[1].location, vec!["st1", "d1", "b1", "s1"]);
    }
}
