//! Per-case monthly fact tables.
//!
//! A fact partition is rebuilt from scratch on every run: the case snapshot is joined with
//! the month's per-form aggregates, and static fields missing from the snapshot are taken
//! from the previous month's fact row.

mod ccs_record;
mod child_health;

use chrono::NaiveDate;
use log::info;
use logging_timer::timer;
use rusqlite::{types::ToSql, Connection};

use crate::aggregator::Aggregator;
use crate::error::AggError;
use crate::forms::{ColumnType, FormKind};
use crate::partitions::{ColumnDef, PartitionKey, PartitionManager, TableSchema};
use crate::sql::{execute_named, Ident, Sql};
use crate::utils::Utils;

pub(crate) struct MonthlyColumn {
    pub name: &'static str,
    pub column_type: ColumnType,
    /// Template over the case alias, the form aliases and the named fragments.
    pub expr: &'static str,
}

pub(crate) const fn fact(
    name: &'static str,
    column_type: ColumnType,
    expr: &'static str,
) -> MonthlyColumn {
    MonthlyColumn {
        name,
        column_type,
        expr,
    }
}

/// Everything that differs between the two fact tables.
pub(crate) struct FactDefinition {
    pub parent: &'static str,
    pub case_table: &'static str,
    pub case_alias: &'static str,
    /// Per-form aggregates joined on case id, with the alias the expressions use.
    pub inputs: &'static [(FormKind, &'static str)],
    pub columns: &'static [MonthlyColumn],
    /// Named SQL fragments for the column templates. `with_previous` says whether the
    /// previous month's partition is joined as `prev`.
    pub fragments: fn(with_previous: bool) -> Vec<(&'static str, Sql)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MonthlyKind {
    ChildHealth,
    CcsRecord,
}

impl MonthlyKind {
    pub fn all() -> impl Iterator<Item = MonthlyKind> {
        [MonthlyKind::ChildHealth, MonthlyKind::CcsRecord].into_iter()
    }

    pub fn name(&self) -> &'static str {
        self.definition().parent
    }

    pub fn builder(&self) -> MonthlyBuilder {
        MonthlyBuilder { kind: *self }
    }

    /// Form stages whose output this table reads.
    pub fn input_forms(&self) -> Vec<FormKind> {
        self.definition().inputs.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn partition(&self, month: NaiveDate) -> Result<Ident, AggError> {
        PartitionManager::month_partition(self.name(), month)
    }

    pub fn table_schema(&self) -> TableSchema {
        let def = self.definition();
        let mut columns = vec![
            ColumnDef::new("state_id", "TEXT", "NOT NULL"),
            ColumnDef::new("supervisor_id", "TEXT", "NOT NULL"),
            ColumnDef::new("awc_id", "TEXT", ""),
            ColumnDef::new("case_id", "TEXT", "NOT NULL"),
            ColumnDef::new("month", "TEXT", "NOT NULL"),
        ];
        for col in def.columns {
            columns.push(ColumnDef::new(col.name, col.column_type.sql(), ""));
        }
        TableSchema {
            parent: def.parent,
            columns,
            unique: vec!["supervisor_id".into(), "case_id".into(), "month".into()],
            indexes: vec![vec!["case_id".into()], vec!["awc_id".into()]],
        }
    }

    fn definition(&self) -> &'static FactDefinition {
        match self {
            MonthlyKind::ChildHealth => &child_health::DEFINITION,
            MonthlyKind::CcsRecord => &ccs_record::DEFINITION,
        }
    }
}

/// Rebuilds one month of a fact table. Atomic: the orchestrator runs `create_table` and
/// `aggregate` in one transaction, so readers never see a half-built month.
pub struct MonthlyBuilder {
    kind: MonthlyKind,
}

impl MonthlyBuilder {
    fn insert_sql(
        &self,
        table: &Ident,
        month: NaiveDate,
        state_id: &str,
        previous: Option<&Ident>,
    ) -> Result<Sql, AggError> {
        let def = self.kind.definition();
        let case_table = Ident::table(def.case_table)?;
        let case = Ident::new(def.case_alias)?;
        let fragments = (def.fragments)(previous.is_some());

        let mut names = vec!["state_id", "supervisor_id", "awc_id", "case_id", "month"];
        let mut values = vec![
            Sql::composed(format!("{}.state_id", case)),
            Sql::render("{supervisor_id}", &fragments)?,
            Sql::composed(format!("{}.awc_id", case)),
            Sql::composed(format!("{}.doc_id", case)),
            Sql::text(":month"),
        ];
        for col in def.columns {
            names.push(col.name);
            values.push(Sql::render(col.expr, &fragments)?);
        }

        let mut joins = Vec::with_capacity(def.inputs.len() + 1);
        for (kind, alias) in def.inputs {
            let partition = kind.aggregator().partition(state_id, month)?;
            let alias = Ident::new(alias)?;
            joins.push(Sql::composed(format!(
                "LEFT JOIN {} {} ON {}.{} = {}.doc_id",
                partition.quoted(),
                alias,
                alias,
                kind.spec().key.name(),
                case
            )));
        }
        if let Some(previous) = previous {
            joins.push(Sql::composed(format!(
                "LEFT JOIN {} prev ON prev.case_id = {}.doc_id",
                previous.quoted(),
                case
            )));
        }

        Sql::render(
            "INSERT INTO {table} ({names})
             SELECT {values}
             FROM {case_table} {case}
             {joins}
             WHERE {case}.state_id = :state_id AND {case}.doc_id IS NOT NULL
             ORDER BY {case}.awc_id, {case}.doc_id",
            &[
                ("table", Sql::ident(table)),
                ("names", PartitionManager::quoted_list(names)?),
                ("values", Sql::join(values, ",\n                    ")),
                ("case_table", Sql::ident(&case_table)),
                ("case", Sql::composed(case.to_string())),
                ("joins", Sql::join(joins, "\n             ")),
            ],
        )
    }
}

impl Aggregator for MonthlyBuilder {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn create_table(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError> {
        // Inputs are joined per state, so they must exist even when a form stage had
        // nothing to write.
        for kind in self.kind.input_forms() {
            kind.aggregator().create_table(conn, month, state_ids)?;
        }
        PartitionManager::recreate_partition(
            conn,
            &self.kind.table_schema(),
            &PartitionKey::Month(month),
        )?;
        Ok(())
    }

    fn aggregate(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError> {
        let _tmr = timer!(log::Level::Debug; "MonthlyBuilder::aggregate", "{} {}", self.kind.name(), month);

        let table = self.kind.partition(month)?;
        let previous = self.kind.partition(Utils::prev_month(month)?)?;
        let previous = if PartitionManager::exists(conn, &previous)? {
            Some(previous)
        } else {
            None
        };

        let month_str = Utils::format_date(month);
        let month_end = Utils::format_date(Utils::month_end(month)?);
        let mut total = 0;
        for state_id in state_ids {
            let sql = self.insert_sql(&table, month, state_id, previous.as_ref())?;
            let params: [(&str, &dyn ToSql); 3] = [
                (":state_id", state_id),
                (":month", &month_str),
                (":month_end", &month_end),
            ];
            total += execute_named(conn, &sql, &params)?;
        }
        info!(
            "{}: built {} row(s) for {} across {} state(s)",
            self.kind.name(),
            total,
            month_str,
            state_ids.len()
        );
        Ok(())
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Database;
    use crate::sql::query_rows;
    use pretty_assertions::assert_eq;
    use rusqlite::params;

    pub(crate) fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    pub(crate) fn build(conn: &Connection, kind: MonthlyKind, m: NaiveDate, states: &[String]) {
        let builder = kind.builder();
        Database::immediate_transaction(conn, |conn| {
            builder.create_table(conn, m, states)?;
            builder.aggregate(conn, m, states)
        })
        .unwrap();
    }

    pub(crate) fn add_child(conn: &Connection, doc_id: &str, awc_id: &str, dob: &str) {
        conn.execute(
            "INSERT INTO ucr_child_health_cases
                (doc_id, state_id, supervisor_id, awc_id, person_name, sex, dob, opened_on)
             VALUES (?, 'st1', 's1', ?, 'Child', 'F', ?, '2016-01-01')",
            params![doc_id, awc_id, dob],
        )
        .unwrap();
    }

    fn all_rows(conn: &Connection, kind: MonthlyKind, m: NaiveDate) -> Vec<Vec<(String, rusqlite::types::Value)>> {
        let table = kind.partition(m).unwrap();
        query_rows(
            conn,
            &Sql::composed(format!("SELECT * FROM {} ORDER BY case_id", table.quoted())),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let conn = Connection::open_in_memory().unwrap();
        Database::ensure_schema(&conn).unwrap();
        let states = vec!["st1".to_string()];
        add_child(&conn, "c1", "a1", "2016-09-10");
        add_child(&conn, "c2", "a2", "2017-04-02");
        conn.execute(
            "INSERT INTO ucr_ccs_record_cases (doc_id, state_id, supervisor_id, awc_id, person_name, edd, opened_on)
             VALUES ('m1', 'st1', 's1', 'a1', 'Mother', '2017-07-01', '2016-12-01')",
            [],
        )
        .unwrap();

        for kind in [MonthlyKind::ChildHealth, MonthlyKind::CcsRecord] {
            build(&conn, kind, month(2017, 4), &states);
            let first = all_rows(&conn, kind, month(2017, 4));
            build(&conn, kind, month(2017, 4), &states);
            let second = all_rows(&conn, kind, month(2017, 4));
            assert!(!first.is_empty());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_schema_has_unique_case_key() {
        for kind in [MonthlyKind::ChildHealth, MonthlyKind::CcsRecord] {
            let schema = kind.table_schema();
            assert_eq!(schema.unique, vec!["supervisor_id", "case_id", "month"]);
            let names = schema.column_names();
            let mut deduped = names.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(names.len(), deduped.len(), "{}", kind.name());
        }
    }

    #[test]
    fn test_every_template_renders() {
        for kind in [MonthlyKind::ChildHealth, MonthlyKind::CcsRecord] {
            let table = kind.partition(month(2017, 4)).unwrap();
            let prev = kind.partition(month(2017, 3)).unwrap();
            let builder = kind.builder();
            assert!(builder.insert_sql(&table, month(2017, 4), "st1", None).is_ok());
            assert!(builder
                .insert_sql(&table, month(2017, 4), "st1", Some(&prev))
                .is_ok());
        }
    }
}
