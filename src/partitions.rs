//! Partition tables and their parent views.
//!
//! A parent table is described once as a [`TableSchema`]. Each partition is a physical table
//! created from that schema under one of three naming conventions:
//!
//! * `<parent>_<YYYY-MM-DD>` for month partitions
//! * `<parent>_<YYYY-MM-DD>_<level>` for rollup levels
//! * `<parent>_<state_id>_<YYYY-MM-DD>` for per-state form partitions
//!
//! Every partition is recorded in `partition_registry`, and the parent name is kept as a
//! `UNION ALL` view over the registered partitions so readers can query a parent directly.

use chrono::NaiveDate;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;
use crate::error::AggError;
use crate::sql::{Ident, Sql};
use crate::utils::Utils;

/// SQLite caps the number of terms in one compound SELECT; views are built from
/// sub-selects of at most this many partitions.
const VIEW_CHUNK: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: &'static str,
    pub constraint: &'static str,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: &'static str, constraint: &'static str) -> Self {
        Self::owned(name.to_owned(), sql_type, constraint)
    }

    pub fn owned(name: String, sql_type: &'static str, constraint: &'static str) -> Self {
        ColumnDef {
            name,
            sql_type,
            constraint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub parent: &'static str,
    pub columns: Vec<ColumnDef>,
    pub unique: Vec<String>,
    pub indexes: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Identifies one partition of a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionKey {
    Month(NaiveDate),
    Level(NaiveDate, u8),
    State(String, NaiveDate),
}

impl PartitionKey {
    pub fn month(&self) -> NaiveDate {
        match self {
            PartitionKey::Month(m) | PartitionKey::Level(m, _) | PartitionKey::State(_, m) => *m,
        }
    }

    pub fn table_name(&self, parent: &str) -> Result<Ident, AggError> {
        match self {
            PartitionKey::Month(month) => Ident::partition(parent, &Utils::format_date(*month)),
            PartitionKey::Level(month, level) => Ident::partition(
                parent,
                &format!("{}_{}", Utils::format_date(*month), level),
            ),
            PartitionKey::State(state_id, month) => Ident::partition(
                parent,
                &format!("{}_{}", state_id, Utils::format_date(*month)),
            ),
        }
    }

    fn state_id(&self) -> Option<&str> {
        match self {
            PartitionKey::State(state_id, _) => Some(state_id),
            _ => None,
        }
    }

    fn level(&self) -> Option<i64> {
        match self {
            PartitionKey::Level(_, level) => Some(*level as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionInfo {
    pub partition_name: String,
    pub parent_table: String,
    pub month: String,
    pub state_id: Option<String>,
    pub level: Option<i64>,
}

pub struct PartitionManager;

impl PartitionManager {
    pub fn month_partition(parent: &str, month: NaiveDate) -> Result<Ident, AggError> {
        PartitionKey::Month(month).table_name(parent)
    }

    pub fn level_partition(parent: &str, month: NaiveDate, level: u8) -> Result<Ident, AggError> {
        PartitionKey::Level(month, level).table_name(parent)
    }

    pub fn state_partition(
        parent: &str,
        state_id: &str,
        month: NaiveDate,
    ) -> Result<Ident, AggError> {
        PartitionKey::State(state_id.to_owned(), month).table_name(parent)
    }

    /// Creates the partition if absent. Returns its name.
    pub fn ensure_partition(
        conn: &Connection,
        schema: &TableSchema,
        key: &PartitionKey,
    ) -> Result<Ident, AggError> {
        let table = key.table_name(schema.parent)?;
        Database::immediate_transaction(conn, |conn| {
            if Self::exists(conn, &table)? {
                return Ok(());
            }
            debug!("Creating partition {}", table);
            conn.execute_batch(Self::create_table_sql(schema, &table)?.as_str())?;
            for (i, index_cols) in schema.indexes.iter().enumerate() {
                let index = Ident::new(&format!("{}_idx{}", table.as_str(), i))?;
                let cols = Self::quoted_list(index_cols.iter().map(String::as_str))?;
                let sql = Sql::render(
                    "CREATE INDEX IF NOT EXISTS {index} ON {table} ({cols})",
                    &[
                        ("index", Sql::ident(&index)),
                        ("table", Sql::ident(&table)),
                        ("cols", cols),
                    ],
                )?;
                conn.execute_batch(sql.as_str())?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO partition_registry
                    (partition_name, parent_table, month, state_id, level, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    table.as_str(),
                    schema.parent,
                    Utils::format_date(key.month()),
                    key.state_id(),
                    key.level(),
                    Utils::now_timestamp(),
                ],
            )?;
            Self::refresh_parent_view(conn, schema.parent)
        })?;
        Ok(table)
    }

    pub fn drop_partition(
        conn: &Connection,
        parent: &str,
        key: &PartitionKey,
    ) -> Result<(), AggError> {
        let table = key.table_name(parent)?;
        Database::immediate_transaction(conn, |conn| {
            conn.execute(
                "DELETE FROM partition_registry WHERE partition_name = ?",
                [table.as_str()],
            )?;
            // The view references the table, so it has to go first.
            Self::refresh_parent_view(conn, parent)?;
            let sql = Sql::render("DROP TABLE IF EXISTS {table}", &[("table", Sql::ident(&table))])?;
            conn.execute_batch(sql.as_str())?;
            Ok(())
        })
    }

    /// Drop followed by create, for outputs that are rebuilt wholesale.
    pub fn recreate_partition(
        conn: &Connection,
        schema: &TableSchema,
        key: &PartitionKey,
    ) -> Result<Ident, AggError> {
        Database::immediate_transaction(conn, |conn| {
            Self::drop_partition(conn, schema.parent, key)?;
            Self::ensure_partition(conn, schema, key)
        })
    }

    pub fn exists(conn: &Connection, table: &Ident) -> Result<bool, AggError> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn partitions_of(conn: &Connection, parent: &str) -> Result<Vec<PartitionInfo>, AggError> {
        let mut stmt = conn.prepare(
            "SELECT partition_name, parent_table, month, state_id, level
             FROM partition_registry
             WHERE parent_table = ?
             ORDER BY month, state_id, level",
        )?;
        let rows = stmt.query_map([parent], |row| {
            Ok(PartitionInfo {
                partition_name: row.get(0)?,
                parent_table: row.get(1)?,
                month: row.get(2)?,
                state_id: row.get(3)?,
                level: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rebuilds the parent view over the registered partitions, or drops it when none remain.
    pub fn refresh_parent_view(conn: &Connection, parent: &str) -> Result<(), AggError> {
        let view = Ident::table(parent)?;
        let partitions = Self::partitions_of(conn, parent)?;

        let drop = Sql::render("DROP VIEW IF EXISTS {view}", &[("view", Sql::ident(&view))])?;
        conn.execute_batch(drop.as_str())?;
        if partitions.is_empty() {
            return Ok(());
        }

        let mut chunks = Vec::new();
        for chunk in partitions.chunks(VIEW_CHUNK) {
            let mut selects = Vec::with_capacity(chunk.len());
            for p in chunk {
                let table = Ident::partition(parent, Self::suffix(parent, &p.partition_name)?)?;
                selects.push(Sql::composed(format!("SELECT * FROM {}", table.quoted())));
            }
            let union = Sql::join(selects, " UNION ALL ");
            chunks.push(Sql::composed(format!("SELECT * FROM ({})", union)));
        }
        let create = Sql::render(
            "CREATE VIEW {view} AS {body}",
            &[
                ("view", Sql::ident(&view)),
                ("body", Sql::join(chunks, " UNION ALL ")),
            ],
        )?;
        conn.execute_batch(create.as_str())?;
        Ok(())
    }

    fn suffix<'a>(parent: &str, partition_name: &'a str) -> Result<&'a str, AggError> {
        partition_name
            .strip_prefix(parent)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(|| {
                AggError::Error(format!(
                    "registered partition '{}' does not belong to '{}'",
                    partition_name, parent
                ))
            })
    }

    fn create_table_sql(schema: &TableSchema, table: &Ident) -> Result<Sql, AggError> {
        let mut defs = Vec::with_capacity(schema.columns.len() + 1);
        for col in &schema.columns {
            let name = Ident::new(&col.name)?;
            defs.push(Sql::composed(
                format!("{} {} {}", name.quoted(), col.sql_type, col.constraint)
                    .trim_end()
                    .to_owned(),
            ));
        }
        if !schema.unique.is_empty() {
            let cols = Self::quoted_list(schema.unique.iter().map(String::as_str))?;
            defs.push(Sql::composed(format!("UNIQUE ({})", cols)));
        }
        Sql::render(
            "CREATE TABLE IF NOT EXISTS {table} ({defs})",
            &[("table", Sql::ident(table)), ("defs", Sql::join(defs, ", "))],
        )
    }

    pub fn quoted_list<'a, I>(names: I) -> Result<Sql, AggError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parts = Vec::new();
        for name in names {
            parts.push(Sql::ident(&Ident::new(name)?));
        }
        Ok(Sql::join(parts, ", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn schema() -> TableSchema {
        TableSchema {
            parent: "agg_ls",
            columns: vec![
                ColumnDef::new("supervisor_id", "TEXT", "NOT NULL"),
                ColumnDef::new("month", "TEXT", "NOT NULL"),
                ColumnDef::new("awc_visits", "INTEGER", "NOT NULL DEFAULT 0"),
            ],
            unique: vec!["supervisor_id".into(), "month".into()],
            indexes: vec![vec!["supervisor_id".into()]],
        }
    }

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, m, 1).unwrap()
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Database::ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_partition_names_follow_convention() {
        let m = month(1);
        assert_eq!(
            PartitionManager::month_partition("child_health_monthly", m)
                .unwrap()
                .as_str(),
            "child_health_monthly_2019-01-01"
        );
        assert_eq!(
            PartitionManager::level_partition("agg_awc", m, 3)
                .unwrap()
                .as_str(),
            "agg_awc_2019-01-01_3"
        );
        assert_eq!(
            PartitionManager::state_partition("icds_dashboard_growth_monitoring_forms", "st1", m)
                .unwrap()
                .as_str(),
            "icds_dashboard_growth_monitoring_forms_st1_2019-01-01"
        );
    }

    #[test]
    fn test_ensure_is_idempotent_and_registers() {
        let conn = conn();
        let key = PartitionKey::Level(month(1), 4);
        let t1 = PartitionManager::ensure_partition(&conn, &schema(), &key).unwrap();
        let t2 = PartitionManager::ensure_partition(&conn, &schema(), &key).unwrap();
        assert_eq!(t1, t2);
        assert!(PartitionManager::exists(&conn, &t1).unwrap());

        let parts = PartitionManager::partitions_of(&conn, "agg_ls").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].partition_name, "agg_ls_2019-01-01_4");
        assert_eq!(parts[0].level, Some(4));
        assert_eq!(parts[0].state_id, None);
    }

    #[test]
    fn test_parent_view_unions_partitions() {
        let conn = conn();
        let a = PartitionManager::ensure_partition(&conn, &schema(), &PartitionKey::Level(month(1), 4))
            .unwrap();
        let b = PartitionManager::ensure_partition(&conn, &schema(), &PartitionKey::Level(month(2), 4))
            .unwrap();
        conn.execute(
            &format!("INSERT INTO {} (supervisor_id, month, awc_visits) VALUES ('s1', '2019-01-01', 2)", a.quoted()),
            [],
        )
        .unwrap();
        conn.execute(
            &format!("INSERT INTO {} (supervisor_id, month, awc_visits) VALUES ('s1', '2019-02-01', 3)", b.quoted()),
            [],
        )
        .unwrap();

        let total: i64 = conn
            .query_row("SELECT SUM(awc_visits) FROM \"agg_ls\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_recreate_empties_partition() {
        let conn = conn();
        let key = PartitionKey::Level(month(1), 4);
        let t = PartitionManager::ensure_partition(&conn, &schema(), &key).unwrap();
        conn.execute(
            &format!("INSERT INTO {} (supervisor_id, month) VALUES ('s1', '2019-01-01')", t.quoted()),
            [],
        )
        .unwrap();

        PartitionManager::recreate_partition(&conn, &schema(), &key).unwrap();
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", t.quoted()), [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_drop_removes_table_registry_and_view() {
        let conn = conn();
        let key = PartitionKey::Level(month(1), 4);
        let t = PartitionManager::ensure_partition(&conn, &schema(), &key).unwrap();
        PartitionManager::drop_partition(&conn, "agg_ls", &key).unwrap();

        assert!(!PartitionManager::exists(&conn, &t).unwrap());
        assert!(PartitionManager::partitions_of(&conn, "agg_ls").unwrap().is_empty());
        let views: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'view' AND name = 'agg_ls'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(views, 0);
    }
}
