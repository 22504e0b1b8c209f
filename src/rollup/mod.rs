//! Location rollups.
//!
//! Each rollup table has one partition per (month, aggregation level). The leaf level is
//! built from the month's facts joined to the location snapshot; every level above it is the
//! grouped sum of the level directly below, with the ids below the level set to `'All'`.

mod specs;

use chrono::NaiveDate;
use log::{info, warn};
use logging_timer::timer;
use rusqlite::{types::ToSql, Connection};
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::aggregator::Aggregator;
use crate::error::AggError;
use crate::forms::{ColumnType, FormKind};
use crate::locations::{Hierarchy, ALL};
use crate::monthly::MonthlyKind;
use crate::partitions::{ColumnDef, PartitionKey, PartitionManager, TableSchema};
use crate::sql::{execute_named, query_count, Ident, Sql};
use crate::utils::Utils;

/// Launch counters by the level they count, state first.
pub const LAUNCHED_COLUMNS: [&str; 5] = [
    "num_launched_states",
    "num_launched_districts",
    "num_launched_blocks",
    "num_launched_supervisors",
    "num_launched_awcs",
];

/// How a column moves from one level to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Sum of the children.
    Sum,
    /// Launch counter for the given level. Below that level it is the sum of the children;
    /// at or above it, 1 when any child at the next finer level launched.
    Launched(u8),
    /// 1 when any child has it set.
    Flag,
    /// Only meaningful at the leaf; NULL above it.
    LeafOnly,
}

#[derive(Debug)]
pub struct RollupColumn {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub kind: ColumnKind,
    /// Expression at the leaf level, over the source aliased `loc` and the fact alias.
    pub leaf: &'static str,
}

/// Inputs available to a leaf query.
pub(crate) struct LeafContext<'a> {
    pub conn: &'a Connection,
    pub month: NaiveDate,
}

pub struct RollupSpec {
    pub kind: RollupKind,
    pub table: &'static str,
    pub leaf_level: u8,
    /// Extra grouping columns kept at every level, with their leaf expressions.
    pub dims: &'static [(&'static str, &'static str)],
    pub columns: &'static [RollupColumn],
    /// Facts whose awc is missing from the snapshot are counted and left out.
    pub facts: Option<MonthlyKind>,
    /// Whether the leaf query groups many source rows into one location row.
    pub leaf_grouped: bool,
    /// `FROM ...` clause of the leaf query. Must alias the location row as `loc`.
    pub(crate) leaf_from: fn(&LeafContext) -> Result<Sql, AggError>,
    /// Form partitions the leaf query reads through their parent view.
    pub form_inputs: &'static [FormKind],
}

impl RollupSpec {
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        (1..=self.leaf_level).rev()
    }

    pub fn partition(&self, month: NaiveDate, level: u8) -> Result<Ident, AggError> {
        PartitionManager::level_partition(self.table, month, level)
    }

    pub fn location_columns() -> Vec<String> {
        Hierarchy::Icds.id_columns(5)
    }

    pub fn test_columns() -> Vec<String> {
        Hierarchy::Icds
            .levels()
            .iter()
            .map(|name| format!("{}_is_test", name))
            .collect()
    }

    /// Columns whose parent value must equal the sum of its children at `parent_level`.
    pub fn summed_columns(&self, parent_level: u8) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| match c.kind {
                ColumnKind::Sum => true,
                ColumnKind::Launched(level) => level > parent_level,
                _ => false,
            })
            .map(|c| c.name)
            .collect()
    }

    pub fn table_schema(&self) -> TableSchema {
        let mut columns = Vec::new();
        for id in Self::location_columns() {
            columns.push(ColumnDef::owned(id, "TEXT", "NOT NULL"));
        }
        for flag in Self::test_columns() {
            columns.push(ColumnDef::owned(flag, "INTEGER", "NOT NULL DEFAULT 0"));
        }
        columns.push(ColumnDef::new("month", "TEXT", "NOT NULL"));
        columns.push(ColumnDef::new("aggregation_level", "INTEGER", "NOT NULL"));
        for (dim, _) in self.dims {
            columns.push(ColumnDef::new(dim, "TEXT", "NOT NULL"));
        }
        for col in self.columns {
            columns.push(ColumnDef::new(col.name, col.column_type.sql(), ""));
        }

        let mut unique = Self::location_columns();
        unique.extend(self.dims.iter().map(|(dim, _)| dim.to_string()));
        TableSchema {
            parent: self.table,
            columns,
            unique,
            indexes: vec![
                vec!["state_id".into(), "district_id".into()],
                vec!["supervisor_id".into()],
                vec!["awc_id".into()],
            ],
        }
    }

    fn insert_names(&self) -> Vec<String> {
        let mut names = Self::location_columns();
        names.extend(Self::test_columns());
        names.push("month".into());
        names.push("aggregation_level".into());
        names.extend(self.dims.iter().map(|(dim, _)| dim.to_string()));
        names.extend(self.columns.iter().map(|c| c.name.to_string()));
        names
    }

    fn leaf_sql(&self, ctx: &LeafContext) -> Result<Sql, AggError> {
        let table = self.partition(ctx.month, self.leaf_level)?;
        let levels = Hierarchy::Icds.levels();

        let mut values = Vec::new();
        let mut group_by = Vec::new();
        for (i, name) in levels.iter().enumerate() {
            if (i as u8) < self.leaf_level {
                let id = Ident::new(&format!("{}_id", name))?;
                values.push(Sql::composed(format!("loc.{}", id.quoted())));
                group_by.push(Sql::composed(format!("loc.{}", id.quoted())));
            } else {
                values.push(Sql::composed(format!("'{}'", ALL)));
            }
        }
        for (i, name) in levels.iter().enumerate() {
            if (i as u8) < self.leaf_level {
                let flag = Ident::new(&format!("{}_is_test", name))?;
                values.push(Sql::composed(format!("loc.{}", flag.quoted())));
                group_by.push(Sql::composed(format!("loc.{}", flag.quoted())));
            } else {
                values.push(Sql::text("0"));
            }
        }
        values.push(Sql::text(":month"));
        values.push(Sql::int(self.leaf_level as i64));
        for (_, expr) in self.dims {
            values.push(Sql::text(expr));
            group_by.push(Sql::text(expr));
        }
        for col in self.columns {
            values.push(Sql::text(col.leaf));
        }

        let group_by = if self.leaf_grouped {
            Sql::composed(format!("GROUP BY {}", Sql::join(group_by, ", ")))
        } else {
            Sql::text("")
        };

        Sql::render(
            "INSERT INTO {table} ({names})
             SELECT {values}
             {from}
             {group_by}",
            &[
                ("table", Sql::ident(&table)),
                (
                    "names",
                    PartitionManager::quoted_list(self.insert_names().iter().map(String::as_str))?,
                ),
                ("values", Sql::join(values, ",\n                    ")),
                ("from", (self.leaf_from)(ctx)?),
                ("group_by", group_by),
            ],
        )
    }

    fn level_sql(&self, month: NaiveDate, level: u8) -> Result<Sql, AggError> {
        let target = self.partition(month, level)?;
        let source = self.partition(month, level + 1)?;
        let levels = Hierarchy::Icds.levels();

        let mut values = Vec::new();
        let mut group_by = Vec::new();
        for (i, name) in levels.iter().enumerate() {
            let id = Ident::new(&format!("{}_id", name))?.quoted();
            if (i as u8) < level {
                values.push(Sql::composed(id.clone()));
                group_by.push(Sql::composed(id));
            } else {
                values.push(Sql::composed(format!("'{}'", ALL)));
            }
        }
        for (i, name) in levels.iter().enumerate() {
            let flag = Ident::new(&format!("{}_is_test", name))?.quoted();
            if (i as u8) < level {
                values.push(Sql::composed(flag.clone()));
                group_by.push(Sql::composed(flag));
            } else {
                values.push(Sql::text("0"));
            }
        }
        values.push(Sql::text("month"));
        values.push(Sql::int(level as i64));
        group_by.push(Sql::text("month"));
        for (dim, _) in self.dims {
            let dim = Ident::new(dim)?.quoted();
            values.push(Sql::composed(dim.clone()));
            group_by.push(Sql::composed(dim));
        }

        // The finer level's own counter decides whether this row launched.
        let child_counter = Ident::new(LAUNCHED_COLUMNS[level as usize])?.quoted();
        for col in self.columns {
            let name = Ident::new(col.name)?.quoted();
            let expr = match col.kind {
                ColumnKind::Sum => format!("SUM({name})"),
                ColumnKind::Launched(col_level) if col_level > level => format!("SUM({name})"),
                ColumnKind::Launched(_) => {
                    format!("CASE WHEN SUM({child_counter}) > 0 THEN 1 ELSE 0 END")
                }
                ColumnKind::Flag => format!("MAX({name})"),
                ColumnKind::LeafOnly => "NULL".to_owned(),
            };
            values.push(Sql::composed(expr));
        }

        Sql::render(
            "INSERT INTO {target} ({names})
             SELECT {values}
             FROM {source}
             GROUP BY {group_by}",
            &[
                ("target", Sql::ident(&target)),
                (
                    "names",
                    PartitionManager::quoted_list(self.insert_names().iter().map(String::as_str))?,
                ),
                ("values", Sql::join(values, ",\n                    ")),
                ("source", Sql::ident(&source)),
                ("group_by", Sql::join(group_by, ", ")),
            ],
        )
    }

    fn warn_missing_locations(&self, conn: &Connection, month: NaiveDate) -> Result<(), AggError> {
        let Some(facts) = self.facts else {
            return Ok(());
        };
        let table = facts.partition(month)?;
        let sql = Sql::render(
            "SELECT COUNT(*) FROM {facts} f
             WHERE NOT EXISTS (
                 SELECT 1 FROM \"awc_location\" loc
                 WHERE loc.awc_id = f.awc_id AND loc.aggregation_level = 5)",
            &[("facts", Sql::ident(&table))],
        )?;
        let missing = query_count(conn, &sql, &[])?;
        if missing > 0 {
            warn!(
                "{}: {} {} row(s) for {} have no awc in the location snapshot and were left out",
                self.table,
                missing,
                facts.name(),
                Utils::format_date(month)
            );
        }
        Ok(())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumString, IntoStaticStr,
)]
pub enum RollupKind {
    #[strum(serialize = "agg_child_health")]
    ChildHealth,
    #[strum(serialize = "agg_ccs_record")]
    CcsRecord,
    #[strum(serialize = "agg_awc")]
    Awc,
    #[strum(serialize = "agg_ls")]
    Ls,
}

impl RollupKind {
    pub fn spec(&self) -> &'static RollupSpec {
        match self {
            RollupKind::ChildHealth => &specs::AGG_CHILD_HEALTH,
            RollupKind::CcsRecord => &specs::AGG_CCS_RECORD,
            RollupKind::Awc => &specs::AGG_AWC,
            RollupKind::Ls => &specs::AGG_LS,
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn all() -> impl Iterator<Item = RollupKind> {
        RollupKind::iter()
    }

    pub fn aggregator(&self) -> RollupAggregator {
        RollupAggregator { spec: self.spec() }
    }
}

/// Rebuilds every level of one rollup table for a month. Atomic.
pub struct RollupAggregator {
    spec: &'static RollupSpec,
}

impl Aggregator for RollupAggregator {
    fn name(&self) -> &'static str {
        self.spec.table
    }

    fn create_table(
        &self,
        conn: &Connection,
        month: NaiveDate,
        state_ids: &[String],
    ) -> Result<(), AggError> {
        for kind in self.spec.form_inputs {
            kind.aggregator().create_table(conn, month, state_ids)?;
        }
        if let Some(facts) = self.spec.facts {
            PartitionManager::ensure_partition(conn, &facts.table_schema(), &PartitionKey::Month(month))?;
        }
        let schema = self.spec.table_schema();
        for level in self.spec.levels() {
            PartitionManager::recreate_partition(conn, &schema, &PartitionKey::Level(month, level))?;
        }
        Ok(())
    }

    fn aggregate(
        &self,
        conn: &Connection,
        month: NaiveDate,
        _state_ids: &[String],
    ) -> Result<(), AggError> {
        let _tmr = timer!(log::Level::Debug; "RollupAggregator::aggregate", "{} {}", self.spec.table, month);

        let month_str = Utils::format_date(month);
        let prev_month = Utils::format_date(Utils::prev_month(month)?);
        let params: [(&str, &dyn ToSql); 2] = [(":month", &month_str), (":prev_month", &prev_month)];

        self.spec.warn_missing_locations(conn, month)?;
        let ctx = LeafContext { conn, month };
        let leaf_rows = execute_named(conn, &self.spec.leaf_sql(&ctx)?, &params)?;
        let mut rows = vec![leaf_rows];
        for level in self.spec.levels().skip(1) {
            rows.push(execute_named(conn, &self.spec.level_sql(month, level)?, &params)?);
        }

        info!(
            "{}: rolled up {} for levels {}..1, rows per level {:?}",
            self.spec.table, month_str, self.spec.leaf_level, rows
        );
        Ok(())
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

/// A parent view, or an empty relation with the given columns when no partition exists yet.
pub(crate) fn form_source(
    conn: &Connection,
    kind: FormKind,
    empty: &'static str,
) -> Result<Sql, AggError> {
    let parent = kind.spec().target_table;
    if PartitionManager::partitions_of(conn, parent)?.is_empty() {
        Ok(Sql::text(empty))
    } else {
        Ok(Sql::ident(&Ident::table(parent)?))
    }
}

/// A level partition, or an empty relation with the given columns when it does not exist.
pub(crate) fn partition_or_empty(
    conn: &Connection,
    table: &Ident,
    empty: &'static str,
) -> Result<Sql, AggError> {
    if PartitionManager::exists(conn, table)? {
        Ok(Sql::ident(table))
    } else {
        Ok(Sql::text(empty))
    }
}
