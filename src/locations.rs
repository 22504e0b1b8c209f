use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use logging_timer::timer;
use rusqlite::{params_from_iter, types::Value, Connection};

use crate::db::Database;
use crate::error::AggError;
use crate::partitions::PartitionManager;
use crate::sql::{Ident, Sql};

/// Placeholder for ids below a row's aggregation level.
pub const ALL: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// state > district > block > supervisor > awc
    Icds,
    /// state > district > taluka > phc > sc > village
    Aaa,
}

impl Hierarchy {
    pub fn levels(&self) -> &'static [&'static str] {
        match self {
            Hierarchy::Icds => &["state", "district", "block", "supervisor", "awc"],
            Hierarchy::Aaa => &["state", "district", "taluka", "phc", "sc", "village"],
        }
    }

    pub fn snapshot_table(&self) -> &'static str {
        match self {
            Hierarchy::Icds => "awc_location",
            Hierarchy::Aaa => "village_location",
        }
    }

    pub fn leaf_level(&self) -> u8 {
        self.levels().len() as u8
    }

    pub fn leaf_type(&self) -> &'static str {
        self.levels()[self.levels().len() - 1]
    }

    /// `<level>_id` columns from the top of the tree down to `level` inclusive.
    pub fn id_columns(&self, level: u8) -> Vec<String> {
        self.levels()
            .iter()
            .take(level as usize)
            .map(|name| format!("{}_id", name))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct LocationNode {
    name: String,
    site_code: String,
    location_type: String,
    parent_id: Option<String>,
    is_test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Ancestor {
    id: String,
    name: String,
    site_code: String,
    is_test: bool,
}

impl Ancestor {
    fn all() -> Self {
        Ancestor {
            id: ALL.to_owned(),
            name: ALL.to_owned(),
            site_code: ALL.to_owned(),
            is_test: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    pub leaves: usize,
    pub skipped: usize,
    pub rows: usize,
}

/// Replaces the snapshot table for `hierarchy` with the current tree of `domain`.
///
/// Every leaf yields one row per aggregation level: its own row at the leaf level and a
/// shared row for each ancestor prefix above it, with deeper ids set to `'All'`. A leaf
/// whose ancestor chain does not match the hierarchy is logged and left out.
pub fn rebuild_location_snapshot(
    conn: &Connection,
    domain: &str,
    hierarchy: Hierarchy,
) -> Result<SnapshotStats, AggError> {
    let _tmr = timer!(log::Level::Debug; "rebuild_location_snapshot", "{}", domain);

    let nodes = load_tree(conn, domain)?;
    let mut stats = SnapshotStats::default();
    let mut chains: Vec<Vec<Ancestor>> = Vec::new();

    let mut leaf_ids: Vec<&String> = nodes
        .iter()
        .filter(|(_, n)| n.location_type == hierarchy.leaf_type())
        .map(|(id, _)| id)
        .collect();
    leaf_ids.sort();

    for leaf_id in leaf_ids {
        stats.leaves += 1;
        match ancestor_chain(&nodes, leaf_id, hierarchy) {
            Ok(chain) => chains.push(chain),
            Err(reason) => {
                stats.skipped += 1;
                warn!("Skipping location {} in snapshot: {}", leaf_id, reason);
            }
        }
    }

    let depth = hierarchy.leaf_level() as usize;
    // level -> prefix row, deduplicated by the prefix ids
    let mut rows: BTreeMap<(u8, Vec<String>), Vec<Ancestor>> = BTreeMap::new();
    for chain in &chains {
        for level in 1..=depth {
            let mut row: Vec<Ancestor> = chain[..level].to_vec();
            row.resize(depth, Ancestor::all());
            let key: Vec<String> = chain[..level].iter().map(|a| a.id.clone()).collect();
            rows.entry((level as u8, key)).or_insert(row);
        }
    }
    stats.rows = rows.len();

    let table = Ident::table(hierarchy.snapshot_table())?;
    let mut columns = Vec::new();
    for level in hierarchy.levels() {
        for suffix in ["id", "name", "site_code", "is_test"] {
            columns.push(format!("{}_{}", level, suffix));
        }
    }
    columns.push("aggregation_level".to_owned());
    let column_list = PartitionManager::quoted_list(columns.iter().map(String::as_str))?;
    let placeholders = Sql::composed(vec!["?"; columns.len()].join(", "));
    let insert = Sql::render(
        "INSERT INTO {table} ({columns}) VALUES ({values})",
        &[
            ("table", Sql::ident(&table)),
            ("columns", column_list),
            ("values", placeholders),
        ],
    )?;
    let delete = Sql::render("DELETE FROM {table}", &[("table", Sql::ident(&table))])?;

    Database::immediate_transaction(conn, |conn| {
        conn.execute(delete.as_str(), [])?;
        let mut stmt = conn.prepare(insert.as_str())?;
        for ((level, _), row) in &rows {
            let mut values: Vec<Value> = Vec::with_capacity(columns.len());
            for a in row {
                values.push(Value::Text(a.id.clone()));
                values.push(Value::Text(a.name.clone()));
                values.push(Value::Text(a.site_code.clone()));
                values.push(Value::Integer(a.is_test as i64));
            }
            values.push(Value::Integer(*level as i64));
            stmt.execute(params_from_iter(values))?;
        }
        Ok(())
    })?;

    info!(
        "Location snapshot {} rebuilt for {}: {} leaves, {} skipped, {} rows",
        hierarchy.snapshot_table(),
        domain,
        stats.leaves,
        stats.skipped,
        stats.rows
    );
    Ok(stats)
}

/// Non-test states present in the snapshot.
pub fn state_ids_from_snapshot(
    conn: &Connection,
    hierarchy: Hierarchy,
) -> Result<Vec<String>, AggError> {
    let table = Ident::table(hierarchy.snapshot_table())?;
    let sql = Sql::render(
        "SELECT DISTINCT state_id FROM {table}
         WHERE aggregation_level = 1 AND state_is_test = 0
         ORDER BY state_id",
        &[("table", Sql::ident(&table))],
    )?;
    collect_strings(conn, sql.as_str(), &[])
}

/// Non-test states in the live tree, for when no snapshot has been built yet.
pub fn state_ids_from_tree(conn: &Connection, domain: &str) -> Result<Vec<String>, AggError> {
    collect_strings(
        conn,
        "SELECT location_id FROM locations
         WHERE domain = ? AND location_type = 'state' AND is_test = 0
         ORDER BY location_id",
        &[domain],
    )
}

fn collect_strings(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<String>, AggError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn load_tree(conn: &Connection, domain: &str) -> Result<HashMap<String, LocationNode>, AggError> {
    let mut stmt = conn.prepare(
        "SELECT location_id, name, site_code, location_type, parent_id, is_test
         FROM locations WHERE domain = ?",
    )?;
    let rows = stmt.query_map([domain], |row| {
        Ok((
            row.get::<_, String>(0)?,
            LocationNode {
                name: row.get(1)?,
                site_code: row.get(2)?,
                location_type: row.get(3)?,
                parent_id: row.get(4)?,
                is_test: row.get::<_, i64>(5)? != 0,
            },
        ))
    })?;
    let mut nodes = HashMap::new();
    for row in rows {
        let (id, node) = row?;
        nodes.insert(id, node);
    }
    Ok(nodes)
}

/// Ancestors of `leaf_id` ordered from the root down, with test flags inherited downward.
fn ancestor_chain(
    nodes: &HashMap<String, LocationNode>,
    leaf_id: &str,
    hierarchy: Hierarchy,
) -> Result<Vec<Ancestor>, String> {
    let levels = hierarchy.levels();
    let mut chain = Vec::with_capacity(levels.len());
    let mut current = Some(leaf_id.to_owned());

    for expected in levels.iter().rev() {
        let id = current
            .take()
            .ok_or_else(|| format!("missing {} ancestor", expected))?;
        let node = nodes
            .get(&id)
            .ok_or_else(|| format!("ancestor {} does not exist", id))?;
        if node.location_type != *expected {
            return Err(format!(
                "ancestor {} has type '{}', expected '{}'",
                id, node.location_type, expected
            ));
        }
        chain.push((id, node));
        current = node.parent_id.clone();
    }
    if let Some(extra) = current {
        return Err(format!("state has unexpected parent {}", extra));
    }

    chain.reverse();
    let mut inherited_test = false;
    Ok(chain
        .into_iter()
        .map(|(id, node)| {
            inherited_test = inherited_test || node.is_test;
            Ancestor {
                id,
                name: node.name.clone(),
                site_code: node.site_code.clone(),
                is_test: inherited_test,
            }
        })
        .collect())
}
