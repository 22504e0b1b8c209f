//! Identifier validation and SQL template rendering.
//!
//! Table and column names are never spliced into statements as raw strings. They pass
//! through [`Ident`], which checks them against the set of tables this crate owns or reads,
//! and are always emitted double-quoted. Values are bound as statement parameters.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use rusqlite::{types::ToSql, Connection};

use crate::error::AggError;

/// Per-state form partitions embed a full state id and a date in the name.
pub const MAX_IDENT_LEN: usize = 128;

/// Every table the pipeline reads or writes, plus every parent whose partitions it creates.
static KNOWN_TABLES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut set: HashSet<&'static str> = [
        // control plane
        "aggregation_record",
        "aggregation_stage",
        "partition_registry",
        "ucr_reconciliation_status",
        // location source and snapshots
        "locations",
        "awc_location",
        "village_location",
        // case snapshots
        "ucr_child_health_cases",
        "ucr_ccs_record_cases",
        "ucr_household_cases",
        "ucr_person_cases",
        // monthly facts and rollups
        "child_health_monthly",
        "ccs_record_monthly",
        "agg_child_health",
        "agg_ccs_record",
        "agg_awc",
        "agg_ls",
    ]
    .into_iter()
    .collect();
    for spec in crate::forms::FormKind::specs() {
        set.insert(spec.source_table);
        set.insert(spec.target_table);
    }
    set
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// A column or alias name. Only the character set is checked.
    pub fn new(name: &str) -> Result<Self, AggError> {
        Self::check_chars(name)?;
        Ok(Ident(name.to_owned()))
    }

    /// A table the pipeline knows by name.
    pub fn table(name: &str) -> Result<Self, AggError> {
        Self::check_chars(name)?;
        if !KNOWN_TABLES.contains(name) {
            return Err(AggError::InvalidIdentifier(format!(
                "'{}' is not a known table",
                name
            )));
        }
        Ok(Ident(name.to_owned()))
    }

    /// A partition of a known parent: `<parent>_<suffix>`. The suffix may carry state ids
    /// and dates, so it gets the same character check as any identifier.
    pub fn partition(parent: &str, suffix: &str) -> Result<Self, AggError> {
        let parent = Self::table(parent)?;
        let name = format!("{}_{}", parent.0, suffix);
        Self::check_chars(&name)?;
        Ok(Ident(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    fn check_chars(name: &str) -> Result<(), AggError> {
        if name.is_empty() {
            return Err(AggError::InvalidIdentifier("empty identifier".into()));
        }
        if name.len() > MAX_IDENT_LEN {
            return Err(AggError::InvalidIdentifier(format!(
                "'{}' is longer than {} bytes",
                name, MAX_IDENT_LEN
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(AggError::InvalidIdentifier(format!(
                "'{}' contains characters outside [A-Za-z0-9_-]",
                name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A SQL fragment assembled only from static text, validated identifiers, integers and
/// other fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sql(String);

impl Sql {
    pub fn text(s: &'static str) -> Self {
        Sql(s.to_owned())
    }

    pub fn ident(ident: &Ident) -> Self {
        Sql(ident.quoted())
    }

    pub fn int(value: i64) -> Self {
        Sql(value.to_string())
    }

    pub fn join<I>(parts: I, sep: &'static str) -> Self
    where
        I: IntoIterator<Item = Sql>,
    {
        Sql(parts
            .into_iter()
            .map(|p| p.0)
            .collect::<Vec<_>>()
            .join(sep))
    }

    /// Renders a template whose `{name}` placeholders are all bound to fragments.
    pub fn render(template: &'static str, bindings: &[(&str, Sql)]) -> Result<Self, AggError> {
        let mut out = String::with_capacity(template.len() * 2);
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                AggError::Error(format!("unterminated placeholder in template: {}", template))
            })?;
            let key = &after[..end];
            let value = bindings
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, sql)| sql.0.as_str())
                .ok_or_else(|| {
                    AggError::Error(format!("unbound placeholder {{{}}} in template", key))
                })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(Sql(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Only for expressions built from `&'static str` pieces and validated identifiers.
    pub(crate) fn composed(s: String) -> Self {
        Sql(s)
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Executes a single statement, binding only the named parameters it references.
/// Shared parameter sets can then be passed to every statement of a helper.
pub fn execute_named(
    conn: &Connection,
    sql: &Sql,
    params: &[(&str, &dyn ToSql)],
) -> Result<usize, AggError> {
    let mut stmt = conn.prepare(sql.as_str())?;
    for (name, value) in params {
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }
    Ok(stmt.raw_execute()?)
}

/// First column of the first row as an integer, 0 when the query returns nothing.
pub fn query_count(
    conn: &Connection,
    sql: &Sql,
    params: &[(&str, &dyn ToSql)],
) -> Result<i64, AggError> {
    let mut stmt = conn.prepare(sql.as_str())?;
    for (name, value) in params {
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(row.get::<_, Option<i64>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

/// Rows as `(column, value)` pairs in column order. Used by reconciliation tooling and tests.
pub fn query_rows(
    conn: &Connection,
    sql: &Sql,
    params: &[(&str, &dyn ToSql)],
) -> Result<Vec<Vec<(String, rusqlite::types::Value)>>, AggError> {
    let mut stmt = conn.prepare(sql.as_str())?;
    for (name, value) in params {
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            values.push((name.clone(), row.get::<_, rusqlite::types::Value>(i)?));
        }
        out.push(values);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_table_accepted() {
        let ident = Ident::table("agg_awc").unwrap();
        assert_eq!(ident.quoted(), "\"agg_awc\"");
        assert!(Ident::table("icds_dashboard_growth_monitoring_forms").is_ok());
    }

    #[test]
    fn test_unknown_table_rejected() {
        assert!(matches!(
            Ident::table("pg_catalog"),
            Err(AggError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_partition_name_allows_dates() {
        let ident = Ident::partition("agg_awc", "2019-01-01_5").unwrap();
        assert_eq!(ident.as_str(), "agg_awc_2019-01-01_5");
    }

    #[test]
    fn test_partition_rejects_injection() {
        assert!(Ident::partition("agg_awc", "x\"; DROP TABLE locations; --").is_err());
        assert!(Ident::partition("not_a_table", "2019-01-01").is_err());
    }

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let t = Ident::table("agg_awc").unwrap();
        let sql = Sql::render(
            "SELECT {cols} FROM {t} WHERE aggregation_level = {level}",
            &[
                ("t", Sql::ident(&t)),
                ("cols", Sql::join([Sql::text("a"), Sql::text("b")], ", ")),
                ("level", Sql::int(3)),
            ],
        )
        .unwrap();
        assert_eq!(
            sql.as_str(),
            "SELECT a, b FROM \"agg_awc\" WHERE aggregation_level = 3"
        );
    }

    #[test]
    fn test_render_fails_on_unbound_placeholder() {
        let result = Sql::render("SELECT * FROM {t}", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_execute_named_skips_unused_params() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT, b TEXT)").unwrap();
        let month = "2019-01-01".to_string();
        let state = "st1".to_string();
        let n = execute_named(
            &conn,
            &Sql::text("INSERT INTO t (a) VALUES (:month)"),
            &[(":month", &month), (":state_id", &state)],
        )
        .unwrap();
        assert_eq!(n, 1);

        let rows = query_rows(&conn, &Sql::text("SELECT a, b FROM t"), &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].0, "a");
        assert_eq!(
            rows[0][0].1,
            rusqlite::types::Value::Text("2019-01-01".into())
        );
        assert_eq!(rows[0][1].1, rusqlite::types::Value::Null);
    }

    proptest! {
        #[test]
        fn prop_accepted_identifiers_are_safe(name in "\\PC{0,160}") {
            if let Ok(ident) = Ident::new(&name) {
                prop_assert!(!ident.as_str().contains('"'));
                prop_assert!(!ident.as_str().contains(' '));
                prop_assert!(!ident.as_str().contains(';'));
                prop_assert!(ident.as_str().len() <= MAX_IDENT_LEN);
            }
        }

        #[test]
        fn prop_state_ids_from_charset_form_partitions(state in "[a-f0-9]{32}") {
            let ident = Ident::partition(
                "icds_dashboard_growth_monitoring_forms",
                &format!("{}_2019-01-01", state),
            );
            prop_assert!(ident.is_ok());
        }
    }
}
