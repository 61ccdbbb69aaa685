//! Query compatibility shim.
//!
//! The item operations are written once, in the embedded store's query
//! vocabulary: `?` positional placeholders, `:name` named placeholders, and
//! an occasional probe of the embedded catalog. This module adapts that
//! vocabulary to the PostgreSQL driver (`$n` placeholders, typed params)
//! and wraps result rows so downstream code needs no backend branching.

use postgres_types::{ToSql, Type};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Dynamic SQL value crossing the shim in either direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(n) => Some(*n),
            SqlValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Borrow as a driver parameter. Values pass through unchanged.
    fn as_pg(&self) -> &(dyn ToSql + Sync) {
        const NULL: Option<&str> = None;
        match self {
            SqlValue::Null => &NULL,
            SqlValue::Integer(v) => v,
            SqlValue::Real(v) => v,
            SqlValue::Text(v) => v,
            SqlValue::Bool(v) => v,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

/// Parameters in the embedded store's conventions.
#[derive(Debug, Clone)]
pub enum SqlParams {
    None,
    Positional(Vec<SqlValue>),
    Named(Vec<(String, SqlValue)>),
}

/// The embedded store's catalog probe for the optional search index. The
/// relational backend has no equivalent object; the correct semantics are
/// "feature absent", so the probe short-circuits to no rows.
pub fn is_search_index_probe(sql: &str) -> bool {
    sql.contains("sqlite_master") && sql.contains("media_items_fts")
}

/// Rewrite `?` placeholders to `$1..$n`. Quoted literals are untouched.
fn adapt_positional(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    let mut in_literal = false;

    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

/// Rewrite `:name` placeholders to `$n`, numbering names by first
/// appearance. `::` casts and quoted literals are untouched. Returns the
/// rewritten SQL and the bind order.
fn adapt_named(sql: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut order: Vec<String> = Vec::new();
    let mut in_literal = false;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ':' && !in_literal {
            // A `::` cast is not a placeholder.
            if chars.get(i + 1) == Some(&':') {
                out.push_str("::");
                i += 2;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < chars.len()
                && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
            {
                end += 1;
            }
            let is_ident_start = chars
                .get(start)
                .map(|c| c.is_ascii_alphabetic() || *c == '_')
                .unwrap_or(false);
            if is_ident_start {
                let name: String = chars[start..end].iter().collect();
                let idx = match order.iter().position(|n| n == &name) {
                    Some(pos) => pos + 1,
                    None => {
                        order.push(name);
                        order.len()
                    }
                };
                out.push('$');
                out.push_str(&idx.to_string());
                i = end;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    (out, order)
}

/// Adapt a statement plus parameters to the driver's conventions.
fn adapt(sql: &str, params: SqlParams) -> Result<(String, Vec<SqlValue>)> {
    match params {
        SqlParams::None => Ok((sql.to_string(), Vec::new())),
        SqlParams::Positional(values) => Ok((adapt_positional(sql), values)),
        SqlParams::Named(pairs) => {
            let (adapted, order) = adapt_named(sql);
            let mut values = Vec::with_capacity(order.len());
            for name in &order {
                let value = pairs
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        StoreError::Internal(format!("missing bind parameter :{name}"))
                    })?;
                values.push(value);
            }
            Ok((adapted, values))
        }
    }
}

/// Result row with positional and name-keyed access, mirroring the
/// embedded driver's row contract.
#[derive(Debug, Clone)]
pub struct CompatRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl CompatRow {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    pub fn get_named(&self, name: &str) -> Option<&SqlValue> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get_named(name)?.as_text().map(|s| s.to_string())
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get_named(name)?.as_integer()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn from_driver(row: &tokio_postgres::Row) -> Self {
        let columns = row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let values = (0..row.len()).map(|i| decode_value(row, i)).collect();
        Self { columns, values }
    }
}

fn decode_value(row: &tokio_postgres::Row, idx: usize) -> SqlValue {
    let ty = row.columns()[idx].type_();

    if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        return row
            .get::<_, Option<String>>(idx)
            .map_or(SqlValue::Null, SqlValue::Text);
    }
    if *ty == Type::INT2 {
        return row
            .get::<_, Option<i16>>(idx)
            .map_or(SqlValue::Null, |v| SqlValue::Integer(v as i64));
    }
    if *ty == Type::INT4 {
        return row
            .get::<_, Option<i32>>(idx)
            .map_or(SqlValue::Null, |v| SqlValue::Integer(v as i64));
    }
    if *ty == Type::INT8 {
        return row
            .get::<_, Option<i64>>(idx)
            .map_or(SqlValue::Null, SqlValue::Integer);
    }
    if *ty == Type::FLOAT4 {
        return row
            .get::<_, Option<f32>>(idx)
            .map_or(SqlValue::Null, |v| SqlValue::Real(v as f64));
    }
    if *ty == Type::FLOAT8 {
        return row
            .get::<_, Option<f64>>(idx)
            .map_or(SqlValue::Null, SqlValue::Real);
    }
    if *ty == Type::BOOL {
        return row
            .get::<_, Option<bool>>(idx)
            .map_or(SqlValue::Null, SqlValue::Bool);
    }
    if *ty == Type::JSON || *ty == Type::JSONB {
        return row
            .get::<_, Option<serde_json::Value>>(idx)
            .map_or(SqlValue::Null, |v| SqlValue::Text(v.to_string()));
    }
    if *ty == Type::TIMESTAMPTZ {
        return row
            .get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map_or(SqlValue::Null, |v| {
                SqlValue::Text(v.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            });
    }

    debug!(column = row.columns()[idx].name(), ty = %ty, "unmapped column type");
    SqlValue::Null
}

/// Tenant-scoped client speaking the embedded store's query vocabulary.
pub struct CompatClient {
    client: deadpool_postgres::Object,
}

impl CompatClient {
    pub fn new(client: deadpool_postgres::Object) -> Self {
        Self { client }
    }

    pub async fn query(&self, sql: &str, params: SqlParams) -> Result<Vec<CompatRow>> {
        if is_search_index_probe(sql) {
            return Ok(Vec::new());
        }
        let (adapted, values) = adapt(sql, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v.as_pg()).collect();
        let rows = self.client.query(adapted.as_str(), &refs).await?;
        Ok(rows.iter().map(CompatRow::from_driver).collect())
    }

    pub async fn query_opt(&self, sql: &str, params: SqlParams) -> Result<Option<CompatRow>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Execute a statement and report the affected rowcount.
    pub async fn execute(&self, sql: &str, params: SqlParams) -> Result<u64> {
        if is_search_index_probe(sql) {
            return Ok(0);
        }
        let (adapted, values) = adapt(sql, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v.as_pg()).collect();
        Ok(self.client.execute(adapted.as_str(), &refs).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_rewrite() {
        assert_eq!(
            adapt_positional("SELECT v FROM t WHERE id=? LIMIT ? OFFSET ?"),
            "SELECT v FROM t WHERE id=$1 LIMIT $2 OFFSET $3"
        );
    }

    #[test]
    fn test_positional_rewrite_skips_literals() {
        assert_eq!(
            adapt_positional("SELECT 'what?' FROM t WHERE id=?"),
            "SELECT 'what?' FROM t WHERE id=$1"
        );
    }

    #[test]
    fn test_named_rewrite_numbers_by_first_appearance() {
        let (sql, order) =
            adapt_named("UPDATE t SET a=:alpha, b=:beta WHERE id=:id AND a<>:alpha");
        assert_eq!(sql, "UPDATE t SET a=$1, b=$2 WHERE id=$3 AND a<>$1");
        assert_eq!(order, vec!["alpha", "beta", "id"]);
    }

    #[test]
    fn test_named_rewrite_preserves_casts() {
        let (sql, order) = adapt_named("SELECT x::text FROM t WHERE id=:id");
        assert_eq!(sql, "SELECT x::text FROM t WHERE id=$1");
        assert_eq!(order, vec!["id"]);
    }

    #[test]
    fn test_named_rewrite_skips_literals() {
        let (sql, order) = adapt_named("SELECT ':nope' FROM t WHERE id=:id");
        assert_eq!(sql, "SELECT ':nope' FROM t WHERE id=$1");
        assert_eq!(order, vec!["id"]);
    }

    #[test]
    fn test_adapt_named_binds_in_order() {
        let (sql, values) = adapt(
            "SELECT * FROM t WHERE a=:a AND b=:b",
            SqlParams::Named(vec![
                ("b".to_string(), SqlValue::Integer(2)),
                ("a".to_string(), SqlValue::Text("one".to_string())),
            ]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a=$1 AND b=$2");
        assert_eq!(
            values,
            vec![SqlValue::Text("one".to_string()), SqlValue::Integer(2)]
        );
    }

    #[test]
    fn test_adapt_named_missing_bind_fails() {
        let err = adapt(
            "SELECT * FROM t WHERE a=:a",
            SqlParams::Named(vec![("b".to_string(), SqlValue::Integer(2))]),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));
    }

    #[test]
    fn test_search_index_probe_detection() {
        assert!(is_search_index_probe(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='media_items_fts'"
        ));
        assert!(!is_search_index_probe(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='media_items'"
        ));
        assert!(!is_search_index_probe("SELECT 1"));
    }

    #[test]
    fn test_compat_row_access_modes() {
        let row = CompatRow::new(
            vec!["id".to_string(), "v".to_string()],
            vec![SqlValue::Text("x".to_string()), SqlValue::Integer(7)],
        );

        // Positional access
        assert_eq!(row.get(0).unwrap().as_text(), Some("x"));
        assert_eq!(row.get(1).unwrap().as_integer(), Some(7));
        assert!(row.get(2).is_none());

        // Name-keyed access
        assert_eq!(row.text("id").as_deref(), Some("x"));
        assert_eq!(row.integer("v"), Some(7));
        assert!(row.get_named("missing").is_none());

        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());
    }
}
