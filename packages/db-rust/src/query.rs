//! Query parameters and in-memory tabular results.
//!
//! Parameters are JSON values. Positional parameters bind to `$1..$n` in
//! order. Named parameters use `%(name)s` placeholders, which are rewritten
//! to positional ones before the statement is sent; a name used twice binds
//! once.
//!
//! Result cells decode to JSON by column type. Date and time types become
//! ISO 8601 strings (RFC 3339 for `TIMESTAMPTZ`) and `NUMERIC` becomes its
//! decimal text, so no precision is lost to floating point.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono::SecondsFormat;
use sqlx::types::Decimal;
use sqlx::{Column, Postgres, Row, TypeInfo};

use crate::error::ConnectError;

/// Parameters for [`ConnectionFactory::query_table`](crate::ConnectionFactory::query_table).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryParams {
    /// No parameters.
    #[default]
    None,
    /// Bound to `$1`, `$2`, ... in order.
    Positional(Vec<Value>),
    /// Bound by `%(name)s` placeholder.
    ///
    /// Placeholders are only recognized in plain SQL text. Anything inside
    /// `'...'`, `E'...'`, `$tag$...$tag$`, `"..."`, `-- ...` or `/* ... */`
    /// is copied unchanged. Outside those, `%%` is written as a single `%`.
    /// Block comments are not treated as nested.
    Named(BTreeMap<String, Value>),
}

impl From<Vec<Value>> for QueryParams {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<BTreeMap<String, Value>> for QueryParams {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self::Named(values)
    }
}

/// A statement ready to bind: `$n` placeholders and values in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedQuery {
    pub(crate) sql: String,
    pub(crate) values: Vec<Value>,
}

pub(crate) fn prepare(sql: &str, params: &QueryParams) -> Result<PreparedQuery, ConnectError> {
    match params {
        QueryParams::None => Ok(PreparedQuery {
            sql: sql.to_string(),
            values: Vec::new(),
        }),
        QueryParams::Positional(values) => Ok(PreparedQuery {
            sql: sql.to_string(),
            values: values.clone(),
        }),
        QueryParams::Named(named) => rewrite_named(sql, named),
    }
}

fn rewrite_named(sql: &str, named: &BTreeMap<String, Value>) -> Result<PreparedQuery, ConnectError> {
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<&str> = Vec::new();
    let mut prev: Option<char> = None;
    let mut rest = sql;

    while let Some(ch) = rest.chars().next() {
        let verbatim = opaque_len(rest, prev);
        if verbatim > 0 {
            out.push_str(&rest[..verbatim]);
            prev = rest[..verbatim].chars().next_back();
            rest = &rest[verbatim..];
            continue;
        }
        if rest.starts_with("%%") {
            out.push('%');
            prev = Some('%');
            rest = &rest[2..];
            continue;
        }
        if rest.starts_with("%(") {
            if let Some((name, consumed)) = placeholder_name(rest) {
                if !named.contains_key(name) {
                    return Err(ConnectError::MissingParameter {
                        name: name.to_string(),
                    });
                }
                let position = match order.iter().position(|n| *n == name) {
                    Some(i) => i + 1,
                    None => {
                        order.push(name);
                        order.len()
                    }
                };
                out.push('$');
                out.push_str(&position.to_string());
                prev = out.chars().next_back();
                rest = &rest[consumed..];
                continue;
            }
        }
        out.push(ch);
        prev = Some(ch);
        rest = &rest[ch.len_utf8()..];
    }

    let values = order.iter().map(|name| named[*name].clone()).collect();
    Ok(PreparedQuery { sql: out, values })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Byte length of the quoted text or comment starting `s`, or 0 if `s`
/// starts with plain SQL. Unterminated regions run to the end of `s`.
fn opaque_len(s: &str, prev: Option<char>) -> usize {
    let after_word = prev.is_some_and(is_word_char);
    match s.as_bytes() {
        [b'\'', ..] => quoted_len(s, '\'', false),
        [b'"', ..] => quoted_len(s, '"', false),
        [b'E' | b'e', b'\'', ..] if !after_word => 1 + quoted_len(&s[1..], '\'', true),
        [b'-', b'-', ..] => s.find('\n').map_or(s.len(), |i| i + 1),
        [b'/', b'*', ..] => s[2..].find("*/").map_or(s.len(), |i| i + 4),
        [b'$', ..] if !after_word => dollar_quoted_len(s),
        _ => 0,
    }
}

/// Length of a `quote`-delimited region at the start of `s`. A doubled
/// quote is part of the text; with `backslash_escapes`, so is `\<char>`.
fn quoted_len(s: &str, quote: char, backslash_escapes: bool) -> usize {
    let mut chars = s.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if backslash_escapes && c == '\\' {
            chars.next();
        } else if c == quote {
            if chars.peek().is_some_and(|&(_, next)| next == quote) {
                chars.next();
            } else {
                return i + c.len_utf8();
            }
        }
    }
    s.len()
}

/// Length of a `$tag$ ... $tag$` string at the start of `s`, or 0 if `s`
/// does not open one (for example a `$1` placeholder).
fn dollar_quoted_len(s: &str) -> usize {
    let body = &s[1..];
    let Some(tag_end) = body.find('$') else {
        return 0;
    };
    let tag = &body[..tag_end];
    let valid_tag = !tag.starts_with(|c: char| c.is_ascii_digit())
        && tag.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !valid_tag {
        return 0;
    }
    let delimiter = &s[..tag_end + 2];
    s[delimiter.len()..]
        .find(delimiter)
        .map_or(s.len(), |i| delimiter.len() + i + delimiter.len())
}

/// Parses `%(name)s` at the start of `s`, returning the name and the byte
/// length of the whole placeholder.
fn placeholder_name(s: &str) -> Option<(&str, usize)> {
    let body = s.strip_prefix("%(")?;
    let end = body.find(")s")?;
    let name = &body[..end];
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((name, 2 + end + 2))
}

/// Binds one JSON value onto `query`.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
    }
}

/// In-memory query result: ordered column names and rows of JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column named `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at `row` in column `name`.
    #[must_use]
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.column_index(name)?;
        self.rows.get(row)?.get(index)
    }

    /// All values of column `name`, top to bottom.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|r| r.get(index)).collect())
    }

    /// Rows as JSON objects keyed by column name. Later duplicate column
    /// names overwrite earlier ones.
    #[must_use]
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub(crate) fn from_rows(columns: Vec<String>, rows: &[PgRow]) -> Result<Self, ConnectError> {
        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| decode_cell(row, i)).collect())
            .collect::<Result<Vec<Vec<Value>>, ConnectError>>()?;
        Ok(Self { columns, rows })
    }
}

pub(crate) fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn decode_cell(row: &PgRow, index: usize) -> Result<Value, ConnectError> {
    let column = row.column(index);
    let type_name = column.type_info().name();

    let decoded = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(Value::Bool)),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(Value::from)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(Value::from)),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.and_then(|f| float_value(f64::from(f)))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map(|v| v.and_then(float_value)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .map(|v| v.map(Value::String)),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index),
        "UUID" => row
            .try_get::<Option<sqlx::types::Uuid>, _>(index)
            .map(|v| v.map(|u| Value::String(u.to_string()))),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(index)
            .map(|v| v.map(|d| Value::String(d.to_string()))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(timestamptz_value)),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(timestamp_value)),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(|d| Value::String(d.to_string()))),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)
            .map(|v| v.map(|t| Value::String(t.to_string()))),
        other => {
            return Err(ConnectError::UnsupportedColumn {
                column: column.name().to_string(),
                type_name: other.to_string(),
            })
        }
    };

    decoded
        .map(|v| v.unwrap_or(Value::Null))
        .map_err(ConnectError::Query)
}

fn timestamptz_value(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn timestamp_value(ts: NaiveDateTime) -> Value {
    Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// NaN and infinities have no JSON form; they decode as null.
fn float_value(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn named(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn none_and_positional_pass_sql_through() {
        let p = prepare("SELECT 1", &QueryParams::None).unwrap();
        assert_eq!(p.sql, "SELECT 1");
        assert!(p.values.is_empty());

        let p = prepare(
            "SELECT * FROM orders WHERE id = $1",
            &QueryParams::Positional(vec![json!(7)]),
        )
        .unwrap();
        assert_eq!(p.sql, "SELECT * FROM orders WHERE id = $1");
        assert_eq!(p.values, vec![json!(7)]);
    }

    #[test]
    fn named_placeholders_become_positional() {
        let params = QueryParams::from(named(&[("status", json!("completed"))]));
        let p = prepare("SELECT * FROM orders WHERE status = %(status)s", &params).unwrap();
        assert_eq!(p.sql, "SELECT * FROM orders WHERE status = $1");
        assert_eq!(p.values, vec![json!("completed")]);
    }

    #[test]
    fn named_placeholders_number_in_first_use_order() {
        let params = QueryParams::from(named(&[("a", json!(1)), ("b", json!(2))]));
        let p = prepare("SELECT %(b)s, %(a)s, %(b)s", &params).unwrap();
        assert_eq!(p.sql, "SELECT $1, $2, $1");
        assert_eq!(p.values, vec![json!(2), json!(1)]);
    }

    #[test]
    fn placeholders_inside_literals_are_untouched() {
        let params = QueryParams::from(named(&[("x", json!(1))]));
        let p = prepare("SELECT '%(x)s', %(x)s, 'it''s %(x)s'", &params).unwrap();
        assert_eq!(p.sql, "SELECT '%(x)s', $1, 'it''s %(x)s'");
        assert_eq!(p.values.len(), 1);
    }

    #[test]
    fn quotes_in_comments_and_identifiers_do_not_hide_placeholders() {
        let params = QueryParams::from(named(&[("a", json!(1)), ("b", json!(2))]));

        let p = prepare("SELECT %(a)s -- don't\n, %(b)s", &params).unwrap();
        assert_eq!(p.sql, "SELECT $1 -- don't\n, $2");

        let p = prepare("SELECT 1 AS \"it's\", %(a)s AS \"%(b)s\"", &params).unwrap();
        assert_eq!(p.sql, "SELECT 1 AS \"it's\", $1 AS \"%(b)s\"");
        assert_eq!(p.values, vec![json!(1)]);

        let p = prepare("/* it's %(b)s */ SELECT %(a)s", &params).unwrap();
        assert_eq!(p.sql, "/* it's %(b)s */ SELECT $1");
    }

    #[test]
    fn escape_and_dollar_quoted_strings_are_opaque() {
        let params = QueryParams::from(named(&[("a", json!(1))]));

        let p = prepare(r"SELECT E'\'%(a)s', %(a)s", &params).unwrap();
        assert_eq!(p.sql, r"SELECT E'\'%(a)s', $1");

        let p = prepare("SELECT $$it's %(a)s$$, $x$%(a)s$x$, %(a)s", &params).unwrap();
        assert_eq!(p.sql, "SELECT $$it's %(a)s$$, $x$%(a)s$x$, $1");
    }

    #[test]
    fn positional_markers_are_not_dollar_quotes() {
        let params = QueryParams::from(named(&[("a", json!(1)), ("b", json!(2))]));
        let p = prepare("SELECT %(a)s, %(b)s, $$x$$", &params).unwrap();
        assert_eq!(p.sql, "SELECT $1, $2, $$x$$");
    }

    #[test]
    fn double_percent_is_a_literal_percent() {
        let params = QueryParams::from(named(&[("a", json!(7))]));
        let p = prepare("SELECT %(a)s %% 2, 'a%%'", &params).unwrap();
        assert_eq!(p.sql, "SELECT $1 % 2, 'a%%'");
    }

    #[test]
    fn unterminated_quote_swallows_rest() {
        let params = QueryParams::from(named(&[("a", json!(1))]));
        let p = prepare("SELECT 'oops %(a)s", &params).unwrap();
        assert_eq!(p.sql, "SELECT 'oops %(a)s");
        assert!(p.values.is_empty());
    }

    #[test]
    fn unknown_name_is_missing_parameter() {
        let params = QueryParams::from(named(&[("a", json!(1))]));
        let err = prepare("SELECT %(nope)s", &params).unwrap_err();
        assert!(matches!(err, ConnectError::MissingParameter { ref name } if name == "nope"));
    }

    #[test]
    fn malformed_placeholders_are_left_alone() {
        let params = QueryParams::from(named(&[]));
        let p = prepare("SELECT 5 %( x, '%' || %()s", &params).unwrap();
        assert_eq!(p.sql, "SELECT 5 %( x, '%' || %()s");
        assert!(p.values.is_empty());
    }

    #[test]
    fn non_ascii_sql_survives_rewrite() {
        let params = QueryParams::from(named(&[("n", json!("ü"))]));
        let p = prepare("SELECT 'größe', %(n)s AS näme", &params).unwrap();
        assert_eq!(p.sql, "SELECT 'größe', $1 AS näme");
    }

    #[test]
    fn table_accessors() {
        let table = Table {
            columns: vec!["id".into(), "status".into()],
            rows: vec![
                vec![json!(1), json!("open")],
                vec![json!(2), json!("closed")],
            ],
        };
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
        assert_eq!(table.column_index("status"), Some(1));
        assert_eq!(table.get(1, "status"), Some(&json!("closed")));
        assert_eq!(table.get(5, "status"), None);
        assert_eq!(table.column("id"), Some(vec![&json!(1), &json!(2)]));
        assert!(table.column("missing").is_none());

        let records = table.to_records();
        assert_eq!(records[0]["status"], json!("open"));
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn table_serializes_columns_and_rows() {
        let table = Table {
            columns: vec!["n".into()],
            rows: vec![vec![json!(null)]],
        };
        assert_eq!(
            serde_json::to_value(&table).unwrap(),
            json!({"columns": ["n"], "rows": [[null]]})
        );
    }

    #[test]
    fn timestamps_render_as_iso_8601() {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(14, 5, 7, 250_000)
            .unwrap();
        assert_eq!(timestamp_value(naive), json!("2024-03-09T14:05:07.250"));
        assert_eq!(
            timestamptz_value(naive.and_utc()),
            json!("2024-03-09T14:05:07.250Z")
        );

        let whole = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(timestamp_value(whole), json!("2024-03-09T00:00:00"));
        assert_eq!(timestamptz_value(whole.and_utc()), json!("2024-03-09T00:00:00Z"));
    }

    #[test]
    fn float_value_maps_non_finite_to_none() {
        assert_eq!(float_value(1.5), Some(json!(1.5)));
        assert_eq!(float_value(f64::NAN), None);
        assert_eq!(float_value(f64::INFINITY), None);
    }

    mod proptest_rewrite {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every placeholder outside literals is replaced and each
            /// distinct name binds exactly once.
            #[test]
            fn rewrite_binds_each_name_once(names in prop::collection::vec("[a-c]", 1..8)) {
                let sql = names
                    .iter()
                    .map(|n| format!("%({n})s"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let params: BTreeMap<String, Value> = names
                    .iter()
                    .map(|n| (n.clone(), json!(n)))
                    .collect();

                let p = prepare(&sql, &QueryParams::Named(params.clone())).unwrap();
                prop_assert!(!p.sql.contains("%("));
                prop_assert_eq!(p.values.len(), params.len());
            }
        }
    }
}
