//! Named statement parameters.
//!
//! Statements reference values as `@name`. [`expand_named`] replaces each
//! placeholder with a literal rendered by the dialect, leaving quoted
//! strings and quoted identifiers untouched.

use std::collections::BTreeMap;

use crate::dialect::Dialect;
use crate::executor::ExecError;
use crate::value::{SqlValue, ToSqlValue};

/// A set of named parameter values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, SqlValue>,
}

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl ToSqlValue) {
        self.values.insert(name.into(), value.to_sql_value());
    }

    /// Sets a parameter and returns the set.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl ToSqlValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replaces every `@name` placeholder in `sql` with the dialect literal of
/// the bound value.
///
/// # Errors
///
/// Returns [`ExecError::UnboundParameter`] when a placeholder has no value.
pub fn expand_named<D: Dialect + ?Sized>(
    sql: &str,
    params: &Params,
    dialect: &D,
) -> Result<String, ExecError> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                // A doubled quote is an escaped quote and keeps the region open.
                if chars.peek().map(|&(_, n)| n) == Some(q) {
                    out.push(q);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '@' => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, n)) = chars.peek() {
                    if !is_name_char(n) {
                        break;
                    }
                    end = j + n.len_utf8();
                    chars.next();
                }
                if end == start {
                    out.push('@');
                    continue;
                }
                let name = &sql[start..end];
                let value = params
                    .get(name)
                    .ok_or_else(|| ExecError::UnboundParameter(name.to_string()))?;
                out.push_str(&dialect.render_literal(value));
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::dialect::{MySqlDialect, SqliteDialect};

    #[test]
    fn values_render_as_literals() {
        let ts = NaiveDate::from_ymd_opt(2017, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 7)
            .unwrap();
        let params = Params::new()
            .with("name", "O'Brien")
            .with("age", 42_i32)
            .with("ok", true)
            .with("at", ts)
            .with("gone", None::<String>);
        let sql = expand_named(
            "INSERT INTO t VALUES (@name, @age, @ok, @at, @gone)",
            &params,
            &SqliteDialect,
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO t VALUES ('O''Brien', 42, 1, '2017-03-04 05:06:07', NULL)"
        );

        let sql = expand_named("SELECT @at", &params, &MySqlDialect).unwrap();
        assert_eq!(sql, "SELECT CAST('2017-03-04 05:06:07' AS DATETIME)");
    }

    #[test]
    fn quoted_regions_are_left_alone() {
        let params = Params::new().with("id", 7_i64);
        let sql = expand_named(
            "SELECT '@id', 'it''s @id', \"@id\" FROM t WHERE id = @id",
            &params,
            &SqliteDialect,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT '@id', 'it''s @id', \"@id\" FROM t WHERE id = 7"
        );
    }

    #[test]
    fn unbound_placeholder_is_an_error() {
        let err = expand_named("SELECT @missing", &Params::new(), &SqliteDialect).unwrap_err();
        assert!(matches!(err, ExecError::UnboundParameter(name) if name == "missing"));
    }

    #[test]
    fn bare_at_sign_is_kept() {
        let sql = expand_named("SELECT 'a' || @", &Params::new(), &SqliteDialect).unwrap();
        assert_eq!(sql, "SELECT 'a' || @");
    }

    #[test]
    fn params_collect_from_pairs() {
        let params: Params = vec![("b", SqlValue::Int(2)), ("a", SqlValue::Int(1))]
            .into_iter()
            .collect();
        let names: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(params.len(), 2);
    }
}
