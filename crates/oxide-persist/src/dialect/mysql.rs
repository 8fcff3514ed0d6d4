//! MySQL dialect.
//!
//! MySQL changes column types in place with `MODIFY COLUMN`, so only a
//! primary-key change needs a rebuild. Identifiers are quoted with
//! backticks.

use chrono::NaiveDateTime;

use super::{timestamp_text, Dialect};
use crate::executor::{RowRef, Rowset};
use crate::introspect::{ColumnFact, IndexFact};
use crate::model::{FieldDefinition, LogicalType, TableDefinition};

/// MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn after_clause(table: &TableDefinition, index: usize) -> String {
        index
            .checked_sub(1)
            .map(|prev| format!(" AFTER {}", table.fields()[prev].quoted_name))
            .unwrap_or_default()
    }
}

/// Splits a column type into its base name, `(…)` size and unsigned flag.
fn parse_type(type_name: &str) -> (String, Option<i32>, bool) {
    let lower = type_name.trim().to_ascii_lowercase();
    let base_end = lower
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(lower.len());
    let base = lower[..base_end].to_string();
    let size = lower[base_end..]
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
        .and_then(|n| n.trim().parse().ok());
    let unsigned = lower.split_whitespace().any(|w| w == "unsigned");
    (base, size, unsigned)
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn type_name(&self, field: &FieldDefinition) -> String {
        match field.logical_type {
            LogicalType::Text => return format!("varchar({})", field.size),
            LogicalType::Timestamp => "datetime",
            LogicalType::Bool | LogicalType::UInt8 => "tinyint unsigned",
            LogicalType::Int8 => "tinyint",
            LogicalType::Int16 => "smallint",
            LogicalType::UInt16 => "smallint unsigned",
            LogicalType::Int32 => "int",
            LogicalType::UInt32 => "int unsigned",
            LogicalType::Int64 => "bigint",
            LogicalType::UInt64 => "bigint unsigned",
            LogicalType::Float32 => "float",
            LogicalType::Float64 => "double",
        }
        .to_string()
    }

    fn type_matches(&self, field: &FieldDefinition, live_type: &str) -> bool {
        let (want_base, want_size, want_unsigned) = parse_type(&self.type_name(field));
        let (live_base, live_size, live_unsigned) = parse_type(live_type);
        if want_base != live_base || want_unsigned != live_unsigned {
            return false;
        }
        if want_base == "varchar" {
            return matches!((want_size, live_size), (Some(w), Some(l)) if w <= l);
        }
        true
    }

    fn supports_alter_column(&self) -> bool {
        true
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn timestamp_literal(&self, ts: &NaiveDateTime) -> String {
        format!("CAST('{}' AS DATETIME)", timestamp_text(ts))
    }

    fn insert_defaults_clause(&self) -> &'static str {
        "() VALUES ()"
    }

    fn table_exists_query(&self) -> Option<String> {
        Some(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = @table"
                .to_string(),
        )
    }

    fn describe_table_query(&self, table: &str) -> String {
        format!("DESCRIBE {}", self.quote_identifier(table))
    }

    fn column_fact(&self, row: &RowRef<'_>) -> Option<ColumnFact> {
        Some(ColumnFact {
            name: row.text("Field")?.to_string(),
            type_name: row.text("Type")?.to_string(),
            primary_key: row.text("Key").is_some_and(|k| k.eq_ignore_ascii_case("PRI")),
        })
    }

    fn list_indexes_query(&self, table: &str) -> String {
        format!("SHOW INDEXES FROM {}", self.quote_identifier(table))
    }

    fn index_facts(&self, rows: &Rowset) -> Option<Vec<IndexFact>> {
        let mut facts: Vec<IndexFact> = Vec::new();
        for row in rows.rows() {
            let name = row.text("Key_name")?;
            if name == "PRIMARY" || facts.iter().any(|f| f.name == name) {
                continue;
            }
            facts.push(IndexFact {
                name: name.to_string(),
                unique: row.int("Non_unique")? == 0,
            });
        }
        Some(facts)
    }

    fn list_tables_query(&self) -> String {
        "SELECT table_name AS name FROM information_schema.tables \
         WHERE table_schema = DATABASE() ORDER BY table_name"
            .to_string()
    }

    fn add_column_sql(&self, table: &TableDefinition, index: usize) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}{}",
            table.quoted_name(),
            self.column_definition(&table.fields()[index]),
            Self::after_clause(table, index)
        )
    }

    fn modify_column_sql(&self, table: &TableDefinition, index: usize) -> Option<String> {
        let field = &table.fields()[index];
        if field.is_primary_key {
            return None;
        }
        Some(format!(
            "ALTER TABLE {} MODIFY COLUMN {} {}{}",
            table.quoted_name(),
            field.quoted_name,
            self.type_name(field),
            Self::after_clause(table, index)
        ))
    }

    fn rename_table_sql(&self, from: &str, to: &str) -> String {
        format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        )
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(index),
            self.quote_identifier(table)
        )
    }
}
