//! SQLite dialect.
//!
//! SQLite cannot change a column type in place, so type mismatches are
//! resolved by rebuilding the table. Column types use storage classes.

use chrono::NaiveDateTime;

use super::{timestamp_text, Dialect};
use crate::executor::{RowRef, Rowset};
use crate::introspect::{ColumnFact, IndexFact};
use crate::model::{FieldDefinition, LogicalType};

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, field: &FieldDefinition) -> String {
        match field.logical_type {
            LogicalType::Text | LogicalType::Timestamp => "TEXT",
            // Values past i64::MAX are stored as their decimal text.
            LogicalType::UInt64 if !field.is_auto_increment => "TEXT",
            LogicalType::Float32 | LogicalType::Float64 => "REAL",
            // Integers and booleans share the INTEGER storage class.
            _ => "INTEGER",
        }
        .to_string()
    }

    fn type_matches(&self, field: &FieldDefinition, live_type: &str) -> bool {
        self.type_name(field).eq_ignore_ascii_case(live_type.trim())
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn timestamp_literal(&self, ts: &NaiveDateTime) -> String {
        format!("'{}'", timestamp_text(ts))
    }

    fn describe_table_query(&self, table: &str) -> String {
        format!("PRAGMA table_info({})", self.quote_identifier(table))
    }

    fn column_fact(&self, row: &RowRef<'_>) -> Option<ColumnFact> {
        Some(ColumnFact {
            name: row.text("name")?.to_string(),
            type_name: row.text("type").unwrap_or_default().to_string(),
            primary_key: row.int("pk")? > 0,
        })
    }

    fn list_indexes_query(&self, _table: &str) -> String {
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'index' AND tbl_name = @table AND sql IS NOT NULL"
            .to_string()
    }

    fn index_facts(&self, rows: &Rowset) -> Option<Vec<IndexFact>> {
        rows.rows()
            .map(|row| {
                let sql = row.text("sql")?.trim_start().to_ascii_lowercase();
                Some(IndexFact {
                    name: row.text("name")?.to_string(),
                    unique: sql.starts_with("create unique"),
                })
            })
            .collect()
    }

    fn list_tables_query(&self) -> String {
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string()
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(index))
    }
}
