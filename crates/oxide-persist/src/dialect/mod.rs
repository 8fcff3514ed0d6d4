//! Backend dialects.
//!
//! The diff and migration engines are shared by every backend. A
//! [`Dialect`] supplies what differs: identifier quoting, column type names
//! and their compatibility rule, literal rendering, metadata queries and
//! DDL text.

mod mysql;
mod sqlite;

pub use mysql::MySqlDialect;
pub use sqlite::SqliteDialect;

use chrono::NaiveDateTime;

use crate::executor::{RowRef, Rowset};
use crate::introspect::{ColumnFact, IndexFact};
use crate::model::{FieldDefinition, TableDefinition};
use crate::value::{SqlValue, TIMESTAMP_FORMAT};

/// Backend-specific rules for the shared engines.
pub trait Dialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the identifier quote character.
    fn quote_char(&self) -> char {
        '"'
    }

    /// Quotes an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(q);
        for c in name.chars() {
            if c == q {
                out.push(q);
            }
            out.push(c);
        }
        out.push(q);
        out
    }

    /// Returns the column type declared for a field.
    fn type_name(&self, field: &FieldDefinition) -> String;

    /// Returns `true` when a live column type can hold the field.
    fn type_matches(&self, field: &FieldDefinition, live_type: &str) -> bool;

    /// Returns `true` when column types can be changed in place.
    fn supports_alter_column(&self) -> bool {
        false
    }

    /// Keyword appended to an auto-increment primary key.
    fn auto_increment_keyword(&self) -> &'static str;

    /// Renders a timestamp literal.
    fn timestamp_literal(&self, ts: &NaiveDateTime) -> String;

    /// Renders a value as an inline SQL literal.
    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) if f.is_finite() => format!("{f:?}"),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Timestamp(ts) => self.timestamp_literal(ts),
            SqlValue::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }

    /// Clause used by an insert that names no column.
    fn insert_defaults_clause(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// Query returning a row when the table `@table` exists.
    ///
    /// Dialects whose describe query simply returns no rows for a missing
    /// table return `None`.
    fn table_exists_query(&self) -> Option<String> {
        None
    }

    /// Query describing the columns of a table.
    fn describe_table_query(&self, table: &str) -> String;

    /// Reads one row of the describe query.
    fn column_fact(&self, row: &RowRef<'_>) -> Option<ColumnFact>;

    /// Query listing the indexes of a table.
    fn list_indexes_query(&self, table: &str) -> String;

    /// Reads the index listing. `None` when a row cannot be read.
    fn index_facts(&self, rows: &Rowset) -> Option<Vec<IndexFact>>;

    /// Query listing user tables in a `name` column.
    fn list_tables_query(&self) -> String;

    /// Renders a column definition for CREATE TABLE or ADD COLUMN.
    fn column_definition(&self, field: &FieldDefinition) -> String {
        let mut sql = format!("{} {}", field.quoted_name, self.type_name(field));
        if field.is_primary_key {
            sql.push_str(" PRIMARY KEY");
            if field.is_auto_increment {
                sql.push(' ');
                sql.push_str(self.auto_increment_keyword());
            }
        }
        sql
    }

    /// Renders CREATE TABLE for a definition.
    fn create_table_sql(&self, table: &TableDefinition) -> String {
        let columns: Vec<String> = table
            .fields()
            .iter()
            .map(|f| self.column_definition(f))
            .collect();
        format!(
            "CREATE TABLE {} ({})",
            table.quoted_name(),
            columns.join(", ")
        )
    }

    /// Renders ADD COLUMN for the field at `index`.
    fn add_column_sql(&self, table: &TableDefinition, index: usize) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            table.quoted_name(),
            self.column_definition(&table.fields()[index])
        )
    }

    /// Renders an in-place type change, when supported.
    fn modify_column_sql(&self, _table: &TableDefinition, _index: usize) -> Option<String> {
        None
    }

    /// Renders a table rename.
    fn rename_table_sql(&self, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        )
    }

    /// Renders DROP TABLE.
    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }

    /// Renders CREATE INDEX on one column.
    fn create_index_sql(&self, table: &str, index: &str, column: &str, unique: bool) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_identifier(index),
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// Renders DROP INDEX.
    fn drop_index_sql(&self, table: &str, index: &str) -> String;

    /// Renders the row copy from `source` into `target` over `columns`.
    fn copy_rows_sql(&self, target: &str, source: &str, columns: &[&str]) -> String {
        let list = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({list}) SELECT {list} FROM {}",
            self.quote_identifier(target),
            self.quote_identifier(source)
        )
    }
}

/// Formats a timestamp the way dialect literals embed it.
pub(crate) fn timestamp_text(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}
