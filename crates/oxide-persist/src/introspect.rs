//! Live schema introspection.
//!
//! [`Introspector`] runs the metadata queries of a [`Dialect`] and turns the
//! rows into a uniform [`LiveSchema`]. A failing or unreadable metadata
//! query is reported as [`PersistError::Introspection`]; it never reads as
//! an absent table.

use serde::Serialize;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::{PersistError, Result};
use crate::executor::{ExecError, QueryExecutor, Rowset};
use crate::params::Params;

/// A live column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnFact {
    /// Column name.
    pub name: String,
    /// Declared type as reported by the database.
    pub type_name: String,
    /// Column is part of the primary key.
    pub primary_key: bool,
}

/// A live index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFact {
    /// Index name.
    pub name: String,
    /// Index enforces uniqueness.
    pub unique: bool,
}

/// Columns and indexes of one live table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveSchema {
    /// Table name.
    pub table: String,
    /// Columns in table order; empty when the table does not exist.
    pub columns: Vec<ColumnFact>,
    /// Indexes on the table.
    pub indexes: Vec<IndexFact>,
}

impl LiveSchema {
    /// Returns `true` when the table does not exist.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.columns.is_empty()
    }

    /// Finds a column by exact name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnFact> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Finds an index by exact name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexFact> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Reads live table metadata through an executor.
pub struct Introspector<'a, E, D: ?Sized> {
    executor: &'a E,
    dialect: &'a D,
}

impl<'a, E: QueryExecutor, D: Dialect + ?Sized> Introspector<'a, E, D> {
    /// Creates an introspector.
    pub const fn new(executor: &'a E, dialect: &'a D) -> Self {
        Self { executor, dialect }
    }

    /// Reads the columns and indexes of a table.
    ///
    /// A missing table yields an empty [`LiveSchema`].
    pub async fn inspect(&self, table: &str) -> Result<LiveSchema> {
        let mut live = LiveSchema {
            table: table.to_string(),
            ..LiveSchema::default()
        };

        if let Some(sql) = self.dialect.table_exists_query() {
            let rows = self.run(table, &sql).await?;
            if rows.is_empty() {
                debug!(table = %table, "Table does not exist");
                return Ok(live);
            }
        }

        let sql = self.dialect.describe_table_query(table);
        let rows = self.run(table, &sql).await?;
        live.columns = rows
            .rows()
            .map(|row| self.dialect.column_fact(&row))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| unreadable(table, &sql))?;

        if !live.columns.is_empty() {
            live.indexes = self.indexes(table).await?;
        }
        Ok(live)
    }

    /// Reads the indexes of a table, excluding the primary key.
    pub async fn indexes(&self, table: &str) -> Result<Vec<IndexFact>> {
        let sql = self.dialect.list_indexes_query(table);
        let rows = self.run(table, &sql).await?;
        self.dialect
            .index_facts(&rows)
            .ok_or_else(|| unreadable(table, &sql))
    }

    /// Lists user tables.
    pub async fn tables(&self) -> Result<Vec<String>> {
        let sql = self.dialect.list_tables_query();
        let rows = self.run("*", &sql).await?;
        rows.rows()
            .map(|row| row.text("name").map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| unreadable("*", &sql))
    }

    async fn run(&self, table: &str, sql: &str) -> Result<Rowset> {
        let params = Params::new().with("table", table);
        debug!(sql = %sql, "Reading table metadata");
        self.executor
            .query(sql, &params)
            .await
            .map_err(|source| PersistError::Introspection {
                table: table.to_string(),
                sql: sql.to_string(),
                source,
            })
    }
}

fn unreadable(table: &str, sql: &str) -> PersistError {
    PersistError::Introspection {
        table: table.to_string(),
        sql: sql.to_string(),
        source: ExecError::Statement("metadata row has missing or mistyped columns".into()),
    }
}
