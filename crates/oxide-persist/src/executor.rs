//! Query execution capability.
//!
//! The mapping layer never talks to a driver directly. It consumes a
//! [`QueryExecutor`], which runs statements with named [`Params`] and
//! returns a [`Rowset`] or an [`ExecResult`].

use serde::Serialize;

use crate::params::Params;
use crate::value::SqlValue;

/// Boxed driver error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by an executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The connection could not be opened or was lost.
    #[error("Connection error: {0}")]
    Connection(#[source] BoxError),

    /// The database rejected the statement.
    #[error("Statement error: {0}")]
    Statement(#[source] BoxError),

    /// A placeholder had no bound value.
    #[error("No value bound for parameter '@{0}'")]
    UnboundParameter(String),

    /// A statement was issued on a transaction that already ended.
    #[error("Invalid transaction state: {0}")]
    TransactionState(&'static str),
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Number of rows changed.
    pub rows_affected: u64,
    /// Key generated by the last insert, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// A tabular result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rowset {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Row values, one entry per column.
    pub rows: Vec<Vec<SqlValue>>,
}

impl Rowset {
    /// Creates a result set.
    #[must_use]
    pub const fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// Returns `true` when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Finds a column position, ignoring ASCII case.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Iterates over the rows.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef { set: self, values })
    }

    /// Returns the first row.
    #[must_use]
    pub fn first(&self) -> Option<RowRef<'_>> {
        self.rows().next()
    }
}

/// A borrowed row of a [`Rowset`].
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    set: &'a Rowset,
    values: &'a [SqlValue],
}

impl<'a> RowRef<'a> {
    /// Returns the value of a column by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a SqlValue> {
        self.set.column_index(name).and_then(|i| self.values.get(i))
    }

    /// Returns a column value as text, if it is text.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&'a str> {
        match self.get(name)? {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns a column value as an integer, if it holds one.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a SqlValue)> {
        self.set
            .columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Runs statements against a database.
#[allow(async_fn_in_trait)]
pub trait QueryExecutor {
    /// Runs a statement and returns its rows.
    async fn query(&self, sql: &str, params: &Params) -> Result<Rowset, ExecError>;

    /// Runs a statement that returns no rows.
    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecResult, ExecError>;

    /// Runs a statement and returns the first column of the first row.
    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<SqlValue>, ExecError> {
        let rows = self.query(sql, params).await?;
        Ok(rows.rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }
}

/// An executor that can open transactions.
///
/// A transaction is a handle owned by whoever began it. Only statements
/// issued through the handle belong to the transaction; statements issued
/// through the executor meanwhile never join it.
#[allow(async_fn_in_trait)]
pub trait TransactionalExecutor: QueryExecutor {
    /// The handle of an open transaction.
    type Transaction<'t>: Transaction
    where
        Self: 't;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Transaction<'_>, ExecError>;
}

/// An open transaction.
///
/// Dropping the handle without committing discards its writes.
#[allow(async_fn_in_trait)]
pub trait Transaction: QueryExecutor {
    /// Commits the transaction. A failed commit is rolled back.
    async fn commit(self) -> Result<(), ExecError>;

    /// Rolls back the transaction.
    async fn rollback(self) -> Result<(), ExecError>;
}

impl<E: QueryExecutor + ?Sized> QueryExecutor for &E {
    async fn query(&self, sql: &str, params: &Params) -> Result<Rowset, ExecError> {
        (**self).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecResult, ExecError> {
        (**self).execute(sql, params).await
    }

    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<SqlValue>, ExecError> {
        (**self).scalar(sql, params).await
    }
}
