//! `sqlx`-backed SQLite executor.
//!
//! Statements are expanded with [`expand_named`] and run on a
//! [`SqlitePool`]. Writes, and reads when configured, go through the gate
//! of the injected [`SerializationPolicy`]. [`SqliteExecutor::begin`]
//! returns a [`SqliteTransaction`] that holds the gate and one pooled
//! connection until it is committed or rolled back. Only statements issued
//! through that handle run in the transaction; other callers wait on the
//! gate.

use std::str::FromStr;

use oxide_persist::{
    expand_named, Dialect, ExecError, ExecResult, Params, QueryExecutor, Rowset, SqlValue,
    SqliteDialect, Transaction, TransactionalExecutor,
};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteLockingMode, SqlitePool, SqlitePoolOptions, SqliteQueryResult,
    SqliteRow,
};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::{SerializationPolicy, SqliteConfig};

/// Runs statements against a SQLite database.
pub struct SqliteExecutor {
    pool: SqlitePool,
    policy: SerializationPolicy,
    dialect: SqliteDialect,
}

impl SqliteExecutor {
    /// Opens a pool for the configured database, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Connection`] when the URL is invalid or the
    /// database cannot be opened.
    pub async fn connect(config: &SqliteConfig) -> Result<Self, ExecError> {
        Self::connect_with(config, config.policy()).await
    }

    /// Opens a pool that serializes through an existing policy.
    ///
    /// Executors opened on the same file should be given clones of one
    /// policy so they share its gate. The settle delay and read
    /// serialization of `config` are replaced by the policy's.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Connection`] when the URL is invalid or the
    /// database cannot be opened.
    pub async fn connect_with(
        config: &SqliteConfig,
        policy: SerializationPolicy,
    ) -> Result<Self, ExecError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| ExecError::Connection(Box::new(e)))?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout)
            .locking_mode(SqliteLockingMode::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| ExecError::Connection(Box::new(e)))?;

        debug!(url = %config.url, "Opened SQLite pool");
        Ok(Self::from_pool(pool, policy))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool, policy: SerializationPolicy) -> Self {
        Self {
            pool,
            policy,
            dialect: SqliteDialect,
        }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the serialization policy.
    #[must_use]
    pub const fn policy(&self) -> &SerializationPolicy {
        &self.policy
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn expand(&self, sql: &str, params: &Params) -> Result<String, ExecError> {
        let sql = expand_named(sql, params, &self.dialect)?;
        debug!(sql = %sql, dialect = self.dialect.name(), "Running statement");
        Ok(sql)
    }

    async fn settle(&self) {
        if !self.policy.settle_delay.is_zero() {
            tokio::time::sleep(self.policy.settle_delay).await;
        }
    }
}

impl QueryExecutor for SqliteExecutor {
    async fn query(&self, sql: &str, params: &Params) -> Result<Rowset, ExecError> {
        let sql = self.expand(sql, params)?;
        let _gate = if self.policy.serialize_reads {
            Some(self.policy.gate.lock().await)
        } else {
            None
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        to_rowset(&rows)
    }

    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecResult, ExecError> {
        let sql = self.expand(sql, params)?;
        let _gate = self.policy.gate.lock().await;
        let done = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        self.settle().await;
        Ok(exec_result(&sql, &done))
    }
}

impl TransactionalExecutor for SqliteExecutor {
    type Transaction<'t> = SqliteTransaction<'t>;

    async fn begin(&self) -> Result<Self::Transaction<'_>, ExecError> {
        let gate = self.policy.gate.lock().await;
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        sqlx::query("BEGIN EXCLUSIVE TRANSACTION")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        debug!("Transaction started");
        Ok(SqliteTransaction {
            executor: self,
            conn: Mutex::new(Some(conn)),
            _gate: gate,
        })
    }
}

/// An open transaction on a [`SqliteExecutor`].
///
/// Holds the executor's gate and one pooled connection. Dropping it without
/// committing rolls the transaction back.
pub struct SqliteTransaction<'a> {
    executor: &'a SqliteExecutor,
    conn: Mutex<Option<PoolConnection<Sqlite>>>,
    _gate: MutexGuard<'a, ()>,
}

impl SqliteTransaction<'_> {
    async fn finish(&self, statement: &'static str) -> Result<(), ExecError> {
        let mut conn = self.conn.lock().await;
        let Some(open) = conn.as_mut() else {
            return Err(ExecError::TransactionState("transaction already finished"));
        };
        sqlx::query(statement)
            .execute(&mut **open)
            .await
            .map_err(map_sqlx_error)?;
        // Back to the pool only once the transaction is closed.
        *conn = None;
        Ok(())
    }
}

impl QueryExecutor for SqliteTransaction<'_> {
    async fn query(&self, sql: &str, params: &Params) -> Result<Rowset, ExecError> {
        let sql = self.executor.expand(sql, params)?;
        let mut conn = self.conn.lock().await;
        let open = conn
            .as_mut()
            .ok_or(ExecError::TransactionState("transaction already finished"))?;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut **open)
            .await
            .map_err(map_sqlx_error)?;
        to_rowset(&rows)
    }

    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecResult, ExecError> {
        let sql = self.executor.expand(sql, params)?;
        let mut conn = self.conn.lock().await;
        let open = conn
            .as_mut()
            .ok_or(ExecError::TransactionState("transaction already finished"))?;
        let done = sqlx::query(&sql)
            .execute(&mut **open)
            .await
            .map_err(map_sqlx_error)?;
        Ok(exec_result(&sql, &done))
    }
}

impl Transaction for SqliteTransaction<'_> {
    async fn commit(self) -> Result<(), ExecError> {
        if let Err(err) = self.finish("COMMIT").await {
            if let Err(rollback) = self.finish("ROLLBACK").await {
                warn!(error = %rollback, "Rollback after failed commit also failed");
            }
            return Err(err);
        }
        self.executor.settle().await;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), ExecError> {
        self.finish("ROLLBACK").await?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        warn!(error = %err, "Rollback of dropped transaction failed");
                        drop(conn.detach());
                    }
                });
            }
            // Closing the connection discards the open transaction.
            Err(_) => drop(conn.detach()),
        }
    }
}

fn exec_result(sql: &str, done: &SqliteQueryResult) -> ExecResult {
    let is_insert = sql
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"));
    ExecResult {
        rows_affected: done.rows_affected(),
        last_insert_id: is_insert.then(|| done.last_insert_rowid()),
    }
}

fn to_rowset(rows: &[SqliteRow]) -> Result<Rowset, ExecError> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let values = rows
        .iter()
        .map(decode_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sqlx_error)?;
    Ok(Rowset::new(columns, values))
}

/// Decodes a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> Result<Vec<SqlValue>, sqlx::Error> {
    let mut values = Vec::with_capacity(row.len());
    for index in 0..row.len() {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let class = raw.type_info().name().to_ascii_uppercase();
        let value = match class.as_str() {
            "INTEGER" => SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?),
            "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
            "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
        };
        values.push(value);
    }
    Ok(values)
}

/// Separates connectivity failures from statement failures.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> ExecError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => ExecError::Connection(Box::new(err)),
        _ => ExecError::Statement(Box::new(err)),
    }
}
