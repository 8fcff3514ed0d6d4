//! In-memory executor for unit tests.

use std::sync::Mutex;

use crate::dialect::SqliteDialect;
use crate::executor::{
    ExecError, ExecResult, QueryExecutor, Rowset, Transaction, TransactionalExecutor,
};
use crate::params::{expand_named, Params};
use crate::value::SqlValue;

/// Records every statement and answers queries from canned rowsets.
///
/// Responses are matched by statement prefix; unmatched queries return an
/// empty rowset. Statements containing the `fail_on` text fail.
#[derive(Default)]
pub struct ScriptedExecutor {
    log: Mutex<Vec<String>>,
    responses: Vec<(String, Rowset)>,
    fail_on: Option<String>,
    last_insert_id: Option<i64>,
    rows_affected: u64,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            rows_affected: 1,
            ..Self::default()
        }
    }

    pub fn respond(mut self, prefix: &str, rows: Rowset) -> Self {
        self.responses.push((prefix.to_string(), rows));
        self
    }

    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub const fn insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }

    pub const fn rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = rows;
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, sql: &str, params: &Params) -> Result<String, ExecError> {
        let sql = expand_named(sql, params, &SqliteDialect)?;
        self.log.lock().unwrap().push(sql.clone());
        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(ExecError::Statement(format!("scripted failure: {sql}").into()));
            }
        }
        Ok(sql)
    }
}

impl QueryExecutor for ScriptedExecutor {
    async fn query(&self, sql: &str, params: &Params) -> Result<Rowset, ExecError> {
        let sql = self.record(sql, params)?;
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecResult, ExecError> {
        self.record(sql, params)?;
        Ok(ExecResult {
            rows_affected: self.rows_affected,
            last_insert_id: self.last_insert_id,
        })
    }
}

impl TransactionalExecutor for ScriptedExecutor {
    type Transaction<'t> = ScriptedTransaction<'t>;

    async fn begin(&self) -> Result<Self::Transaction<'_>, ExecError> {
        self.record("BEGIN", &Params::new())?;
        Ok(ScriptedTransaction { executor: self })
    }
}

/// Transaction handle that logs into its executor.
pub struct ScriptedTransaction<'t> {
    executor: &'t ScriptedExecutor,
}

impl QueryExecutor for ScriptedTransaction<'_> {
    async fn query(&self, sql: &str, params: &Params) -> Result<Rowset, ExecError> {
        self.executor.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecResult, ExecError> {
        self.executor.execute(sql, params).await
    }
}

impl Transaction for ScriptedTransaction<'_> {
    async fn commit(self) -> Result<(), ExecError> {
        if let Err(err) = self.executor.record("COMMIT", &Params::new()) {
            self.executor.record("ROLLBACK", &Params::new()).ok();
            return Err(err);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), ExecError> {
        self.executor.record("ROLLBACK", &Params::new()).map(drop)
    }
}

/// Builds a one-column text rowset.
pub fn text_rows(column: &str, values: &[&str]) -> Rowset {
    Rowset::new(
        vec![column.to_string()],
        values
            .iter()
            .map(|v| vec![SqlValue::Text((*v).to_string())])
            .collect(),
    )
}
