//! Index synchronization.
//!
//! Every indexed column gets one managed index named
//! `idx_<table>_<column>`. [`IndexSynchronizer::sync`] reconciles those
//! indexes with the declaration for each field the last diff pass flagged.

use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::error::{PersistError, Result};
use crate::executor::QueryExecutor;
use crate::introspect::Introspector;
use crate::model::TableDefinition;
use crate::params::Params;

/// Creates and drops managed indexes to match a declaration.
pub struct IndexSynchronizer<'a, E, D: ?Sized> {
    executor: &'a E,
    dialect: &'a D,
    strict: bool,
}

impl<'a, E: QueryExecutor, D: Dialect + ?Sized> IndexSynchronizer<'a, E, D> {
    /// Creates a synchronizer with best-effort drops.
    pub const fn new(executor: &'a E, dialect: &'a D) -> Self {
        Self {
            executor,
            dialect,
            strict: false,
        }
    }

    /// Makes failed drops abort the synchronization.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Reconciles the index of every field whose index state differs.
    ///
    /// Returns the number of statements executed.
    pub async fn sync(&self, table: &mut TableDefinition) -> Result<usize> {
        let introspector = Introspector::new(self.executor, self.dialect);
        let table_name = table.sql_name().to_string();
        let mut executed = 0;

        for position in 0..table.fields().len() {
            let field = &table.fields()[position];
            if field.index_matches_db {
                continue;
            }
            let name = table.index_name(field);
            let wants = field.wants_index();
            let unique = field.is_unique;
            let column = field.sql_name.clone();

            let live = introspector
                .indexes(&table_name)
                .await?
                .into_iter()
                .find(|ix| ix.name == name);

            let keep = match &live {
                Some(ix) if wants && ix.unique == unique => true,
                Some(_) => {
                    let sql = self.dialect.drop_index_sql(&table_name, &name);
                    if self.run(&sql).await? {
                        executed += 1;
                    }
                    false
                }
                None => false,
            };

            if wants && !keep {
                let sql = self
                    .dialect
                    .create_index_sql(&table_name, &name, &column, unique);
                self.executor
                    .execute(&sql, &Params::new())
                    .await
                    .map_err(|source| PersistError::statement(&sql, source))?;
                debug!(index = %name, unique, "Created index");
                executed += 1;
            }

            table.fields_mut()[position].index_matches_db = true;
        }

        Ok(executed)
    }

    /// Runs a drop, returning whether it succeeded.
    async fn run(&self, sql: &str) -> Result<bool> {
        match self.executor.execute(sql, &Params::new()).await {
            Ok(_) => {
                debug!(sql = %sql, "Dropped index");
                Ok(true)
            }
            Err(source) if self.strict => Err(PersistError::statement(sql, source)),
            Err(err) => {
                warn!(sql = %sql, error = %err, "Failed to drop index, continuing");
                Ok(false)
            }
        }
    }
}
