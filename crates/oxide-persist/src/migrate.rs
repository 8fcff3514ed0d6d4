//! Migration engine.
//!
//! Applies the flags left on a [`TableDefinition`] by the last diff pass,
//! running one first when the definition has not been diffed. Migrating
//! consumes the diff.
//!
//! - a missing table is created with its indexes,
//! - missing columns are added and, where the dialect allows it, mistyped
//!   columns are changed in place,
//! - anything else that needs a type change is rebuilt: the live table is
//!   renamed away, created again, refilled from the renamed copy, reindexed
//!   and the copy dropped, all inside one transaction,
//! - index-only differences go to the [`IndexSynchronizer`].
//!
//! Live columns that are no longer declared are never dropped by the
//! additive path. A rebuild only carries over declared columns.
//!
//! MySQL commits implicitly around DDL, so a failed rebuild there cannot be
//! fully rolled back.

use tracing::{debug, error, info};

use crate::dialect::Dialect;
use crate::diff::diff_table;
use crate::error::{MigrationStep, PersistError, Result};
use crate::executor::{QueryExecutor, Transaction, TransactionalExecutor};
use crate::index::IndexSynchronizer;
use crate::introspect::Introspector;
use crate::model::TableDefinition;
use crate::params::Params;

/// Prefix of the table a rebuild renames the live table to.
pub const REBUILD_PREFIX: &str = "tmp_rebuild_";

/// What a migration did to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing needed to change.
    UpToDate,
    /// The table was created.
    Created,
    /// Columns were added or changed in place.
    Altered,
    /// The table was rebuilt.
    Rebuilt,
    /// Only indexes changed.
    Reindexed,
}

/// Applies diff results to the live schema.
pub struct MigrationEngine<'a, E, D: ?Sized> {
    executor: &'a E,
    dialect: &'a D,
}

impl<'a, E: TransactionalExecutor, D: Dialect + ?Sized> MigrationEngine<'a, E, D> {
    /// Creates a migration engine.
    pub const fn new(executor: &'a E, dialect: &'a D) -> Self {
        Self { executor, dialect }
    }

    /// Migrates one table according to its last diff pass.
    ///
    /// A definition that has not been diffed is compared with the live
    /// table first. Afterwards the diff is spent, whether or not the
    /// migration succeeded.
    pub async fn migrate(&self, table: &mut TableDefinition) -> Result<MigrationOutcome> {
        if !table.is_diffed() {
            let live = Introspector::new(self.executor, self.dialect)
                .inspect(table.sql_name())
                .await?;
            let flags = diff_table(table, &live, self.dialect);
            debug!(table = %table.sql_name(), ?flags, "Diffed table before migrating");
        }
        let outcome = self.apply(table).await;
        table.invalidate_diff();
        outcome
    }

    async fn apply(&self, table: &mut TableDefinition) -> Result<MigrationOutcome> {
        let flags = table.flags();

        if flags.must_create {
            info!(table = %table.sql_name(), "Creating table");
            self.create(table).await?;
            return Ok(MigrationOutcome::Created);
        }

        if flags.must_modify || flags.must_recreate {
            if self.needs_rebuild(table) {
                info!(table = %table.sql_name(), "Rebuilding table");
                self.rebuild(table).await?;
                return Ok(MigrationOutcome::Rebuilt);
            }
            info!(table = %table.sql_name(), "Altering table");
            self.alter(table).await?;
            self.synchronizer().sync(table).await?;
            return Ok(MigrationOutcome::Altered);
        }

        if flags.must_reindex {
            info!(table = %table.sql_name(), "Synchronizing indexes");
            self.synchronizer().sync(table).await?;
            return Ok(MigrationOutcome::Reindexed);
        }

        debug!(table = %table.sql_name(), "Table is up to date");
        Ok(MigrationOutcome::UpToDate)
    }

    fn synchronizer(&self) -> IndexSynchronizer<'a, E, D> {
        IndexSynchronizer::new(self.executor, self.dialect)
    }

    fn needs_rebuild(&self, table: &TableDefinition) -> bool {
        if !table.flags().must_recreate {
            return false;
        }
        if !self.dialect.supports_alter_column() {
            return true;
        }
        let key = table.primary_key();
        !key.exists_in_db || !key.type_matches_db
    }

    async fn create(&self, table: &mut TableDefinition) -> Result<()> {
        let sql = self.dialect.create_table_sql(table);
        run(self.executor, &sql).await?;
        self.synchronizer().sync(table).await?;
        Ok(())
    }

    async fn alter(&self, table: &TableDefinition) -> Result<()> {
        for (position, field) in table.fields().iter().enumerate() {
            let sql = if !field.exists_in_db {
                Some(self.dialect.add_column_sql(table, position))
            } else if !field.type_matches_db {
                self.dialect.modify_column_sql(table, position)
            } else {
                None
            };
            if let Some(sql) = sql {
                run(self.executor, &sql).await?;
            }
        }
        Ok(())
    }

    async fn rebuild(&self, table: &mut TableDefinition) -> Result<()> {
        let name = table.sql_name().to_string();
        let temporary = format!("{REBUILD_PREFIX}{name}");

        let tx = self.executor.begin().await.map_err(|source| {
            step_error(&name, MigrationStep::Begin, PersistError::statement("BEGIN", source))
        })?;

        match self.rebuild_steps(&tx, table, &name, &temporary).await {
            Ok(()) => tx.commit().await.map_err(|source| {
                let err = step_error(
                    &name,
                    MigrationStep::Commit,
                    PersistError::statement("COMMIT", source),
                );
                error!(table = %name, error = %err, "Rebuild rolled back");
                err
            }),
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(
                        table = %name,
                        error = %rollback,
                        "Rollback after failed rebuild also failed"
                    );
                }
                error!(table = %name, error = %err, "Rebuild rolled back");
                Err(err)
            }
        }
    }

    /// Runs every rebuild statement on the transaction `tx`.
    async fn rebuild_steps<X: QueryExecutor>(
        &self,
        tx: &X,
        table: &mut TableDefinition,
        name: &str,
        temporary: &str,
    ) -> Result<()> {
        let sql = self.dialect.rename_table_sql(name, temporary);
        run(tx, &sql)
            .await
            .map_err(|e| step_error(name, MigrationStep::Rename, e))?;

        self.detach_indexes(tx, name, temporary)
            .await
            .map_err(|e| step_error(name, MigrationStep::DetachIndexes, e))?;

        let sql = self.dialect.create_table_sql(table);
        run(tx, &sql)
            .await
            .map_err(|e| step_error(name, MigrationStep::Create, e))?;

        let common: Vec<&str> = table
            .fields()
            .iter()
            .filter(|f| f.exists_in_db)
            .map(|f| f.sql_name.as_str())
            .collect();
        if !common.is_empty() {
            let sql = self.dialect.copy_rows_sql(name, temporary, &common);
            run(tx, &sql)
                .await
                .map_err(|e| step_error(name, MigrationStep::Copy, e))?;
        }

        for field in table.fields_mut() {
            field.index_matches_db = false;
        }
        IndexSynchronizer::new(tx, self.dialect)
            .strict(true)
            .sync(table)
            .await
            .map_err(|e| step_error(name, MigrationStep::Reindex, e))?;

        let sql = self.dialect.drop_table_sql(temporary);
        run(tx, &sql)
            .await
            .map_err(|e| step_error(name, MigrationStep::DropTemporary, e))
    }

    /// Drops managed indexes that moved to the renamed table, freeing their
    /// names for the new table.
    async fn detach_indexes<X: QueryExecutor>(
        &self,
        tx: &X,
        name: &str,
        temporary: &str,
    ) -> Result<()> {
        let prefix = format!("idx_{name}_");
        let indexes = Introspector::new(tx, self.dialect)
            .indexes(temporary)
            .await?;
        for index in indexes.iter().filter(|ix| ix.name.starts_with(&prefix)) {
            let sql = self.dialect.drop_index_sql(temporary, &index.name);
            run(tx, &sql).await?;
        }
        Ok(())
    }
}

async fn run<X: QueryExecutor + ?Sized>(executor: &X, sql: &str) -> Result<()> {
    debug!(sql = %sql, "Executing SQL");
    executor
        .execute(sql, &Params::new())
        .await
        .map(drop)
        .map_err(|source| PersistError::statement(sql, source))
}

fn step_error(table: &str, step: MigrationStep, source: PersistError) -> PersistError {
    PersistError::Migration {
        table: table.to_string(),
        step,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_table;
    use crate::dialect::{MySqlDialect, SqliteDialect};
    use crate::introspect::{ColumnFact, LiveSchema};
    use crate::executor::Rowset;
    use crate::model::{FieldDescriptor, LogicalType};
    use crate::testing::ScriptedExecutor;
    use crate::value::SqlValue;

    const ITEM: &[FieldDescriptor] = &[
        FieldDescriptor::new("id", LogicalType::Int64).auto_increment(),
        FieldDescriptor::new("label", LogicalType::Text).indexed(),
        FieldDescriptor::new("qty", LogicalType::Int32),
    ];

    fn live(columns: &[(&str, &str, bool)]) -> LiveSchema {
        LiveSchema {
            table: "item".into(),
            columns: columns
                .iter()
                .map(|(name, ty, pk)| ColumnFact {
                    name: (*name).into(),
                    type_name: (*ty).into(),
                    primary_key: *pk,
                })
                .collect(),
            indexes: Vec::new(),
        }
    }

    fn ddl(exec: &ScriptedExecutor) -> Vec<String> {
        exec.statements()
            .into_iter()
            .filter(|s| !s.starts_with("SELECT"))
            .collect()
    }

    fn diffed<D: Dialect>(live: &LiveSchema, dialect: &D) -> TableDefinition {
        let mut def = TableDefinition::build("Item", ITEM, dialect).unwrap();
        diff_table(&mut def, live, dialect);
        def
    }

    #[tokio::test]
    async fn absent_table_is_created_with_indexes() {
        let exec = ScriptedExecutor::new();
        let mut def = diffed(&LiveSchema::default(), &SqliteDialect);
        let outcome = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Created);
        assert_eq!(
            ddl(&exec),
            [
                "CREATE TABLE \"item\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
                 \"label\" TEXT, \"qty\" INTEGER)",
                "CREATE INDEX \"idx_item_label\" ON \"item\" (\"label\")",
            ]
        );
    }

    #[tokio::test]
    async fn missing_column_is_added() {
        let exec = ScriptedExecutor::new();
        let mut def = diffed(
            &live(&[("id", "INTEGER", true), ("label", "TEXT", false)]),
            &SqliteDialect,
        );
        let outcome = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Altered);
        assert_eq!(
            ddl(&exec),
            [
                "ALTER TABLE \"item\" ADD COLUMN \"qty\" INTEGER",
                "CREATE INDEX \"idx_item_label\" ON \"item\" (\"label\")",
            ]
        );
    }

    #[tokio::test]
    async fn sqlite_type_change_rebuilds_in_a_transaction() {
        let exec = ScriptedExecutor::new();
        let mut def = diffed(
            &live(&[
                ("id", "INTEGER", true),
                ("label", "TEXT", false),
                ("qty", "TEXT", false),
            ]),
            &SqliteDialect,
        );
        let outcome = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Rebuilt);
        assert_eq!(
            ddl(&exec),
            [
                "BEGIN",
                "ALTER TABLE \"item\" RENAME TO \"tmp_rebuild_item\"",
                "CREATE TABLE \"item\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
                 \"label\" TEXT, \"qty\" INTEGER)",
                "INSERT INTO \"item\" (\"id\", \"label\", \"qty\") \
                 SELECT \"id\", \"label\", \"qty\" FROM \"tmp_rebuild_item\"",
                "CREATE INDEX \"idx_item_label\" ON \"item\" (\"label\")",
                "DROP TABLE \"tmp_rebuild_item\"",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn rebuild_copies_only_common_columns() {
        let exec = ScriptedExecutor::new();
        let mut def = diffed(
            &live(&[("id", "TEXT", true), ("label", "TEXT", false)]),
            &SqliteDialect,
        );
        MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert!(exec.statements().contains(
            &"INSERT INTO \"item\" (\"id\", \"label\") SELECT \"id\", \"label\" FROM \"tmp_rebuild_item\""
                .to_string()
        ));
    }

    #[tokio::test]
    async fn failed_rebuild_step_rolls_back() {
        let exec = ScriptedExecutor::new().fail_on("INSERT INTO");
        let mut def = diffed(
            &live(&[
                ("id", "INTEGER", true),
                ("label", "TEXT", false),
                ("qty", "TEXT", false),
            ]),
            &SqliteDialect,
        );
        let err = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistError::Migration { step: MigrationStep::Copy, ref table, .. } if table == "item"
        ));
        let statements = exec.statements();
        assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!statements.iter().any(|s| s == "COMMIT"));
        assert!(!statements.iter().any(|s| s.starts_with("DROP TABLE")));
    }

    #[tokio::test]
    async fn mysql_modifies_columns_in_place() {
        let exec = ScriptedExecutor::new();
        let mut def = diffed(
            &live(&[
                ("id", "bigint(20)", true),
                ("label", "varchar(50)", false),
                ("qty", "varchar(10)", false),
            ]),
            &MySqlDialect,
        );
        let outcome = MigrationEngine::new(&exec, &MySqlDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Altered);
        let ddl = ddl(&exec);
        assert_eq!(ddl[0], "ALTER TABLE `item` MODIFY COLUMN `qty` int AFTER `label`");
        assert!(!ddl.iter().any(|s| s.starts_with("BEGIN")));
    }

    #[tokio::test]
    async fn mysql_key_change_still_rebuilds() {
        let exec = ScriptedExecutor::new();
        let mut def = diffed(
            &live(&[
                ("id", "varchar(20)", true),
                ("label", "varchar(50)", false),
                ("qty", "int(11)", false),
            ]),
            &MySqlDialect,
        );
        let outcome = MigrationEngine::new(&exec, &MySqlDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Rebuilt);
        assert!(exec
            .statements()
            .contains(&"RENAME TABLE `item` TO `tmp_rebuild_item`".to_string()));
    }

    #[tokio::test]
    async fn undiffed_table_is_diffed_first() {
        let exec = ScriptedExecutor::new();
        let mut def = TableDefinition::build("Item", ITEM, &SqliteDialect).unwrap();
        assert!(!def.is_diffed());
        let outcome = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Created);
        assert!(exec.statements()[0].starts_with("PRAGMA table_info(\"item\")"));
        assert!(!def.is_diffed());
    }

    #[tokio::test]
    async fn undiffed_matching_table_runs_no_ddl() {
        let columns = Rowset::new(
            vec!["name".into(), "type".into(), "pk".into()],
            vec![
                vec![SqlValue::Text("id".into()), SqlValue::Text("INTEGER".into()), SqlValue::Int(1)],
                vec![SqlValue::Text("label".into()), SqlValue::Text("TEXT".into()), SqlValue::Int(0)],
                vec![SqlValue::Text("qty".into()), SqlValue::Text("INTEGER".into()), SqlValue::Int(0)],
            ],
        );
        let indexes = Rowset::new(
            vec!["name".into(), "sql".into()],
            vec![vec![
                SqlValue::Text("idx_item_label".into()),
                SqlValue::Text("CREATE INDEX \"idx_item_label\" ON \"item\" (\"label\")".into()),
            ]],
        );
        let exec = ScriptedExecutor::new()
            .respond("PRAGMA", columns)
            .respond("SELECT name, sql", indexes);
        let mut def = TableDefinition::build("Item", ITEM, &SqliteDialect).unwrap();
        let outcome = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::UpToDate);
        assert!(exec
            .statements()
            .iter()
            .all(|s| s.starts_with("PRAGMA") || s.starts_with("SELECT")));
    }

    #[tokio::test]
    async fn failed_commit_is_reported_as_commit_step() {
        let exec = ScriptedExecutor::new().fail_on("COMMIT");
        let mut def = diffed(
            &live(&[
                ("id", "INTEGER", true),
                ("label", "TEXT", false),
                ("qty", "TEXT", false),
            ]),
            &SqliteDialect,
        );
        let err = MigrationEngine::new(&exec, &SqliteDialect)
            .migrate(&mut def)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistError::Migration {
                step: MigrationStep::Commit,
                ..
            }
        ));
        assert_eq!(exec.statements().last().map(String::as_str), Some("ROLLBACK"));
    }
}
