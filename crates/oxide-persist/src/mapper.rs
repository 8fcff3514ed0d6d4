//! Mapping session.
//!
//! A [`Mapper`] owns an executor, a dialect and the table definitions of
//! every registered entity. It answers whether the live schema matches the
//! declarations, migrates it when it does not, and runs single-row CRUD by
//! primary key.
//!
//! # Example
//!
//! ```ignore
//! use oxide_persist::{Mapper, SqliteDialect};
//!
//! let mut mapper = Mapper::new(executor, SqliteDialect)
//!     .register::<Contact>()?
//!     .register::<Group>()?;
//!
//! if !mapper.is_up_to_date().await? {
//!     mapper.update_model().await?;
//! }
//!
//! let mut contact = Contact { id: 0, name: "Ada".into() };
//! mapper.insert(&mut contact).await?;
//! let same: Contact = mapper.find(contact.id).await?;
//! ```

use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::diff::{diff_table, DiffReport};
use crate::error::{PersistError, Result};
use crate::executor::{ExecResult, QueryExecutor, TransactionalExecutor};
use crate::introspect::Introspector;
use crate::migrate::{MigrationEngine, MigrationOutcome};
use crate::model::{Entity, TableDefinition};
use crate::value::{SqlValue, ToSqlValue};

/// Registered entities bound to one database.
pub struct Mapper<E, D> {
    executor: E,
    dialect: D,
    tables: Vec<TableDefinition>,
}

impl<E: TransactionalExecutor, D: Dialect> Mapper<E, D> {
    /// Creates a mapper with no registered entity.
    pub const fn new(executor: E, dialect: D) -> Self {
        Self {
            executor,
            dialect,
            tables: Vec::new(),
        }
    }

    /// Registers an entity type and returns the mapper.
    ///
    /// # Errors
    ///
    /// Returns the configuration errors of [`TableDefinition::build`].
    pub fn register<T: Entity>(mut self) -> Result<Self> {
        self.add::<T>()?;
        Ok(self)
    }

    /// Registers an entity type, replacing an earlier registration.
    ///
    /// # Errors
    ///
    /// Returns the configuration errors of [`TableDefinition::build`].
    pub fn add<T: Entity>(&mut self) -> Result<&mut Self> {
        let table = TableDefinition::from_entity::<T, D>(&self.dialect)?;
        debug!(entity = %T::NAME, table = %table.sql_name(), "Registered entity");
        match self.tables.iter_mut().find(|t| t.name() == T::NAME) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
        Ok(self)
    }

    /// Returns the registered table definitions.
    #[must_use]
    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    /// Returns the table definition of an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::UnknownEntity`] when `T` is not registered.
    pub fn table<T: Entity>(&self) -> Result<&TableDefinition> {
        self.tables
            .iter()
            .find(|t| t.name() == T::NAME)
            .ok_or_else(|| PersistError::UnknownEntity(T::NAME.to_string()))
    }

    /// Returns the executor.
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Returns the dialect.
    pub const fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Compares every registered table with the live schema.
    pub async fn diff(&mut self) -> Result<DiffReport> {
        let introspector = Introspector::new(&self.executor, &self.dialect);
        let mut report = DiffReport::default();
        for table in &mut self.tables {
            let live = introspector.inspect(table.sql_name()).await?;
            let flags = diff_table(table, &live, &self.dialect);
            debug!(table = %table.sql_name(), ?flags, "Diffed table");
            report.tables.push((table.sql_name().to_string(), flags));
        }
        Ok(report)
    }

    /// Returns `true` when no registered table needs migration.
    pub async fn is_up_to_date(&mut self) -> Result<bool> {
        Ok(self.diff().await?.is_up_to_date())
    }

    /// Migrates the live schema to match every registered table.
    ///
    /// Tables without a current diff are diffed first; every diff is spent
    /// afterwards.
    pub async fn update_model(&mut self) -> Result<Vec<(String, MigrationOutcome)>> {
        let engine = MigrationEngine::new(&self.executor, &self.dialect);
        let mut outcomes = Vec::with_capacity(self.tables.len());
        for table in &mut self.tables {
            let outcome = engine.migrate(table).await?;
            outcomes.push((table.sql_name().to_string(), outcome));
        }
        info!(tables = outcomes.len(), "Model updated");
        Ok(outcomes)
    }

    /// Inserts a record.
    ///
    /// An auto-increment key is set from the generated value.
    pub async fn insert<T: Entity>(&self, record: &mut T) -> Result<ExecResult> {
        let table = self.table::<T>()?;
        let sql = &table.statements().insert;
        let result = self
            .executor
            .execute(sql, &record.to_params())
            .await
            .map_err(|source| PersistError::statement(sql, source))?;

        let key = table.primary_key();
        if key.is_auto_increment {
            if let Some(id) = result.last_insert_id {
                record
                    .set_field(&key.name, SqlValue::Int(id))
                    .map_err(|source| PersistError::Coercion {
                        field: key.name.clone(),
                        source,
                    })?;
            }
        }
        Ok(result)
    }

    /// Reloads a record by its primary key.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::NotFound`] when no row has the key.
    pub async fn read<T: Entity>(&self, record: &mut T) -> Result<()> {
        let table = self.table::<T>()?;
        let sql = &table.statements().select;
        let rows = self
            .executor
            .query(sql, &record.to_params())
            .await
            .map_err(|source| PersistError::statement(sql, source))?;

        let row = rows.first().ok_or_else(|| PersistError::NotFound {
            table: table.sql_name().to_string(),
        })?;
        for (column, value) in row.iter() {
            record
                .set_field(column, value.clone())
                .map_err(|source| PersistError::Coercion {
                    field: column.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Loads the record with the given primary key.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::NotFound`] when no row has the key.
    pub async fn find<T: Entity + Default>(&self, key: impl ToSqlValue) -> Result<T> {
        let table = self.table::<T>()?;
        let key_name = &table.primary_key().name;
        let mut record = T::default();
        record
            .set_field(key_name, key.to_sql_value())
            .map_err(|source| PersistError::Coercion {
                field: key_name.clone(),
                source,
            })?;
        self.read(&mut record).await?;
        Ok(record)
    }

    /// Updates a record by its primary key.
    ///
    /// Zero affected rows is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::NotUpdatable`] when the entity has no
    /// updatable field.
    pub async fn update<T: Entity>(&self, record: &T) -> Result<ExecResult> {
        let table = self.table::<T>()?;
        let sql = table
            .statements()
            .update
            .as_deref()
            .ok_or_else(|| PersistError::NotUpdatable(T::NAME.to_string()))?;
        self.executor
            .execute(sql, &record.to_params())
            .await
            .map_err(|source| PersistError::statement(sql, source))
    }

    /// Deletes a record by its primary key.
    ///
    /// Zero affected rows is not an error.
    pub async fn delete<T: Entity>(&self, record: &T) -> Result<ExecResult> {
        let table = self.table::<T>()?;
        let sql = &table.statements().delete;
        self.executor
            .execute(sql, &record.to_params())
            .await
            .map_err(|source| PersistError::statement(sql, source))
    }
}
