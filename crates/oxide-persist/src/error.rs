//! Error types for the mapping layer.

use std::fmt;

use crate::executor::ExecError;
use crate::value::CoerceError;

/// Steps of a table rebuild, reported when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Opening the rebuild transaction.
    Begin,
    /// Renaming the live table out of the way.
    Rename,
    /// Dropping indexes that moved with the renamed table.
    DetachIndexes,
    /// Creating the table from its declaration.
    Create,
    /// Copying rows from the renamed table.
    Copy,
    /// Recreating declared indexes.
    Reindex,
    /// Dropping the renamed table.
    DropTemporary,
    /// Committing the rebuild transaction.
    Commit,
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::Rename => "rename",
            Self::DetachIndexes => "detach indexes",
            Self::Create => "create",
            Self::Copy => "copy rows",
            Self::Reindex => "reindex",
            Self::DropTemporary => "drop temporary table",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while mapping, migrating, or accessing records.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The entity declares no primary-key field.
    #[error("Entity '{entity}' has no primary key field (expected 'id' or a 'pk' prefix)")]
    NoPrimaryKey {
        /// Entity name.
        entity: String,
    },

    /// Two fields map to the same column name.
    #[error("Fields '{first}' and '{second}' of '{entity}' both map to column '{column}'")]
    DuplicateColumn {
        /// Entity name.
        entity: String,
        /// Field declared first.
        first: String,
        /// Field declared second.
        second: String,
        /// Shared column name.
        column: String,
    },

    /// The primary key is auto-increment but not an integer.
    #[error("Auto-increment primary key '{field}' of '{entity}' must be an integer")]
    InvalidAutoIncrement {
        /// Entity name.
        entity: String,
        /// Primary-key field.
        field: String,
    },

    /// Update was requested for an entity with no updatable column.
    #[error("Entity '{0}' has no updatable fields")]
    NotUpdatable(String),

    /// A statement failed to execute.
    #[error("Statement failed: {sql}")]
    Statement {
        /// The statement text.
        sql: String,
        /// Executor error.
        #[source]
        source: ExecError,
    },

    /// A metadata query failed or returned rows that could not be read.
    #[error("Failed to introspect table '{table}' with: {sql}")]
    Introspection {
        /// Table being inspected.
        table: String,
        /// The metadata query.
        sql: String,
        /// Executor error.
        #[source]
        source: ExecError,
    },

    /// A rebuild step failed; the rebuild was rolled back.
    #[error("Migration of table '{table}' failed at step '{step}'")]
    Migration {
        /// Table being rebuilt.
        table: String,
        /// Step that failed.
        step: MigrationStep,
        /// Underlying failure.
        #[source]
        source: Box<PersistError>,
    },

    /// No row matched the primary key.
    #[error("No row found in '{table}' for the given key")]
    NotFound {
        /// Table queried.
        table: String,
    },

    /// A stored value could not be assigned to a field.
    #[error("Cannot assign column '{field}'")]
    Coercion {
        /// Field being assigned.
        field: String,
        /// Conversion error.
        #[source]
        source: CoerceError,
    },

    /// The entity type was never registered with the mapper.
    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),
}

impl PersistError {
    pub(crate) fn statement(sql: impl Into<String>, source: ExecError) -> Self {
        Self::Statement {
            sql: sql.into(),
            source,
        }
    }
}

/// Result type for mapping operations.
pub type Result<T> = std::result::Result<T, PersistError>;
