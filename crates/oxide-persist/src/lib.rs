//! # oxide-persist
//!
//! Struct-relational mapping with live schema reconciliation.
//!
//! Record types describe their fields once, usually through
//! `#[derive(Entity)]` from `oxide-persist-derive`. From that description the
//! crate derives the table layout and the single-row CRUD statements, reads
//! the live schema of the database, and migrates it until the two agree.
//!
//! ## Components
//!
//! - **Model** ([`TableDefinition`]) - columns, primary key, indexes and
//!   statement templates derived from an [`Entity`]
//! - **Values** ([`SqlValue`]) - typed conversion between fields and stored
//!   values
//! - **Executor** ([`QueryExecutor`], [`TransactionalExecutor`]) - the
//!   database capability, implemented in driver crates such as
//!   `oxide-persist-sqlite`
//! - **Dialect** ([`Dialect`]) - type names, metadata queries and DDL for
//!   SQLite and MySQL
//! - **Introspector**, **diff**, **migration engine** and **index
//!   synchronizer** - the schema reconciliation pipeline
//! - **Mapper** ([`Mapper`]) - registration, migration and CRUD in one place
//!
//! ## Quick Start
//!
//! ```ignore
//! use oxide_persist::{Mapper, SqliteDialect};
//! use oxide_persist_derive::Entity;
//!
//! #[derive(Debug, Default, Entity)]
//! struct GroupInfo {
//!     #[field(autoincrement)]
//!     id: i64,
//!     #[field(size = 80, unique)]
//!     name: String,
//! }
//!
//! async fn example<E>(executor: E) -> oxide_persist::Result<()>
//! where
//!     E: oxide_persist::TransactionalExecutor,
//! {
//!     let mut mapper = Mapper::new(executor, SqliteDialect).register::<GroupInfo>()?;
//!     mapper.update_model().await?;
//!
//!     let mut group = GroupInfo { id: 0, name: "admins".into() };
//!     mapper.insert(&mut group).await?;
//!     let loaded: GroupInfo = mapper.find(group.id).await?;
//!     Ok(())
//! }
//! ```

pub mod dialect;
pub mod diff;
mod error;
pub mod executor;
pub mod index;
pub mod introspect;
mod mapper;
pub mod migrate;
pub mod model;
pub mod params;
pub mod value;

#[cfg(test)]
mod testing;

pub use dialect::{Dialect, MySqlDialect, SqliteDialect};
pub use diff::{diff_table, DiffReport};
pub use error::{MigrationStep, PersistError, Result};
pub use executor::{
    ExecError, ExecResult, QueryExecutor, RowRef, Rowset, Transaction, TransactionalExecutor,
};
pub use index::IndexSynchronizer;
pub use introspect::{ColumnFact, IndexFact, Introspector, LiveSchema};
pub use mapper::Mapper;
pub use migrate::{MigrationEngine, MigrationOutcome};
pub use model::{
    to_sql_name, Entity, FieldDefinition, FieldDescriptor, LogicalType, Statements,
    TableDefinition, TableFlags,
};
pub use params::{expand_named, Params};
pub use value::{parse_timestamp, CoerceError, FieldType, FromSqlValue, SqlValue, ToSqlValue};
