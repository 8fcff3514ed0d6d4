//! # oxide-persist-sqlite
//!
//! SQLite driver for `oxide-persist`.
//!
//! [`SqliteExecutor`] implements [`oxide_persist::QueryExecutor`] on a
//! `sqlx` pool. SQLite allows one writer per file, so every executor carries
//! a [`SerializationPolicy`]: a gate held around each write (and, by
//! default, each read), a busy timeout, and a short settle delay after
//! writes. Executors opened on the same file should share one gate.
//! [`SqliteTransaction`] keeps the gate for as long as it is open.
//!
//! ```ignore
//! use oxide_persist::{Mapper, SqliteDialect};
//! use oxide_persist_sqlite::{SqliteConfig, SqliteExecutor};
//!
//! let executor = SqliteExecutor::connect(&SqliteConfig::new("sqlite:app.db")).await?;
//! let mut mapper = Mapper::new(executor, SqliteDialect).register::<Contact>()?;
//! mapper.update_model().await?;
//! ```

mod config;
mod executor;

pub use config::{SerializationPolicy, SqliteConfig, DEFAULT_BUSY_TIMEOUT, DEFAULT_SETTLE_DELAY};
pub use executor::{SqliteExecutor, SqliteTransaction};
