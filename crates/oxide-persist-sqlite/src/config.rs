//! Connection configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// Default time SQLite waits on a locked database file.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause after each write.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// How statements against one database file are serialized.
///
/// Executors that share a file should share the policy (or at least its
/// gate) so their writes never overlap.
#[derive(Debug, Clone)]
pub struct SerializationPolicy {
    /// Held for every write and, when `serialize_reads` is set, every read.
    pub gate: Arc<Mutex<()>>,
    /// Also serialize reads through the gate.
    pub serialize_reads: bool,
    /// Pause after each write while still holding the gate.
    pub settle_delay: Duration,
}

impl Default for SerializationPolicy {
    fn default() -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            serialize_reads: true,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl SerializationPolicy {
    /// Creates a policy with its own gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an existing gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Mutex<()>>) -> Self {
        self.gate = gate;
        self
    }

    /// Sets whether reads take the gate.
    #[must_use]
    pub const fn serialize_reads(mut self, enabled: bool) -> Self {
        self.serialize_reads = enabled;
        self
    }

    /// Sets the pause after each write.
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Settings for a [`SqliteExecutor`](crate::SqliteExecutor).
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Connection URL, such as `sqlite:db.sqlite3` or `sqlite::memory:`.
    pub url: String,
    /// How long SQLite waits on a locked file.
    pub busy_timeout: Duration,
    /// Pause after each write.
    pub settle_delay: Duration,
    /// Also serialize reads.
    pub serialize_reads: bool,
    /// Size of the connection pool.
    pub max_connections: u32,
}

impl SqliteConfig {
    /// Creates a configuration for a database URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            serialize_reads: true,
            max_connections: 5,
        }
    }

    /// Creates a configuration for a private in-memory database.
    ///
    /// Every pooled connection would open its own in-memory database, so
    /// the pool holds exactly one connection.
    #[must_use]
    pub fn memory() -> Self {
        Self::new("sqlite::memory:")
            .max_connections(1)
            .settle_delay(Duration::ZERO)
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the pause after each write.
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets whether reads are serialized.
    #[must_use]
    pub const fn serialize_reads(mut self, enabled: bool) -> Self {
        self.serialize_reads = enabled;
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Returns a serialization policy with a fresh gate.
    #[must_use]
    pub fn policy(&self) -> SerializationPolicy {
        SerializationPolicy::new()
            .serialize_reads(self.serialize_reads)
            .settle_delay(self.settle_delay)
    }
}
