//! Runtime configuration for workflow runs.

use std::time::Duration;

/// Which checkpoint backend a supervisor builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointStoreType {
    /// Process-local store; checkpoints vanish with the process.
    InMemory,
    /// Durable sqlx-backed store on disk.
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// Configuration carried by a [`RunSupervisor`](crate::runtime::RunSupervisor).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Checkpoint backend to construct.
    pub checkpointer: CheckpointStoreType,
    /// Database file for the sqlite backend. Resolved from the
    /// `SQLITE_DB_NAME` environment variable (via dotenv) when not set
    /// explicitly.
    pub sqlite_db_name: Option<String>,
    /// Wall-clock budget for an entire run; exceeded runs are marked
    /// failed with a timeout record at the next superstep boundary.
    pub run_deadline: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            checkpointer: CheckpointStoreType::InMemory,
            sqlite_db_name: Self::resolve_sqlite_db_name(None),
            run_deadline: None,
        }
    }
}

impl RuntimeConfig {
    fn resolve_sqlite_db_name(provided: Option<String>) -> Option<String> {
        if let Some(name) = provided {
            return Some(name);
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "phaseloom.db".to_string()))
    }

    #[must_use]
    pub fn new(checkpointer: CheckpointStoreType, sqlite_db_name: Option<String>) -> Self {
        Self {
            checkpointer,
            sqlite_db_name: Self::resolve_sqlite_db_name(sqlite_db_name),
            run_deadline: None,
        }
    }

    #[must_use]
    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }
}
