/*!
SQLite checkpoint store.

Async implementation of the `CheckpointStore` trait backed by sqlx. Each
`(run_id, step)` pair maps to one row; saving the same pair again replaces
the row, which is how terminal status updates land without adding a step.

Pure serialization lives in the persistence module; this module is
database I/O only. The single-table schema is created on connect with
`CREATE TABLE IF NOT EXISTS`, so no external migration step is needed.

## Storage Growth

Full step history is retained. Storage grows roughly with
`runs × steps_per_run × state_size`; prune completed runs with plain SQL
(`DELETE FROM checkpoints WHERE run_id = ?` followed by `VACUUM`).
*/

use std::sync::Arc;

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::runtime::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, StepMetadata};
use crate::runtime::persistence::{PersistedCheckpoint, PersistedState, status_from_str};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    run_id       TEXT    NOT NULL,
    step         INTEGER NOT NULL,
    status       TEXT    NOT NULL,
    state_json   TEXT    NOT NULL,
    history_json TEXT    NOT NULL,
    created_at   TEXT    NOT NULL,
    PRIMARY KEY (run_id, step)
)
"#;

/// SQLite-backed checkpoint store with full step history.
pub struct SqliteCheckpointStore {
    /// Shared pool for concurrent checkpoint operations.
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointStore").finish()
    }
}

impl SqliteCheckpointStore {
    /// Connect (or create) a SQLite database at `database_url` and ensure
    /// the schema exists.
    ///
    /// Example URL: `"sqlite://phaseloom.db?mode=rwc"`.
    #[must_use = "store must be used to persist checkpoints"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, CheckpointError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("connect error: {e}"),
            })?;
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("schema bootstrap: {e}"),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect to a database file on disk, creating it if absent.
    pub async fn open(path: &str) -> Result<Self, CheckpointError> {
        Self::connect(&format!("sqlite://{path}?mode=rwc")).await
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint, CheckpointError> {
        let run_id: String = row.get("run_id");
        let step: i64 = row.get("step");
        let status: String = row.get("status");
        let state_json: String = row.get("state_json");
        let history_json: String = row.get("history_json");
        let created_at: String = row.get("created_at");

        let persisted = PersistedCheckpoint {
            run_id,
            step: step as u64,
            state: PersistedState::from_json_str(&state_json).map_err(|e| {
                CheckpointError::Serialization {
                    message: format!("state column: {e}"),
                }
            })?,
            history: serde_json::from_str(&history_json).map_err(|e| {
                CheckpointError::Serialization {
                    message: format!("history column: {e}"),
                }
            })?,
            status,
            created_at,
        };
        Checkpoint::try_from(persisted).map_err(|e| CheckpointError::Serialization {
            message: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self, checkpoint), fields(run_id = %checkpoint.run_id, step = checkpoint.step), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let persisted = PersistedCheckpoint::from(&checkpoint);
        let state_json =
            persisted
                .state
                .to_json_string()
                .map_err(|e| CheckpointError::Serialization {
                    message: format!("state: {e}"),
                })?;
        let history_json = serde_json::to_string(&persisted.history).map_err(|e| {
            CheckpointError::Serialization {
                message: format!("history: {e}"),
            }
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("tx begin: {e}"),
            })?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (
                run_id, step, status, state_json, history_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&persisted.run_id)
        .bind(persisted.step as i64)
        .bind(&persisted.status)
        .bind(&state_json)
        .bind(&history_json)
        .bind(&persisted.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        tx.commit().await.map_err(|e| CheckpointError::Backend {
            message: format!("tx commit: {e}"),
        })?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row_opt: Option<SqliteRow> = sqlx::query(
            r#"
            SELECT run_id, step, status, state_json, history_json, created_at
            FROM checkpoints
            WHERE run_id = ?1
            ORDER BY step DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("select latest: {e}"),
        })?;

        match row_opt {
            Some(row) => Ok(Some(Self::row_to_checkpoint(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_steps(&self, run_id: &str) -> Result<Vec<StepMetadata>, CheckpointError> {
        let rows = sqlx::query(
            r#"
            SELECT step, status, created_at
            FROM checkpoints
            WHERE run_id = ?1
            ORDER BY step ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("list steps: {e}"),
        })?;

        rows.iter()
            .map(|row| {
                let step: i64 = row.get("step");
                let status: String = row.get("status");
                let created_at: String = row.get("created_at");
                let status =
                    status_from_str(&status).map_err(|e| CheckpointError::Serialization {
                        message: e.to_string(),
                    })?;
                let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| CheckpointError::Serialization {
                        message: format!("created_at column: {e}"),
                    })?;
                Ok(StepMetadata {
                    step: step as u64,
                    status,
                    created_at,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn list_runs(&self) -> Result<Vec<String>, CheckpointError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT run_id FROM checkpoints
            ORDER BY run_id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("list runs: {e}"),
        })?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("run_id"))
            .collect())
    }
}
