//! Runtime: checkpointing, superstep execution, and run supervision.

pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod config;
pub mod executor;
pub mod persistence;
pub mod run;
pub mod supervisor;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, InMemoryCheckpointStore, StepMetadata,
};
#[cfg(feature = "sqlite")]
pub use checkpoint_sqlite::SqliteCheckpointStore;
pub use config::{CheckpointStoreType, RuntimeConfig};
pub use executor::{Executor, ExecutorError, StepReport};
pub use run::{RunInit, RunReport, WorkflowRun};
pub use supervisor::{RunSupervisor, SupervisorError};
