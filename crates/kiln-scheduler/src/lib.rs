//! Job scheduling and build execution for Kiln.
//!
//! Triggers are queued as [`kiln_core::Job`]s. Workers pop them and hand
//! each one to the [`BuildExecutor`], which checks out the project, runs
//! the pipeline's steps in order and records the outcome.
//! The PostgreSQL queue claims rows with SKIP LOCKED and wakes idle
//! workers with LISTEN/NOTIFY.

pub mod orchestrator;
pub mod queue;
pub mod signal;
pub mod trigger;
pub mod worker;
pub mod workspace;

pub use orchestrator::{BuildError, BuildExecutor, JobHandler};
pub use queue::{JOB_QUEUE_KEY, JobQueue, MemoryJobQueue, PgJobQueue, QueueError};
pub use signal::shutdown_signal;
pub use trigger::{TriggerError, TriggerRequest, trigger_build};
pub use worker::{Worker, WorkerPool};
pub use workspace::Workspace;
