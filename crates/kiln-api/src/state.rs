//! Application state.

use kiln_core::logs::LogBus;
use kiln_core::store::{BuildStore, ProjectStore};
use kiln_db::{PgBuildStore, PgLogBus, PgProjectStore};
use kiln_scheduler::{JobQueue, PgJobQueue};
use sqlx::PgPool;
use std::sync::Arc;

use crate::fanout::LogFanout;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Present when backed by PostgreSQL; used by readiness checks.
    pub pool: Option<PgPool>,
    pub builds: Arc<dyn BuildStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub fanout: LogFanout,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let mut state = Self::from_parts(
            Arc::new(PgBuildStore::new(pool.clone())),
            Arc::new(PgProjectStore::new(pool.clone())),
            Arc::new(PgJobQueue::new(pool.clone())),
            Arc::new(PgLogBus::new(pool.clone())),
        );
        state.pool = Some(pool);
        state
    }

    pub fn from_parts(
        builds: Arc<dyn BuildStore>,
        projects: Arc<dyn ProjectStore>,
        queue: Arc<dyn JobQueue>,
        logs: Arc<dyn LogBus>,
    ) -> Self {
        Self {
            pool: None,
            builds,
            projects,
            queue,
            fanout: LogFanout::new(logs),
        }
    }
}
