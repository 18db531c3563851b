//! Persistence capabilities consumed by the build pipeline.
//!
//! Lookups return `Ok(None)` for a missing record so callers can tell
//! "absent" apart from a storage failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Build, Project, ResourceId, Result};

#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn create(&self, build: &Build) -> Result<()>;

    /// Move a PENDING build to RUNNING with the given start time.
    ///
    /// The check and the write are one atomic step: if the stored build is
    /// no longer PENDING nothing is written and `Error::Conflict` is
    /// returned, so at most one caller ever starts a given build.
    async fn mark_running(&self, id: ResourceId, started_at: DateTime<Utc>) -> Result<()>;

    /// Persist status and timestamps of an existing build.
    async fn update(&self, build: &Build) -> Result<()>;

    async fn get_by_id(&self, id: ResourceId) -> Result<Option<Build>>;

    /// Builds of a project, most recent first.
    async fn list_by_project(&self, project_id: ResourceId) -> Result<Vec<Build>>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_by_id(&self, id: ResourceId) -> Result<Option<Project>>;

    async fn get_by_github_repo_id(&self, github_repo_id: &str) -> Result<Option<Project>>;
}
