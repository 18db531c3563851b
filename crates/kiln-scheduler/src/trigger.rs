//! Creating a build and queueing it in one step.

use kiln_core::store::BuildStore;
use kiln_core::{Build, Job, Project};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::queue::{JobQueue, QueueError};

/// What to build. Missing fields fall back to the project's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    /// Label recorded on the build and exposed to steps as `KILN_BRANCH`
    /// and `${git.branch}`. It does not select what is checked out: the
    /// clone always takes the repository's default ref.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to create build: {0}")]
    Store(#[source] kiln_core::Error),

    #[error("build {build} was created but could not be queued: {source}")]
    Queue {
        build: kiln_core::ResourceId,
        #[source]
        source: QueueError,
    },
}

/// Record a pending build for `project` and enqueue its job.
pub async fn trigger_build(
    builds: &dyn BuildStore,
    queue: &dyn JobQueue,
    project: &Project,
    request: TriggerRequest,
) -> Result<Build, TriggerError> {
    let branch = request
        .branch
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| project.default_branch.clone());
    let build = Build::new(
        project.id,
        request.commit_hash.unwrap_or_default(),
        request.commit_message.unwrap_or_default(),
        branch,
    );

    builds.create(&build).await.map_err(TriggerError::Store)?;

    if let Err(e) = queue.enqueue(&Job::new(build.id)).await {
        error!(build_id = %build.id, error = %e, "Failed to enqueue build");
        return Err(TriggerError::Queue {
            build: build.id,
            source: e,
        });
    }

    info!(build_id = %build.id, project = %project.name, branch = %build.branch, "Build queued");
    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryJobQueue, decode_job};
    use kiln_core::BuildStatus;
    use kiln_db::MemoryBuildStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_creates_pending_build_and_job() {
        let builds = MemoryBuildStore::new();
        let queue = MemoryJobQueue::new();
        let project = Project::new("demo", "https://example.com/demo.git");

        let build = trigger_build(
            &builds,
            &queue,
            &project,
            TriggerRequest {
                commit_hash: Some("abc123".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(build.status, BuildStatus::Pending);
        assert_eq!(build.branch, "main");
        assert_eq!(build.commit_hash, "abc123");
        assert!(builds.get_by_id(build.id).await.unwrap().is_some());

        let payload = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(decode_job(&payload).unwrap().build_id, build.id);
    }

    #[tokio::test]
    async fn test_explicit_branch_wins() {
        let builds = MemoryBuildStore::new();
        let queue = MemoryJobQueue::new();
        let project = Project::new("demo", "https://example.com/demo.git");

        let request: TriggerRequest = serde_json::from_str(r#"{"branch":"release"}"#).unwrap();
        let build = trigger_build(&builds, &queue, &project, request).await.unwrap();
        assert_eq!(build.branch, "release");
    }
}
