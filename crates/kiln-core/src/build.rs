//! Build, project and job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// Lifecycle state of a build.
///
/// Builds move `Pending -> Running -> {Success, Failed, Cancelled}`; a
/// pending build may also be cancelled before it ever starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "PENDING",
            BuildStatus::Running => "RUNNING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BuildStatus::Pending),
            "RUNNING" => Ok(BuildStatus::Running),
            "SUCCESS" => Ok(BuildStatus::Success),
            "FAILED" => Ok(BuildStatus::Failed),
            "CANCELLED" => Ok(BuildStatus::Cancelled),
            _ => Err(Error::InvalidInput(format!("unknown build status: {}", s))),
        }
    }
}

/// One execution attempt of a project's pipeline for a specific commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: ResourceId,
    pub project_id: ResourceId,
    pub commit_hash: String,
    pub commit_message: String,
    pub branch: String,
    pub status: BuildStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Build {
    /// A fresh pending build.
    pub fn new(
        project_id: ResourceId,
        commit_hash: impl Into<String>,
        commit_message: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id: ResourceId::new(),
            project_id,
            commit_hash: commit_hash.into(),
            commit_message: commit_message.into(),
            branch: branch.into(),
            status: BuildStatus::Pending,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    /// Enter `Running`. Only a pending build can start.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != BuildStatus::Pending {
            return Err(Error::Conflict(format!(
                "build {} cannot start from {}",
                self.id, self.status
            )));
        }
        self.status = BuildStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    /// Enter a terminal state.
    ///
    /// `finished_at` is clamped so it never precedes `started_at`, even if
    /// the wall clock stepped backwards during the build.
    pub fn finish(&mut self, status: BuildStatus, at: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is not a terminal status",
                status
            )));
        }
        let allowed = match self.status {
            BuildStatus::Running => true,
            BuildStatus::Pending => status == BuildStatus::Cancelled,
            _ => false,
        };
        if !allowed {
            return Err(Error::Conflict(format!(
                "build {} cannot move from {} to {}",
                self.id, self.status, status
            )));
        }
        let finished_at = match self.started_at {
            Some(started) if at < started => started,
            _ => at,
        };
        self.status = status;
        self.finished_at = Some(finished_at);
        Ok(())
    }

    /// Wall time spent running, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// A repository connected to Kiln. Read-only to the build pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ResourceId,
    pub name: String,
    pub repo_url: String,
    pub github_repo_id: Option<String>,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            name: name.into(),
            repo_url: repo_url.into(),
            github_repo_id: None,
            default_branch: "main".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A queued reference to a build that should be executed.
///
/// Travels on the queue as `{"build_id":"<uuid>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub build_id: ResourceId,
}

impl Job {
    pub fn new(build_id: ResourceId) -> Self {
        Self { build_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_build() -> Build {
        Build::new(ResourceId::new(), "abc123", "fix tests", "main")
    }

    #[test]
    fn test_new_build_is_pending() {
        let build = make_build();
        assert_eq!(build.status, BuildStatus::Pending);
        assert!(build.started_at.is_none());
        assert!(build.finished_at.is_none());
    }

    #[test]
    fn test_start_then_finish() {
        let mut build = make_build();
        let t0 = Utc::now();
        build.start(t0).unwrap();
        assert_eq!(build.status, BuildStatus::Running);
        assert_eq!(build.started_at, Some(t0));

        build.finish(BuildStatus::Success, t0 + Duration::seconds(3)).unwrap();
        assert_eq!(build.status, BuildStatus::Success);
        assert_eq!(build.duration(), Some(Duration::seconds(3)));
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut build = make_build();
        build.start(Utc::now()).unwrap();
        assert!(matches!(build.start(Utc::now()), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_only_one_terminal_transition() {
        let mut build = make_build();
        build.start(Utc::now()).unwrap();
        build.finish(BuildStatus::Failed, Utc::now()).unwrap();
        let err = build.finish(BuildStatus::Success, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(build.status, BuildStatus::Failed);
    }

    #[test]
    fn test_finish_requires_terminal_status() {
        let mut build = make_build();
        build.start(Utc::now()).unwrap();
        let err = build.finish(BuildStatus::Running, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_pending_can_only_be_cancelled() {
        let mut build = make_build();
        assert!(build.finish(BuildStatus::Failed, Utc::now()).is_err());
        build.finish(BuildStatus::Cancelled, Utc::now()).unwrap();
        assert_eq!(build.status, BuildStatus::Cancelled);
        assert!(build.started_at.is_none());
    }

    #[test]
    fn test_finished_at_never_precedes_started_at() {
        let mut build = make_build();
        let t0 = Utc::now();
        build.start(t0).unwrap();
        build.finish(BuildStatus::Failed, t0 - Duration::seconds(10)).unwrap();
        assert!(build.finished_at.unwrap() >= build.started_at.unwrap());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&BuildStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
        assert_eq!("failed".parse::<BuildStatus>().unwrap(), BuildStatus::Failed);
        assert!("exploded".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_job_wire_format() {
        let id: ResourceId = "0190a5b2-7c1e-7d3a-9f00-0123456789ab".parse().unwrap();
        let json = serde_json::to_string(&Job::new(id)).unwrap();
        assert_eq!(json, r#"{"build_id":"0190a5b2-7c1e-7d3a-9f00-0123456789ab"}"#);
    }
}
