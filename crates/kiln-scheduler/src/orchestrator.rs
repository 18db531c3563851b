//! Build executor: runs one build from checkout to final status.

use async_trait::async_trait;
use chrono::Utc;
use kiln_config::{ConfigError, VariableContext, load_manifest};
use kiln_core::executor::{LogSink, StepRunner, StepSpec};
use kiln_core::logs::LogBus;
use kiln_core::pipeline::{Pipeline, Step};
use kiln_core::secret::SecretStore;
use kiln_core::source::SourceFetcher;
use kiln_core::store::{BuildStore, ProjectStore};
use kiln_core::{Build, BuildStatus, Job, Project, ResourceId};
use kiln_executor::BuildLogWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::workspace::Workspace;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("build {id} is {status}, only PENDING builds can run")]
    InvalidState { id: ResourceId, status: BuildStatus },

    #[error("store error: {0}")]
    Store(#[source] kiln_core::Error),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("infrastructure error: {0}")]
    Infrastructure(#[source] kiln_core::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] ConfigError),

    #[error("step '{step}' failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i64 },
}

/// Something that can process a dequeued job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), BuildError>;
}

/// Drives a build through `PENDING -> RUNNING -> SUCCESS | FAILED`.
pub struct BuildExecutor {
    builds: Arc<dyn BuildStore>,
    projects: Arc<dyn ProjectStore>,
    runner: Arc<dyn StepRunner>,
    logs: Arc<dyn LogBus>,
    fetcher: Arc<dyn SourceFetcher>,
    secrets: Option<Arc<dyn SecretStore>>,
    /// Parent directory for workspaces; the system temp dir when `None`.
    workspace_root: Option<PathBuf>,
}

impl BuildExecutor {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        projects: Arc<dyn ProjectStore>,
        runner: Arc<dyn StepRunner>,
        logs: Arc<dyn LogBus>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            builds,
            projects,
            runner,
            logs,
            fetcher,
            secrets: None,
            workspace_root: None,
        }
    }

    /// Inject project secrets into every step environment.
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Run a pending build to completion.
    ///
    /// The terminal status is persisted before this returns. On failure the
    /// error that ended the build is returned; callers must not retry it.
    pub async fn execute(&self, build_id: ResourceId) -> Result<(), BuildError> {
        let mut build = self
            .builds
            .get_by_id(build_id)
            .await
            .map_err(BuildError::Store)?
            .ok_or_else(|| BuildError::NotFound(format!("build {}", build_id)))?;

        if build.status != BuildStatus::Pending {
            return Err(BuildError::InvalidState {
                id: build.id,
                status: build.status,
            });
        }

        let project = self
            .projects
            .get_by_id(build.project_id)
            .await
            .map_err(BuildError::Store)?
            .ok_or_else(|| BuildError::NotFound(format!("project {}", build.project_id)))?;

        let started_at = Utc::now();
        build.start(started_at).map_err(BuildError::Store)?;
        match self.builds.mark_running(build.id, started_at).await {
            Ok(()) => {}
            Err(kiln_core::Error::Conflict(_)) => {
                // Another job for the same build got there first.
                let status = self
                    .builds
                    .get_by_id(build.id)
                    .await
                    .ok()
                    .flatten()
                    .map_or(BuildStatus::Running, |b| b.status);
                warn!(build_id = %build.id, %status, "Build already started elsewhere");
                return Err(BuildError::InvalidState {
                    id: build.id,
                    status,
                });
            }
            Err(e) => return Err(BuildError::Store(e)),
        }
        info!(build_id = %build.id, project = %project.name, "Build started");

        let outcome = self.run(&build, &project).await;

        match outcome {
            Ok(()) => {
                self.finish(&mut build, BuildStatus::Success).await?;
                info!(build_id = %build.id, "Build succeeded");
                Ok(())
            }
            Err(e) => {
                error!(build_id = %build.id, error = %e, "Build failed");
                if let Err(store_err) = self.finish(&mut build, BuildStatus::Failed).await {
                    error!(
                        build_id = %build.id,
                        error = %store_err,
                        "Failed to record build failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn finish(&self, build: &mut Build, status: BuildStatus) -> Result<(), BuildError> {
        build.finish(status, Utc::now()).map_err(BuildError::Store)?;
        self.builds.update(build).await.map_err(BuildError::Store)
    }

    /// Everything between RUNNING and the terminal transition.
    async fn run(&self, build: &Build, project: &Project) -> Result<(), BuildError> {
        let mut workspace = Workspace::create(self.workspace_root.as_deref(), &build.id)?;

        let result = self.run_in(build, project, workspace.path()).await;

        if let Err(e) = workspace.cleanup() {
            warn!(
                build_id = %build.id,
                path = %workspace.path().display(),
                error = %e,
                "Failed to remove workspace"
            );
        }
        result
    }

    async fn run_in(
        &self,
        build: &Build,
        project: &Project,
        workspace: &Path,
    ) -> Result<(), BuildError> {
        self.fetcher
            .fetch(project, build, workspace)
            .await
            .map_err(BuildError::Infrastructure)?;

        let pipeline = load_manifest(workspace)?;
        info!(
            build_id = %build.id,
            image = %pipeline.image,
            steps = pipeline.steps.len(),
            "Loaded pipeline"
        );

        let mut vars = VariableContext::for_build(build, project);
        if let Some(store) = &self.secrets {
            vars.secrets = store
                .list_by_project(project.id)
                .await
                .map_err(BuildError::Infrastructure)?;
            info!(build_id = %build.id, count = vars.secrets.len(), "Loaded project secrets");
        }
        let sink: Arc<dyn LogSink> = Arc::new(BuildLogWriter::new(self.logs.clone(), &build.id));

        for (index, step) in pipeline.steps.iter().enumerate() {
            let spec = step_spec(build, &pipeline, index, step, &vars, workspace);
            info!(build_id = %build.id, step = %step.name, index, "Running step");

            match self.runner.run_step(&spec, sink.clone()).await {
                Ok(0) => {}
                Ok(exit_code) => {
                    return Err(BuildError::StepFailed {
                        step: step.name.clone(),
                        exit_code,
                    });
                }
                Err(e) => return Err(BuildError::Infrastructure(e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for BuildExecutor {
    async fn handle(&self, job: &Job) -> Result<(), BuildError> {
        self.execute(job.build_id).await
    }
}

/// Resolve a manifest step into what the runner executes.
///
/// Precedence, lowest first: the standard `KILN_*` set, project secrets,
/// step-declared variables.
fn step_spec(
    build: &Build,
    pipeline: &Pipeline,
    index: usize,
    step: &Step,
    vars: &VariableContext,
    workspace: &Path,
) -> StepSpec {
    let ctx = vars.for_step(&step.name, index, &step.env);
    let mut env = ctx.standard_env();
    env.extend(ctx.secrets.clone());
    env.extend(ctx.interpolate_map(&step.env));

    StepSpec {
        build_id: build.id,
        index,
        name: step.name.clone(),
        image: pipeline.image.clone(),
        commands: ctx.interpolate_vec(&step.commands),
        env,
        workspace: workspace.to_path_buf(),
    }
}
