//! CLI command implementations.

pub mod worker;

use anyhow::{Context, Result, bail};
use kiln_config::SystemConfig;
use kiln_core::store::{BuildStore, ProjectStore};
use kiln_core::{BuildStatus, Job, Project, ResourceId};
use kiln_db::{
    PgBuildStore, PgProjectStore, PgSecretStore, SecretCipher, create_pool, run_migrations,
};
use kiln_scheduler::{JobQueue, PgJobQueue, TriggerRequest, trigger_build};
use std::path::Path;

pub async fn migrate(config: &SystemConfig) -> Result<()> {
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    println!("Migrations applied");
    Ok(())
}

pub async fn add_project(
    config: &SystemConfig,
    name: String,
    repo_url: String,
    default_branch: String,
    github_repo_id: Option<String>,
) -> Result<()> {
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let mut project = Project::new(name, repo_url);
    project.default_branch = default_branch;
    project.github_repo_id = github_repo_id;
    PgProjectStore::new(pool).create(&project).await?;

    println!("Created project {} ({})", project.name, project.id);
    Ok(())
}

async fn secret_store(config: &SystemConfig) -> Result<PgSecretStore> {
    let key = config
        .encryption_key
        .as_deref()
        .context("KILN_ENCRYPTION_KEY must be set to manage secrets")?;
    let cipher = SecretCipher::new(key.as_bytes())?;
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(PgSecretStore::new(pool, cipher))
}

pub async fn set_secret(
    config: &SystemConfig,
    project_id: &str,
    name: &str,
    value: &str,
) -> Result<()> {
    let project_id: ResourceId = project_id.parse()?;
    if !is_env_name(name) {
        bail!("Invalid secret name '{}': use letters, digits and underscores", name);
    }
    secret_store(config).await?.set(project_id, name, value).await?;
    println!("Stored secret {} for project {}", name, project_id);
    Ok(())
}

pub async fn delete_secret(config: &SystemConfig, project_id: &str, name: &str) -> Result<()> {
    let project_id: ResourceId = project_id.parse()?;
    if secret_store(config).await?.delete(project_id, name).await? {
        println!("Deleted secret {} for project {}", name, project_id);
    } else {
        println!("No secret {} for project {}", name, project_id);
    }
    Ok(())
}

/// Secret names become environment variables and `${secrets.NAME}`.
fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Queue an existing pending build again, e.g. after its job was lost.
pub async fn enqueue(config: &SystemConfig, build_id: &str) -> Result<()> {
    let build_id: ResourceId = build_id.parse()?;
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let build = PgBuildStore::new(pool.clone())
        .get_by_id(build_id)
        .await?
        .with_context(|| format!("Build {} not found", build_id))?;
    if build.status != BuildStatus::Pending {
        bail!("Build {} is {}; only pending builds can be queued", build_id, build.status);
    }

    PgJobQueue::new(pool).enqueue(&Job::new(build_id)).await?;
    println!("Queued build {}", build_id);
    Ok(())
}

pub async fn trigger(
    config: &SystemConfig,
    project_id: &str,
    branch: Option<String>,
    commit: Option<String>,
    message: Option<String>,
) -> Result<()> {
    let project_id: ResourceId = project_id.parse()?;
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let project = PgProjectStore::new(pool.clone())
        .get_by_id(project_id)
        .await?
        .with_context(|| format!("Project {} not found", project_id))?;

    let request = TriggerRequest {
        branch,
        commit_hash: commit,
        commit_message: message,
    };
    let builds = PgBuildStore::new(pool.clone());
    let queue = PgJobQueue::new(pool);
    let build = trigger_build(&builds, &queue, &project, request).await?;

    println!("Queued build {} for {} ({})", build.id, project.name, build.branch);
    Ok(())
}

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let pipeline = kiln_config::parse_manifest(&content)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;

    println!("Manifest is valid");
    println!("  image: {}", pipeline.image);
    for (index, step) in pipeline.steps.iter().enumerate() {
        println!("  {}. {} ({} commands)", index + 1, step.name, step.commands.len());
    }
    Ok(())
}
