//! `kiln worker`: pop jobs and run builds in Docker.

use anyhow::{Context, Result};
use kiln_config::SystemConfig;
use kiln_db::{
    PgBuildStore, PgLogBus, PgProjectStore, PgSecretStore, SecretCipher, create_pool,
};
use kiln_executor::{DockerRunner, GitCheckout};
use kiln_scheduler::{BuildExecutor, PgJobQueue, WorkerPool, shutdown_signal};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(config: &SystemConfig) -> Result<()> {
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let runner = DockerRunner::new().context("Failed to connect to Docker")?;
    runner.ping().await?;

    let mut executor = BuildExecutor::new(
        Arc::new(PgBuildStore::new(pool.clone())),
        Arc::new(PgProjectStore::new(pool.clone())),
        Arc::new(runner),
        Arc::new(PgLogBus::new(pool.clone())),
        Arc::new(GitCheckout::new()),
    );
    if let Some(root) = &config.workspace_root {
        executor = executor.with_workspace_root(root);
    }
    match &config.encryption_key {
        Some(key) => {
            let cipher = SecretCipher::new(key.as_bytes())?;
            executor = executor.with_secrets(Arc::new(PgSecretStore::new(pool.clone(), cipher)));
        }
        None => warn!("KILN_ENCRYPTION_KEY is not set; builds run without project secrets"),
    }

    let pool_name = format!("worker-{}", std::process::id());
    let workers = WorkerPool::new(
        &pool_name,
        config.worker_concurrency,
        Arc::new(PgJobQueue::new(pool)),
        Arc::new(executor),
        config.poll_timeout,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested; finishing in-flight builds");
        let _ = shutdown_tx.send(true);
    });

    info!(
        workers = workers.len(),
        poll_timeout_secs = config.poll_timeout.as_secs(),
        "Worker pool started"
    );
    workers.run(shutdown_rx).await;
    info!("Worker pool stopped");
    Ok(())
}
