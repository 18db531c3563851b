//! Kiln command line tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln build orchestrator", long_about = None)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run build workers until interrupted
    Worker {
        /// Number of builds to run at once
        #[arg(long, env = "KILN_WORKER_CONCURRENCY")]
        concurrency: Option<usize>,
        /// Seconds to wait on an empty queue before checking for shutdown
        #[arg(long, env = "KILN_POLL_TIMEOUT_SECS")]
        poll_timeout: Option<u64>,
        /// Directory to create build workspaces in
        #[arg(long, env = "KILN_WORKSPACE_ROOT")]
        workspace_root: Option<PathBuf>,
    },
    /// Apply database migrations
    Migrate,
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Manage project secrets
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
    /// Queue an existing build
    Enqueue {
        /// Build ID
        build_id: String,
    },
    /// Create a build for a project and queue it
    Trigger {
        /// Project ID
        project_id: String,
        /// Branch label for the build (defaults to the project's default
        /// branch). The checkout always uses the repository's default ref.
        #[arg(long)]
        branch: Option<String>,
        /// Commit the build is for
        #[arg(long)]
        commit: Option<String>,
        /// Commit message
        #[arg(long)]
        message: Option<String>,
    },
    /// Validate a pipeline manifest
    Validate {
        /// Path to the manifest
        #[arg(default_value = kiln_config::MANIFEST_FILE)]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Register a repository
    Add {
        /// Display name
        name: String,
        /// Clone URL
        repo_url: String,
        /// Branch builds use when none is given
        #[arg(long, default_value = "main")]
        default_branch: String,
        /// GitHub repository id, for webhook lookups
        #[arg(long)]
        github_repo_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Create or replace a secret; requires KILN_ENCRYPTION_KEY
    Set {
        /// Project ID
        project_id: String,
        /// Variable name the secret is exposed as
        name: String,
        /// Secret value
        value: String,
    },
    /// Remove a secret
    Delete {
        /// Project ID
        project_id: String,
        /// Secret name
        name: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("KILN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(database_url: Option<String>) -> anyhow::Result<kiln_config::SystemConfig> {
    let mut config = kiln_config::SystemConfig::from_env()?;
    if let Some(url) = database_url {
        config.database_url = url;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Worker {
            concurrency,
            poll_timeout,
            workspace_root,
        } => {
            let mut config = load_config(cli.database_url)?;
            if let Some(n) = concurrency {
                config.worker_concurrency = n.max(1);
            }
            if let Some(secs) = poll_timeout {
                config.poll_timeout = std::time::Duration::from_secs(secs.max(1));
            }
            if workspace_root.is_some() {
                config.workspace_root = workspace_root;
            }
            commands::worker::run(&config).await?;
        }
        Commands::Migrate => {
            commands::migrate(&load_config(cli.database_url)?).await?;
        }
        Commands::Project { command } => match command {
            ProjectCommands::Add {
                name,
                repo_url,
                default_branch,
                github_repo_id,
            } => {
                let config = load_config(cli.database_url)?;
                commands::add_project(&config, name, repo_url, default_branch, github_repo_id)
                    .await?;
            }
        },
        Commands::Secret { command } => {
            let config = load_config(cli.database_url)?;
            match command {
                SecretCommands::Set {
                    project_id,
                    name,
                    value,
                } => commands::set_secret(&config, &project_id, &name, &value).await?,
                SecretCommands::Delete { project_id, name } => {
                    commands::delete_secret(&config, &project_id, &name).await?
                }
            }
        }
        Commands::Enqueue { build_id } => {
            commands::enqueue(&load_config(cli.database_url)?, &build_id).await?;
        }
        Commands::Trigger {
            project_id,
            branch,
            commit,
            message,
        } => {
            let config = load_config(cli.database_url)?;
            commands::trigger(&config, &project_id, branch, commit, message).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
