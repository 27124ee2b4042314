//! # tasksync
//!
//! Command-line front end for tasksync.
//!
//! ## Commands
//!
//! - `init`: Create the data directory, config and local store
//! - `add-task` / `add-project`: Record new items locally
//! - `complete`: Mark a task done
//! - `list` / `projects`: Read through the cache
//! - `sync`: Run one sync cycle against the shared remote
//! - `status`: Show store and remote status
//! - `watch`: Keep syncing on an interval
//!
//! ## Example
//!
//! ```bash
//! # Initialize against a shared folder
//! tasksync init --remote-dir /mnt/share/tasks
//!
//! # Add a task for tomorrow
//! tasksync add-task "Water the plants" --project Home --due 2025-06-16
//!
//! # Sync now
//! tasksync sync
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasksync_types::TaskPriority;

mod commands;
mod config;

use commands::{init, list, status, sync, task};
use config::Workspace;

/// Offline-first task sync.
#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the local store and configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: <data-dir>/tasksync.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the configuration and an empty local store
    Init {
        /// Shared directory used as the remote
        #[arg(long)]
        remote_dir: Option<PathBuf>,
    },

    /// Add a task
    AddTask {
        /// Task name
        name: String,

        /// Project name
        #[arg(long, short)]
        project: Option<String>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,

        /// Priority (low, medium, high)
        #[arg(long)]
        priority: Option<TaskPriority>,
    },

    /// Add a project
    AddProject {
        /// Project name
        name: String,

        /// Description
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Mark a task complete
    Complete {
        /// Task id or unique id prefix
        id: String,
    },

    /// List tasks
    List {
        /// Only tasks due on this date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "project")]
        date: Option<NaiveDate>,

        /// Only tasks in this project
        #[arg(long, conflicts_with = "date")]
        project: Option<String>,
    },

    /// List projects
    Projects,

    /// Run one sync cycle
    Sync,

    /// Show store and remote status
    Status,

    /// Keep syncing on an interval until interrupted
    Watch {
        /// Seconds between syncs (default: from config)
        #[arg(long)]
        interval: Option<u64>,

        /// Exit after this many completed syncs
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    match cli.command {
        Commands::Init { remote_dir } => {
            init::run(&data_dir, cli.config.as_deref(), remote_dir.as_deref()).await?;
        }
        command => {
            let workspace = Workspace::open(&data_dir, cli.config.as_deref())?;
            run_command(workspace, command).await?;
        }
    }

    Ok(())
}

/// Run a command against an opened workspace.
async fn run_command(workspace: Workspace, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => {
            anyhow::bail!("init does not run against an opened workspace");
        }
        Commands::AddTask {
            name,
            project,
            due,
            priority,
        } => {
            task::add_task(&workspace, &name, project.as_deref(), due, priority).await?;
        }
        Commands::AddProject { name, description } => {
            task::add_project(&workspace, &name, description.as_deref()).await?;
        }
        Commands::Complete { id } => {
            task::complete(&workspace, &id).await?;
        }
        Commands::List { date, project } => {
            list::tasks(&workspace, date, project.as_deref()).await?;
        }
        Commands::Projects => {
            list::projects(&workspace).await?;
        }
        Commands::Sync => {
            sync::run(&workspace).await?;
        }
        Commands::Status => {
            status::run(&workspace).await?;
        }
        Commands::Watch { interval, count } => {
            sync::watch(workspace, interval, count).await?;
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Get the default data directory for tasksync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "tasksync", "tasksync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
