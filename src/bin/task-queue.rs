//! # Task Queue Admin CLI
//!
//! Operator tool for the PostgreSQL-backed queue: apply migrations, validate
//! and sync configuration, inspect and cancel tasks, watch queue metrics.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use task_queue::config::ConfigManager;
use task_queue::database::{DatabaseConnection, DatabaseMigrations};
use task_queue::models::{PageRequest, TaskFilter};
use task_queue::queue::TaskQueue;
use task_queue::state_machine::TaskStatus;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "task-queue")]
#[command(about = "Administer the task queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to load (development, test, production, ...)
    #[arg(short, long, env = "TASK_QUEUE_ENV")]
    environment: Option<String>,

    /// Configuration directory (default: config)
    #[arg(short, long, env = "TASK_QUEUE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply outstanding database migrations
    Migrate,

    /// Load and validate configuration, printing it with secrets masked
    ValidateConfig,

    /// Task type administration
    Types {
        #[command(subcommand)]
        command: TypeCommands,
    },

    /// Task inspection and cancellation
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Print task counts per status and any threshold alerts
    Metrics,

    /// Check queue metrics on the configured interval until interrupted
    Monitor,
}

#[derive(Subcommand)]
pub enum TypeCommands {
    /// List registered task types
    List,
    /// Upsert the task types declared in configuration
    Sync,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List tasks, newest first
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },
    /// Show a task with its dependencies and log
    Show { id: Uuid },
    /// Cancel a task that has not reached a terminal state
    Cancel { id: Uuid },
}

#[tokio::main]
async fn main() {
    task_queue::logging::init_structured_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)?;
    let config = manager.config();

    match cli.command {
        Commands::ValidateConfig => {
            println!("{}", serde_json::to_string_pretty(&manager.sanitized())?);
            println!("Configuration for '{}' is valid", manager.environment());
        }
        Commands::Migrate => {
            let mut database = config.database.clone();
            database.run_migrations = false;
            let connection = DatabaseConnection::connect(&database).await?;
            DatabaseMigrations::run_all(connection.pool()).await?;
            info!("Migrations applied");
            connection.close().await;
        }
        Commands::Types { command } => {
            let queue = TaskQueue::connect(config).await?;
            match command {
                TypeCommands::Sync => {
                    let synced = queue.task_types().seed(&config.task_types).await?;
                    println!("Synced {} task type(s)", synced.len());
                }
                TypeCommands::List => {
                    let types = queue.admin().list_task_types().await?;
                    println!("{}", serde_json::to_string_pretty(&types)?);
                }
            }
        }
        Commands::Tasks { command } => {
            let queue = TaskQueue::connect(config).await?;
            let admin = queue.admin();
            match command {
                TaskCommands::List {
                    status,
                    task_type,
                    page,
                    per_page,
                } => {
                    let filter = TaskFilter {
                        status,
                        task_type,
                        ..TaskFilter::default()
                    };
                    let page = admin
                        .list_tasks(&filter, PageRequest::new(page, per_page)?)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&page)?);
                }
                TaskCommands::Show { id } => {
                    let detail = admin.task_detail(id).await?;
                    println!("{}", serde_json::to_string_pretty(&detail)?);
                }
                TaskCommands::Cancel { id } => {
                    let task = admin.cancel(id).await?;
                    println!("Task {} is now {}", task.id, task.status);
                }
            }
        }
        Commands::Metrics => {
            let queue = TaskQueue::connect(config).await?;
            let report = queue.monitor(config.monitor.clone()).check().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Monitor => {
            let queue = TaskQueue::connect(config).await?;
            let handle = queue.monitor(config.monitor.clone()).start();
            tokio::signal::ctrl_c().await?;
            handle.stop().await;
        }
    }

    Ok(())
}
