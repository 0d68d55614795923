//! Command-line surface: a `clap::Parser` root with nested `Subcommand`
//! enums for database, catalog, and queue operations.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, Settings};
use crate::models::QueueType;
use crate::repository::{self, CatalogRepository};
use crate::{daemon, fetcher, planner, snapshot};

#[derive(Parser)]
#[command(name = "fetchqueue")]
#[command(about = "Multi-tenant URL fetch catalog and fairness-aware download scheduler")]
#[command(version)]
pub struct Cli {
    /// Override the catalog database path.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database maintenance commands.
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Catalog ingestion commands.
    Url {
        #[command(subcommand)]
        command: UrlCommands,
    },
    /// Queue planning and fetch cycle commands.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Apply the catalog schema to the configured database.
    Migrate,
}

#[derive(Subcommand)]
enum UrlCommands {
    /// Add a URL to a collection, creating the app-scoped chain as needed.
    Add {
        /// App name the collection belongs to.
        app: String,
        /// URL to add.
        url: String,
        /// Collection name (defaults to "default").
        #[arg(long)]
        collection: Option<String>,
        /// Human-readable title (defaults to the URL itself).
        #[arg(long)]
        title: Option<String>,
        /// Minutes between scheduled re-fetches (0 disables updates).
        #[arg(long, default_value = "1440")]
        update_freq_minutes: i64,
        /// Repeatable key=value tag.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Build a bucket plan only, without fetching.
    Fetch {
        queue_type: QueueType,
        queue_dir: PathBuf,
    },
    /// Build a bucket plan, then run one fetch cycle against it.
    Download {
        queue_type: QueueType,
        queue_dir: PathBuf,
        output_dir: PathBuf,
        #[arg(default_value = "8")]
        concurrency: usize,
    },
    /// Run the snapshot/plan/fetch loop forever.
    Daemon {
        queue_type: QueueType,
        queue_dir: PathBuf,
        output_dir: PathBuf,
        #[arg(default_value = "8")]
        concurrency: usize,
    },
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("tag '{s}' must be in key=value form"))
}

/// Run the CLI, using the clap-parsed argv.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings().await;
    if let Some(database) = cli.database {
        settings = Settings {
            database_path: database,
            ..settings
        };
    }

    match cli.command {
        Commands::Db { command } => match command {
            DbCommands::Migrate => cmd_db_migrate(&settings).await,
        },
        Commands::Url { command } => match command {
            UrlCommands::Add {
                app,
                url,
                collection,
                title,
                update_freq_minutes,
                tags,
            } => {
                cmd_url_add(
                    &settings,
                    &app,
                    &url,
                    collection.as_deref(),
                    title.as_deref(),
                    update_freq_minutes,
                    &tags,
                )
                .await
            }
        },
        Commands::Queue { command } => match command {
            QueueCommands::Fetch {
                queue_type,
                queue_dir,
            } => cmd_queue_fetch(&settings, queue_type, &queue_dir).await,
            QueueCommands::Download {
                queue_type,
                queue_dir,
                output_dir,
                concurrency,
            } => cmd_queue_download(&settings, queue_type, &queue_dir, &output_dir, concurrency).await,
            QueueCommands::Daemon {
                queue_type,
                queue_dir,
                output_dir,
                concurrency,
            } => cmd_queue_daemon(&settings, queue_type, &queue_dir, &output_dir, concurrency).await,
        },
    }
}

async fn cmd_db_migrate(settings: &Settings) -> anyhow::Result<()> {
    let tables = repository::run_all_migrations(&settings.database_path)?;
    println!("catalog ready at {}", settings.database_path.display());
    for table in tables {
        println!("  {table}");
    }
    Ok(())
}

async fn cmd_url_add(
    settings: &Settings,
    app: &str,
    url: &str,
    collection: Option<&str>,
    title: Option<&str>,
    update_freq_minutes: i64,
    tags: &[(String, String)],
) -> anyhow::Result<()> {
    let repo = CatalogRepository::new(&settings.database_path)?;
    let tags: HashMap<String, String> = tags.iter().cloned().collect();
    let collection_url_id = repo.add_url(
        app,
        url,
        title,
        collection,
        &tags,
        serde_json::json!({}),
        update_freq_minutes,
    )?;
    println!("added collection_url {collection_url_id}");
    Ok(())
}

async fn cmd_queue_fetch(
    settings: &Settings,
    queue_type: QueueType,
    queue_dir: &std::path::Path,
) -> anyhow::Result<()> {
    let repo = CatalogRepository::new(&settings.database_path)?;
    std::fs::create_dir_all(queue_dir)?;
    let snap = snapshot::build(&repo)?;
    let result = planner::plan(queue_dir, queue_type, &snap, &repo)?;
    println!("queued {} urls at {}", result.total_queued, result.queue_path.display());
    Ok(())
}

async fn cmd_queue_download(
    settings: &Settings,
    queue_type: QueueType,
    queue_dir: &std::path::Path,
    output_dir: &std::path::Path,
    concurrency: usize,
) -> anyhow::Result<()> {
    let repo = CatalogRepository::new(&settings.database_path)?;
    std::fs::create_dir_all(queue_dir)?;
    let snap = snapshot::build(&repo)?;
    let plan_result = planner::plan(queue_dir, queue_type, &snap, &repo)?;
    println!("queued {} urls", plan_result.total_queued);

    let timeout_seconds = match queue_type {
        QueueType::Timedout => crate::constants::MAX_TIMEOUT_SECONDS,
        _ => settings.min_timeout_seconds,
    };
    let outcome =
        fetcher::run_cycle(queue_dir, output_dir, concurrency, timeout_seconds, &repo).await?;
    println!(
        "fetched {}/{} (new={} existing={} errors={} timeouts={})",
        outcome.completed,
        outcome.total_lines,
        outcome.stats.num_new_hash_id,
        outcome.stats.num_existing_hash_id,
        outcome.stats.num_error_urls,
        outcome.stats.num_timeout_urls,
    );
    Ok(())
}

async fn cmd_queue_daemon(
    settings: &Settings,
    queue_type: QueueType,
    queue_dir: &std::path::Path,
    output_dir: &std::path::Path,
    concurrency: usize,
) -> anyhow::Result<()> {
    let repo = CatalogRepository::new(&settings.database_path)?;
    daemon::run_forever(queue_type, queue_dir, output_dir, concurrency, &repo).await?;
    Ok(())
}
