use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use foldread::app::{AppError, AppState};
use foldread::config::Config;
use foldread::outline::OutlineNode;
use foldread::reconcile::SubscriptionRequest;
use foldread::storage::{Database, StoreError};

/// Get the config directory path (~/.config/foldread/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("foldread"))
}

/// Marks errors that may clear up when the command is run again.
fn with_retry_hint(err: AppError) -> anyhow::Error {
    if err.is_retryable() {
        anyhow::Error::new(err).context("Temporary failure, try the command again")
    } else {
        err.into()
    }
}

#[derive(Parser, Debug)]
#[command(name = "foldread", about = "Manage foldered feed subscriptions")]
struct Args {
    /// User whose subscriptions to operate on
    #[arg(long, default_value = "default")]
    user: String,

    /// Config file (defaults to ~/.config/foldread/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add {
        url: String,
        /// Folder to file the feed under
        #[arg(long)]
        folder: Option<String>,
        /// Display title (defaults to the feed's own title)
        #[arg(long)]
        title: Option<String>,
    },
    /// Import subscriptions from an OPML file
    Import { file: PathBuf },
    /// Export subscriptions as OPML (to stdout when no file is given)
    Export { file: Option<PathBuf> },
    /// List subscriptions
    List,
    /// List every known feed, or the stored stories of one feed
    Feeds {
        url: Option<String>,
        /// Show at most this many stories
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path_in(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!("Error: The database is busy. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let state = AppState::new(config, db).context("Failed to create application")?;

    match args.command {
        Command::Add { url, folder, title } => {
            let request = SubscriptionRequest { url, title, folder };
            let reference = state
                .add_subscription(&args.user, request)
                .await
                .map_err(with_retry_hint)?;
            println!("Subscribed to {} ({})", reference.title, reference.url);
        }
        Command::Import { file } => {
            let document = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read OPML file: {}", file.display()))?;
            let report = state
                .import_opml(&args.user, &document)
                .await
                .map_err(with_retry_hint)?;
            println!(
                "Imported {} feeds ({} already subscribed)",
                report.merged.added, report.merged.skipped
            );
            for failure in &report.failed {
                eprintln!("  skipped {}: {}", failure.url, failure.reason);
            }
        }
        Command::Export { file: Some(path) } => {
            let count = state.export_to_file(&args.user, &path).await?;
            println!("Exported {} feeds to {}", count, path.display());
        }
        Command::Export { file: None } => {
            print!("{}", state.export_opml(&args.user).await?);
        }
        Command::List => {
            let tree = state.subscriptions(&args.user).await?;
            for node in &tree.outlines {
                match node {
                    OutlineNode::FeedReference(feed) => println!("{}  {}", feed.title, feed.url),
                    OutlineNode::Folder(folder) => {
                        println!("[{}]", folder.title);
                        for child in &folder.children {
                            if let OutlineNode::FeedReference(feed) = child {
                                println!("  {}  {}", feed.title, feed.url);
                            }
                        }
                    }
                }
            }
        }
        Command::Feeds { url: None, .. } => {
            for feed in state.feeds().await? {
                println!("{}  {}", feed.title, feed.url);
            }
        }
        Command::Feeds {
            url: Some(url),
            limit,
        } => {
            for story in state.stories(&url).await?.iter().take(limit) {
                println!(
                    "{}  {}  {}",
                    story.published.format("%Y-%m-%d"),
                    story.title,
                    story.link.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
