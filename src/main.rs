// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Panopticon: Discord Message Archiver
//!
//! Connects to the Discord gateway as a bot and records messages, edits and
//! deletions from guild text channels and direct messages in PostgreSQL.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use panopticon::archive::Archiver;
use panopticon::config::{self, AppConfig};
use panopticon::db::Database;
use panopticon::gateway::shard::Shard;
use panopticon::rest::RestClient;
use panopticon::{PanopticonError, Result};

/// Queue between the gateway and the archive writer
const EVENT_QUEUE: usize = 1024;

/// Panopticon CLI - Discord Message Archiver
#[derive(Parser, Debug)]
#[command(name = "panopticon")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Archive Discord messages, edits and deletions to PostgreSQL", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to Discord and archive until stopped
    Run {
        /// Do not apply the schema on startup
        #[arg(long)]
        skip_migrate: bool,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Check the bot token and the database connection
    Status,
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Create the archive tables
    Init,

    /// Show row counts
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration (secrets masked)
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config::log_ansi())
        .init();

    dispatch(cli).await
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    // Generating must not depend on the file it replaces being readable
    let command = match cli.command {
        Some(Commands::Config { action: ConfigCommands::Generate { output, force } }) => {
            return generate_config(&output.unwrap_or(config_path), force);
        }
        other => other,
    };

    let mut config = AppConfig::load(&config_path)?;
    config.apply_env();

    match command {
        Some(Commands::Run { skip_migrate }) => run_archiver(config, skip_migrate).await,
        Some(Commands::Db { action }) => run_db_command(config, action).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &config_path),
        Some(Commands::Status) => run_status(config).await,
        None => {
            // Default: archive
            run_archiver(config, false).await
        }
    }
}

fn rest_client(config: &AppConfig) -> Result<RestClient> {
    RestClient::new(
        &config.discord.api_url,
        &config.discord.token,
        Duration::from_secs(config.discord.timeout_secs),
    )
}

/// Run the archiver until Ctrl+C / SIGTERM or a fatal gateway error
async fn run_archiver(config: AppConfig, skip_migrate: bool) -> Result<()> {
    config.validate()?;
    info!("Panopticon v{}", env!("CARGO_PKG_VERSION"));

    info!("Connecting to database...");
    let db = Database::connect(&config.database).await?;
    if config.database.auto_migrate && !skip_migrate {
        db.migrate().await?;
    }

    let rest = Arc::new(rest_client(&config)?);

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let archiver = Archiver::new(Arc::new(db.clone()), rest.clone(), config.discord.max_messages);
    let writer = tokio::spawn(archiver.run(event_rx));

    info!("Connecting to Discord...");
    let shard = Shard::new(rest, &config.discord.token);
    let result = shard.run(event_tx, shutdown_rx).await;

    // The shard dropped its sender; the writer drains what is queued and stops
    match writer.await {
        Ok(stats) => info!(
            "Archived {} messages, {} edits, {} deletions ({} failures)",
            stats.messages, stats.edits, stats.deletions, stats.failures
        ),
        Err(e) => error!("Archive writer panicked: {}", e),
    }

    db.close().await;
    info!("Panopticon stopped.");
    result
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Run database commands
async fn run_db_command(config: AppConfig, action: DbCommands) -> Result<()> {
    let db = Database::connect(&config.database).await?;

    match action {
        DbCommands::Init => {
            db.migrate().await?;
            println!("Database schema created");
        }
        DbCommands::Stats { json } => {
            let stats = db.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Archive Statistics:");
                for (table, count) in &stats.tables {
                    println!("  {:<20} {}", table, count);
                }
            }
        }
    }

    db.close().await;
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config.redacted())?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output, force } => {
            generate_config(output.as_deref().unwrap_or(config_path), force)?;
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Max cached messages: {}", config.discord.max_messages);
            println!("  Database: {}", config.redacted().database.dsn);
        }
    }

    Ok(())
}

fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(PanopticonError::Config(format!(
            "{:?} already exists. Use --force to overwrite",
            output
        )));
    }
    AppConfig::default().save(output)?;
    println!("Generated config at {:?}", output);
    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    println!("Panopticon v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    if config.discord.token.is_empty() {
        println!("Discord: no token configured");
    } else {
        let rest = rest_client(&config)?;
        match rest.current_user().await {
            Ok(user) => println!("Discord: logged in as {} ({})", user.username, user.id),
            Err(e) => println!("Discord: Error - {}", e),
        }
    }

    match Database::connect(&config.database).await {
        Ok(db) => {
            match db.ping().await {
                Ok(()) => println!("Database: reachable"),
                Err(e) => println!("Database: Error - {}", e),
            }
            match db.stats().await {
                Ok(stats) => {
                    println!("  Guild messages: {}", stats.count("guild_messages").unwrap_or(0));
                    println!("  Private messages: {}", stats.count("private_messages").unwrap_or(0));
                }
                Err(e) => warn!("Schema not initialised? {}", e),
            }
            db.close().await;
        }
        Err(e) => println!("Database: Error - {}", e),
    }

    Ok(())
}
