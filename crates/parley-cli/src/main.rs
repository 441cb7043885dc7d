//! Parley CLI
//!
//! Command-line interface for Parley - a two-party chat client.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley - chat that stays in sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show endpoints, session and connection policy
    Status,
    /// List conversations, most recent first
    #[command(alias = "ls")]
    Conversations,
    /// Print the messages of a conversation
    Messages {
        /// Conversation ID
        conversation_id: String,
        /// Load this many pages back (page 1 = newest)
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Send a message
    Send {
        /// Conversation ID
        conversation_id: String,
        /// Message text
        text: String,
    },
    /// Start (or find) the conversation with someone
    Start {
        /// User ID of the other participant
        participant: String,
    },
    /// Go live and print updates until Ctrl-C
    Watch {
        /// Only watch (and send to) this conversation
        conversation_id: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, push_url, token, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_deref();

    // Config commands work even with a broken session
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(&config, &output),
        Commands::Conversations => commands::conversations::list(&config, &output).await,
        Commands::Messages {
            conversation_id,
            page,
        } => commands::messages::show(&config, conversation_id, page, &output).await,
        Commands::Send {
            conversation_id,
            text,
        } => commands::send::send(&config, conversation_id, text, &output).await,
        Commands::Start { participant } => {
            commands::start::start(&config, participant, &output).await
        }
        Commands::Watch { conversation_id } => {
            commands::watch::watch(&config, conversation_id, &output).await
        }
    }
}

/// Initialize file-based logging
///
/// Logs go to `config.log_path()` so terminal output stays clean.
/// `PARLEY_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    let log_level = std::env::var("PARLEY_LOG").unwrap_or_else(|_| config.log_level.clone());
    let log_path = config.log_path();

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    let env_filter = EnvFilter::new(format!(
        "parley_core={},parley_cli={}",
        log_level, log_level
    ));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
