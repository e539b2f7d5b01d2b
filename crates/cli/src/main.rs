//! KeilPilot CLI: the main entry point.
//!
//! Commands:
//! - `chat`    Interactive chat or single-message mode
//! - `tools`   List the registered tools
//! - `config`  Show, validate or initialise configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod host;
mod surface;

#[derive(Parser)]
#[command(
    name = "keilpilot",
    about = "KeilPilot: chat with a model that can build your Keil uVision project",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.keilpilot/config.toml
    #[arg(long, global = true, env = "KEILPILOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Force a tool on the next model request (repeatable, used in order)
        #[arg(short, long = "tool")]
        tool: Vec<String>,
    },

    /// List registered tools and whether the model sees them automatically
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (default)
    Show,
    /// Print a starter configuration
    Default,
    /// Check the configuration for problems
    Validate,
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Chat { message, tool } => commands::chat::run(config, message, tool).await?,
        Commands::Tools => commands::tools::run(config).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(config).await?,
            ConfigAction::Default => commands::config_cmd::print_default().await?,
            ConfigAction::Validate => commands::config_cmd::validate(config).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config, force).await?,
            ConfigAction::Path => commands::config_cmd::path(config).await?,
        },
    }

    Ok(())
}
