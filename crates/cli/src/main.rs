//! Stepwise CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Answer one question with the reasoning loop
//! - `tools`   — List the built-in tools
//! - `config`  — Show the effective or default configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise — a bounded Thought/Action/Observation reasoning loop",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        /// The question to answer
        query: String,

        /// Override the configured step budget
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available tools and their parameters
    Tools {
        /// Print JSON schemas instead of the prompt listing
        #[arg(long)]
        json: bool,
    },

    /// Show configuration
    Config {
        /// Print the built-in defaults as TOML
        #[arg(long)]
        default: bool,
    },
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

    match cli.command {
        Commands::Ask {
            query,
            max_steps,
            json,
        } => commands::ask::run(query, max_steps, json).await?,
        Commands::Tools { json } => commands::tools::run(json)?,
        Commands::Config { default } => {
            if default {
                commands::config_cmd::defaults()
            } else {
                commands::config_cmd::show()?
            }
        }
    }

    Ok(())
}
