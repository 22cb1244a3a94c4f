//! Parley CLI entry point.
//!
//! Commands:
//! - `serve`          Start the HTTP gateway
//! - `memory stats`   Show memory settings and record count
//! - `memory search`  Vector search over stored memories

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: streamed chat backend with long-term memory",
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
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect long-term memory
    Memory {
        #[command(subcommand)]
        action: MemoryCommand,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Show settings, record count and index size
    Stats,

    /// Search memories nearest to a query
    Search {
        query: String,

        /// Maximum results (defaults to memory.search_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
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
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Memory { action } => match action {
            MemoryCommand::Stats => commands::memory::stats().await?,
            MemoryCommand::Search { query, limit, json } => {
                commands::memory::search(&query, limit, json).await?
            }
        },
    }

    Ok(())
}
