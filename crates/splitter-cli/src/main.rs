//! CLI for the universe splitter: one quantum coin flip per idempotency id.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::EngineArgs;

#[derive(Parser)]
#[command(name = "universe-splitter")]
#[command(about = "universe-splitter: one quantum-random value per idempotency id, recorded once")]
#[command(version = splitter_core::VERSION)]
struct Cli {
    /// SQLite database holding operations and counters (in-memory when omitted)
    #[arg(long, global = true, env = "SPLITTER_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "9000")]
        port: u16,

        /// Per-request deadline in seconds
        #[arg(long, default_value = "30")]
        request_timeout_sec: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run one split in-process and print the outcome as JSON
    Split {
        /// Idempotency id (random UUID when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout_sec: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print the operation and replay counters as JSON
    Stats,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let db = cli.db.as_deref();

    match cli.command {
        Commands::Serve {
            host,
            port,
            request_timeout_sec,
            engine,
        } => commands::serve::run(db, &host, port, request_timeout_sec, &engine),
        Commands::Split {
            id,
            timeout_sec,
            engine,
        } => commands::split::run(db, id, timeout_sec, &engine),
        Commands::Stats => commands::stats::run(db),
    }
}
