use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dbpool",
    about = "Inspect and exercise keyed connection pools",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire and release connections on every configured pool.
    ///
    /// Exits non-zero if any pool could not hand out a connection.
    Check {
        /// Pool file with one [[pool]] table per pool
        #[arg(short, long, default_value = "pools.toml")]
        config: PathBuf,
        /// Acquire/release rounds per pool
        #[arg(short, long, default_value = "3")]
        rounds: u32,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Print the pool key of every configured pool without dialing.
    Keys {
        #[arg(short, long, default_value = "pools.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dbpool=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config, rounds, format } => {
            commands::check::check(&config, rounds, &format).await
        }
        Commands::Keys { config } => commands::keys::keys(&config),
    }
}
