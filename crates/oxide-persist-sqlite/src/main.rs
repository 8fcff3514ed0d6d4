//! oxide-persist CLI
//!
//! Command-line tool for looking at the live schema the mapper sees.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_persist::{Introspector, SqliteDialect};
use oxide_persist_sqlite::{SqliteConfig, SqliteExecutor};

/// Inspect SQLite databases managed by oxide-persist.
#[derive(Parser)]
#[command(name = "oxide-persist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Milliseconds SQLite waits on a locked database.
    #[arg(long, default_value_t = 10_000)]
    busy_timeout_ms: u64,

    /// Milliseconds to pause after each write.
    #[arg(long, default_value_t = 10)]
    settle_ms: u64,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List user tables.
    Tables,

    /// Show the columns and indexes of a table.
    Inspect {
        /// Table name.
        table: String,

        /// Print the schema as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SqliteConfig::new(&cli.database)
        .busy_timeout(Duration::from_millis(cli.busy_timeout_ms))
        .settle_delay(Duration::from_millis(cli.settle_ms));
    let executor = SqliteExecutor::connect(&config).await?;
    let introspector = Introspector::new(&executor, &SqliteDialect);

    match cli.command {
        Commands::Tables => {
            let tables = introspector.tables().await?;
            if tables.is_empty() {
                info!("No tables found.");
            }
            for table in &tables {
                println!("{table}");
            }
        }

        Commands::Inspect { table, json } => {
            let live = introspector.inspect(&table).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&live)?);
            } else if live.is_absent() {
                info!("Table {} does not exist.", table);
            } else {
                println!("\nTable {}:", live.table);
                println!("{:-<60}", "");
                for column in &live.columns {
                    let key = if column.primary_key { " PRIMARY KEY" } else { "" };
                    println!(" {:<30} {}{}", column.name, column.type_name, key);
                }
                if !live.indexes.is_empty() {
                    println!("\nIndexes:");
                    for index in &live.indexes {
                        let kind = if index.unique { "unique" } else { "index" };
                        println!(" {:<30} {}", index.name, kind);
                    }
                }
                println!();
            }
        }
    }

    executor.close().await;
    Ok(())
}
