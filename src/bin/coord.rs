//! Coordinator binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tablecoord::{common::Config, metadata::DataLakeFormat, Coordinator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tablecoord-coordinator")]
#[command(about = "tablecoord coordinator: DDL, replica assignment and epoch-fenced commits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Metadata store directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Bucket count for tables that do not set one
        #[arg(long)]
        default_bucket_number: Option<i32>,

        /// Replication factor for tables that do not set one
        #[arg(long)]
        default_replication_factor: Option<i32>,

        /// Cluster datalake format (paimon, iceberg, lance)
        #[arg(long)]
        datalake_format: Option<DataLakeFormat>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            db,
            default_bucket_number,
            default_replication_factor,
            datalake_format,
        } => {
            // File and environment first, CLI arguments have priority
            let mut config = Config::load(config.as_deref())?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            if let Some(id) = id {
                config.node_id = id;
            }
            let coord_config = &mut config.coordinator;
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(db) = db {
                coord_config.db_path = db;
            }
            if let Some(n) = default_bucket_number {
                coord_config.default_bucket_number = n;
            }
            if let Some(rf) = default_replication_factor {
                coord_config.default_replication_factor = rf;
            }
            if datalake_format.is_some() {
                coord_config.datalake_format = datalake_format;
            }
            coord_config.validate()?;

            let coord = Coordinator::new(config.coordinator, config.node_id);
            coord.serve().await?;
        }
    }

    Ok(())
}
