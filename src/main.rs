use anyhow::Result;
use clap::{Parser, Subcommand};
use skytrail::config::{DatabaseArgs, PipelineConfig, WebArgs};
use skytrail::log_format::TargetFirstFormat;
use std::io::IsTerminal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "skytrail")]
#[command(version, about = "SBS aircraft feed ingestion into PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the SBS feed and maintain the current and history tables
    Run {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        pipeline: PipelineConfig,
    },
    /// Serve current aircraft and history trails as GeoJSON
    Web {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        web: WebArgs,
    },
    /// Run one retention pass and exit
    Cleanup {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        pipeline: PipelineConfig,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skytrail=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(TargetFirstFormat::new(std::io::stdout().is_terminal())),
        )
        .init();

    info!("skytrail v{}", env!("CARGO_PKG_VERSION"));

    if let Some(port) = cli.metrics_port {
        let handle = skytrail::metrics::init_metrics()?;
        skytrail::metrics::initialize_pipeline_metrics();
        tokio::spawn(async move {
            if let Err(e) = skytrail::metrics::start_metrics_server(port, handle).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let result = match cli.command {
        Commands::Run { database, pipeline } => commands::handle_run(database, pipeline).await,
        Commands::Web { database, web } => commands::handle_web(database, web).await,
        Commands::Cleanup { database, pipeline } => {
            commands::handle_cleanup(database, pipeline).await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
