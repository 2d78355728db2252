use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use brutal_digest::api::{build_router, state::AppState};
use brutal_digest::artifacts::{self, purge_tagged};
use brutal_digest::browser::{ChromiumLauncher, SessionOptions};
use brutal_digest::config::AppConfig;
use brutal_digest::parse_duration;
use brutal_digest::pipeline::{JsonlConnector, PipelineConfig, PipelineRunner, RunReport};
use brutal_digest::read::{ArticleService, CacheSnapshot};
use brutal_digest::storage::{JsonlArticleStore, ReplaceStrategy};

#[derive(Parser)]
#[command(name = "brutal-digest")]
#[command(about = "Harvests the brutalist.report tech listing and serves it grouped by source")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    /// Data directory path (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config's
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest, screenshot and store the current listing
    Harvest {
        /// Keep running at interval
        #[arg(long)]
        watch: bool,

        /// Run interval (e.g., "6h", "30m")
        #[arg(long, default_value = "6h")]
        interval: String,

        /// How the previous generation is replaced
        #[arg(long)]
        strategy: Option<ReplaceStrategy>,
    },

    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the grouped article view as JSON
    Articles,

    /// Delete every stored screenshot carrying a tag
    Purge {
        /// Tag to purge (defaults to the configured tag)
        #[arg(long)]
        tag: Option<String>,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_layer = json.then(|| fmt::layer().json());
    let text_layer = (!json).then(|| fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn print_report(report: &RunReport) {
    println!("\n=== Run Results ===");
    println!("Run:              {}", report.run_id);
    println!("Generation:       {}", report.generation);
    println!("Articles:         {}", report.articles);
    for (source, count) in &report.sources {
        println!("  {:<24} {}", source, count);
    }
    println!(
        "Purged:           {}/{} ({} failed)",
        report.purge.deleted, report.purge.found, report.purge.failed
    );
    println!(
        "Screenshots:      {} captured, {} failed, {} skipped",
        report.enrichment.captured, report.enrichment.failed, report.enrichment.skipped
    );
    println!(
        "Stored:           {} inserted, {} removed ({})",
        report.replace.inserted, report.replace.removed, report.replace.strategy
    );
    println!("Duration:         {:?}", report.duration);
}

fn article_service(config: &AppConfig) -> Result<ArticleService> {
    let store = JsonlArticleStore::open(config.store_path())?;
    Ok(ArticleService::new(
        Arc::new(store),
        CacheSnapshot::new(config.snapshot_path()),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_tracing(&level, cli.json_logs);

    tracing::info!("Starting brutal-digest v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Harvest {
            watch,
            interval: interval_str,
            strategy,
        } => {
            let mut pipeline_config = PipelineConfig::from_app(&config);
            if let Some(strategy) = strategy {
                pipeline_config.strategy = strategy;
            }
            pipeline_config.interval = parse_duration(&interval_str)
                .filter(|d| *d > Duration::ZERO)
                .ok_or_else(|| anyhow!("Invalid --interval: {}", interval_str))?;

            let launcher = ChromiumLauncher::new(SessionOptions::from_config(
                &config.harvester,
                &config.enrichment,
            ));
            let connector = JsonlConnector::new(config.store_path());
            let artifact_store = artifacts::from_config(&config)?;

            let runner = PipelineRunner::new(
                pipeline_config,
                Arc::new(launcher),
                Arc::new(connector),
                artifact_store,
            );

            if watch {
                tracing::info!("Running periodic harvest (interval: {})...", interval_str);
                let runner = Arc::new(runner);
                let periodic = tokio::spawn(Arc::clone(&runner).run_periodic());

                tokio::signal::ctrl_c().await?;
                tracing::info!("Interrupted; stopping periodic harvest");
                runner.cancel().await;
                periodic.await?;
            } else {
                tracing::info!("Running one-time harvest...");
                let report = runner.run_once().await?;
                print_report(&report);
            }
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let state = AppState::new(article_service(&config)?);
            let app = build_router(state);
            let addr = format!("{}:{}", host, port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("Listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
        Commands::Articles => {
            let service = article_service(&config)?;
            let served = service.get_articles().await?;
            println!("{}", serde_json::to_string_pretty(&served.articles)?);
            tracing::info!(served_from = served.outcome.served_from(), "Printed articles");
            service.flush_cache().await;
        }
        Commands::Purge { tag } => {
            let tag = tag.unwrap_or_else(|| config.artifacts.tag.clone());
            let artifact_store = artifacts::from_config(&config)?;
            let report = purge_tagged(artifact_store.as_ref(), &tag).await;

            println!("\n=== Purge Results ===");
            println!("Tag:              {}", tag);
            println!("Found:            {}", report.found);
            println!("Deleted:          {}", report.deleted);
            if !report.is_clean() {
                println!("\nErrors:");
                for err in &report.errors {
                    println!("  - {}", err);
                }
            }
        }
    }

    Ok(())
}
