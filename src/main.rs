//! nutrilens command line.
//!
//! Usage:
//!   nutrilens estimate meal.png --samples 4 --policy skip-failed
//!   nutrilens concepts meal.png
//!   nutrilens serve --bind 127.0.0.1:8787

mod http;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nutrilens::config::{self, Config};
use nutrilens::{FailurePolicy, SampleAggregator, normalizer::normalize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nutrilens")]
#[command(about = "Estimate meal nutrition from a photo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sampling pipeline on an image and print the aggregate estimate
    Estimate {
        image: PathBuf,
        /// Number of independent samples (overrides config)
        #[arg(long)]
        samples: Option<usize>,
        /// Behavior when an iteration fails (overrides config)
        #[arg(long, value_enum)]
        policy: Option<FailurePolicy>,
    },
    /// Show classifier concepts for an image and the subset used in the prompt
    Concepts { image: PathBuf },
    /// Serve the analyze endpoint over HTTP
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may carry RUST_LOG; the subscriber must exist before Config::load warns
    config::load_env_file();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_LEVEL)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Estimate {
            image,
            samples,
            policy,
        } => {
            if let Some(samples) = samples {
                config.pipeline.samples = samples;
            }
            if let Some(policy) = policy {
                config.pipeline.failure_policy = policy;
            }
            config.validate()?;
            estimate(&config, &image).await
        }
        Commands::Concepts { image } => concepts(&config, &image).await,
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.runtime.http_bind = bind;
            }
            let aggregator = SampleAggregator::from_config(&config)?;
            info!(
                samples = aggregator.samples(),
                policy = ?aggregator.policy(),
                "starting nutrilens"
            );
            http::start_http_server(Arc::new(config), aggregator).await
        }
    }
}

async fn estimate(config: &Config, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let image = normalize(&bytes)?;
    let aggregator = SampleAggregator::from_config(config)?;

    let report = aggregator.estimate(&image).await?;
    for failure in &report.failures {
        eprintln!(
            "iteration {} failed at {}: {}",
            failure.iteration, failure.stage, failure.detail
        );
    }
    println!("{}", serde_json::to_string_pretty(&report.estimate)?);
    Ok(())
}

async fn concepts(config: &Config, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let image = normalize(&bytes)?;
    let aggregator = SampleAggregator::from_config(config)?;

    let concepts = aggregator.concept_source().concepts(&image).await?;
    let kept = aggregator.prompts().filter().apply(&concepts);
    for concept in &concepts {
        let marker = if kept.contains(concept) { "*" } else { " " };
        println!("{marker} {:<32} {:.3}", concept.name, concept.confidence);
    }
    Ok(())
}
