//! fscore - forum comment batch-scoring pipeline
//!
//! Every stage runs in-process; `serve` exposes the same stages over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fscore_common::config::{
    default_config_path, load_toml_config, resolve_config_path, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use fscore_pipeline::evidence::EvidenceStore;
use fscore_pipeline::pipeline::{
    validate_batch_size, Pipeline, PipelineConfig, PipelinePaths, PipelineState, ScoringReport,
};
use fscore_pipeline::scores::{validate_threshold, ScoreMapping};
use fscore_pipeline::services::HttpScoringService;
use fscore_pipeline::session::{Credentials, SessionManager};
use fscore_pipeline::AppState;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for fscore
#[derive(Parser, Debug)]
#[command(name = "fscore")]
#[command(about = "Batch-score forum users through a conversational scoring service")]
#[command(version)]
struct Cli {
    /// Root folder holding data/ and cookies/
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score every user and normalize the replies
    Run {
        /// Users per scoring request (overrides [pipeline] batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
    /// Score every user, leaving the raw replies for a later `normalize`
    Score {
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
    /// Rebuild the score mapping from the raw reply log
    Normalize,
    /// Print users scoring at least N
    Filter {
        #[arg(short, long, allow_negative_numbers = true)]
        min_score: i64,
    },
    /// Print the evidence store
    Evidence,
    /// Store scoring service credentials in the config file
    Configure {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FSCORE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Serve the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5780", env = "FSCORE_PORT")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let toml_config = load_toml_config(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let root_folder = RootFolderResolver::new()
        .with_cli_arg(cli.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root().display());

    let paths = PipelinePaths::from_root(&initializer);

    match cli.command {
        Command::Run { batch_size } => {
            let pipeline = build_pipeline(&toml_config, paths, batch_size)?;
            let mut sessions = build_sessions(&toml_config, &initializer)?;
            let progress = spawn_progress_logger(&pipeline);

            let report = pipeline.run(&mut sessions).await;
            drop(pipeline);
            let _ = progress.await;

            let report = report.context("Pipeline run failed")?;
            print_scoring_report(&report.scoring);
            println!("Users scored: {}", report.scores.len());
        }
        Command::Score { batch_size } => {
            let pipeline = build_pipeline(&toml_config, paths, batch_size)?;
            let mut sessions = build_sessions(&toml_config, &initializer)?;

            let report = pipeline
                .score_all(&mut sessions)
                .await
                .context("Scoring failed")?;
            print_scoring_report(&report);
            println!("Raw replies: {}", pipeline.paths().raw_log.display());
        }
        Command::Normalize => {
            let pipeline = Pipeline::new(
                paths,
                PipelineConfig::from_settings(&toml_config.pipeline, None),
            );
            let scores = pipeline.normalize().context("Normalization failed")?;
            println!(
                "Normalized {} user(s) into {}",
                scores.len(),
                pipeline.paths().scores.display()
            );
        }
        Command::Filter { min_score } => {
            let threshold = validate_threshold(min_score)?;
            let scores = ScoreMapping::load(&paths.scores)?;
            for (user_id, score) in scores.at_or_above(threshold).iter() {
                println!("{} (Score: {})", user_id, score);
            }
        }
        Command::Evidence => {
            let store = EvidenceStore::load(&paths.evidence)?;
            println!("{}", serde_json::to_string_pretty(&store)?);
        }
        Command::Configure { email, password } => {
            let target = config_path.unwrap_or_else(default_config_path);
            fscore_pipeline::config::sync_credentials_to_toml(
                &Credentials::new(email, password),
                &target,
            )?;
            println!("Credentials saved to {}", target.display());
        }
        Command::Serve { port } => serve(&toml_config, &initializer, paths, port).await?,
    }

    Ok(())
}

fn build_pipeline(
    toml_config: &TomlConfig,
    paths: PipelinePaths,
    batch_size: Option<usize>,
) -> Result<Pipeline> {
    let credentials = fscore_pipeline::config::resolve_credentials(toml_config)?;
    let mut config = PipelineConfig::from_settings(&toml_config.pipeline, Some(credentials));
    if let Some(batch_size) = batch_size {
        config = config.with_batch_size(validate_batch_size(batch_size)?);
    }
    Ok(Pipeline::new(paths, config))
}

fn build_sessions(
    toml_config: &TomlConfig,
    initializer: &RootFolderInitializer,
) -> Result<SessionManager> {
    let service = HttpScoringService::from_config(&toml_config.service)?;
    info!("Scoring service: {}", service.base_url());

    Ok(SessionManager::new(
        Arc::new(service),
        fscore_pipeline::config::retry_policy(&toml_config.pipeline),
    )
    .with_cookie_cache(initializer.cookie_dir()))
}

/// Echo state changes until the pipeline is dropped
fn spawn_progress_logger(pipeline: &Pipeline) -> tokio::task::JoinHandle<()> {
    let mut rx = pipeline.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if let PipelineState::Scoring { batch, total } = state {
                eprintln!("Scoring batch {}/{}", batch, total);
            }
        }
    })
}

fn print_scoring_report(report: &ScoringReport) {
    println!("Run: {}", report.run_id);
    println!(
        "Batches scored: {}/{}",
        report.scored_batches, report.total_batches
    );
    for failure in &report.failed_batches {
        println!(
            "Batch {} failed ({} user(s)): {}",
            failure.batch_index,
            failure.users.len(),
            failure.reason
        );
    }
}

async fn serve(
    toml_config: &TomlConfig,
    initializer: &RootFolderInitializer,
    paths: PipelinePaths,
    port: u16,
) -> Result<()> {
    let credentials = match fscore_pipeline::config::resolve_credentials(toml_config) {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            warn!("{}; pipeline runs will fail until configured", e);
            None
        }
    };
    let sessions = build_sessions(toml_config, initializer)?;

    let state = AppState::new(paths, toml_config.pipeline.clone(), credentials, sessions);
    let app = fscore_pipeline::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
