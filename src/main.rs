use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, Config};
use crate::models::{AudioFormat, ExtractionJob, Metadata, Segment, SegmentMode};
use crate::registry::DownloadRegistry;
use crate::sweeper::{purge_data_dir, Sweeper};

// --- Modules ---
pub mod args;
pub mod config;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod sweeper;

// --- State ---
pub type ConfigState = Arc<Config>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DownloadRegistry>,
    pub config: ConfigState,
}

// --- Command-Line Argument Parsing ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Token-gated audio extraction relay for yt-dlp.", long_about = None)]
struct Cli {
    /// Path to a config.toml; defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server in the foreground.
    Serve,
    /// Delete every file in the data directory and exit.
    Sweep,
    /// Print the yt-dlp arguments a request would run with.
    Args {
        url: String,
        #[arg(long, default_value = "best")]
        format: String,
        /// `START` or `START-END`, in seconds. Repeatable.
        #[arg(long = "segment", value_parser = parse_segment)]
        segments: Vec<Segment>,
        /// Merge the segments into one file.
        #[arg(long)]
        single: bool,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
    },
}

// --- Main Application Logic ---
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve => run_server(config).await?,
        Commands::Sweep => {
            let deleted = purge_data_dir(&config.data_dir);
            println!("Deleted {} file(s) from {}", deleted, config.data_dir.display());
        }
        Commands::Args {
            url,
            format,
            segments,
            single,
            title,
            artist,
        } => {
            let format: AudioFormat = format.parse().map_err(anyhow::Error::msg)?;
            let job = ExtractionJob {
                source_url: url,
                format,
                output_prefix: config.data_dir.join("<id>"),
                segments,
                segment_mode: if single { SegmentMode::Single } else { SegmentMode::Multiple },
                metadata: Metadata::new(title.as_deref(), artist.as_deref()),
            };
            for arg in pipeline::job_args(&job, &config.cookie_path) {
                println!("{}", arg);
            }
        }
    }

    Ok(())
}

/// Builds the router; shared by the server and the handler tests.
pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/download", post(handlers::download))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_bearer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .route("/file/:token", get(handlers::get_file))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(state)
}

/// Orphan sweep, then the expiry loop and the HTTP server until Ctrl-C.
async fn run_server(config: Config) -> anyhow::Result<()> {
    if config.secret().is_none() {
        tracing::warn!("YTDLP_TOKEN is not set; every /download request will be refused");
    }

    tokio::fs::create_dir_all(&config.data_dir).await?;
    purge_data_dir(&config.data_dir);

    let state = AppState {
        registry: Arc::new(DownloadRegistry::new()),
        config: Arc::new(config),
    };
    let sweeper = Sweeper::spawn(state.registry.clone(), state.config.sweep_interval());

    let addr = state.config.bind_addr();
    let app = app(state);
    tracing::info!("Starting server in foreground, listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn parse_segment(value: &str) -> Result<Segment, String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid seconds {:?}: {}", s, e))
    };
    match value.split_once('-') {
        Some((start, "")) => Ok(Segment::new(parse(start)?, None)),
        Some((start, end)) => Ok(Segment::new(parse(start)?, Some(parse(end)?))),
        None => Ok(Segment::new(parse(value)?, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_flag_parsing() {
        assert_eq!(parse_segment("0-10"), Ok(Segment::new(0, Some(10))));
        assert_eq!(parse_segment("12-"), Ok(Segment::new(12, None)));
        assert_eq!(parse_segment("30"), Ok(Segment::new(30, None)));
        assert!(parse_segment("a-b").is_err());
    }

    #[test]
    fn cli_parses_args_subcommand() {
        let cli = Cli::try_parse_from([
            "yt-relay", "args", "https://example/video", "--format", "mp3", "--segment", "0-10",
            "--segment", "12-", "--single",
        ])
        .unwrap();
        match cli.command {
            Commands::Args { segments, single, format, .. } => {
                assert_eq!(segments.len(), 2);
                assert!(single);
                assert_eq!(format, "mp3");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
