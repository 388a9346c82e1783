//! TubeDeck - web dashboard for downloading `YouTube` media into a local
//! music folder and playing it on this machine.

mod error;
mod logging;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info};
use tubedeck_core::{ConfigManager, MusicPlayer, RustyYtdlConfig, RustyYtdlDownloader};

use crate::logging::{LogProfile, LoggingConfig, LoggingGuard};
use crate::state::AppState;

/// Command line options. Flags override the configuration file.
#[derive(Debug, Parser)]
#[command(name = "tubedeck", version, about)]
struct Cli {
    /// Configuration file (created with defaults if missing).
    #[arg(long, env = "TUBEDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long, env = "TUBEDECK_HOST")]
    host: Option<String>,

    /// Port to bind.
    #[arg(long, env = "TUBEDECK_PORT")]
    port: Option<u16>,

    /// Music folder; saved to the configuration.
    #[arg(long, env = "TUBEDECK_MUSIC_DIR")]
    music_dir: Option<PathBuf>,

    /// Verbose console and file logging.
    #[arg(long, env = "TUBEDECK_DEV_LOGS")]
    dev_logs: bool,

    /// Where log files go.
    #[arg(long, env = "TUBEDECK_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _guard = match init_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli).await {
        error!("TubeDeck stopped: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<LoggingGuard, logging::LoggingError> {
    let mut config = LoggingConfig::for_profile(LogProfile::select(cli.dev_logs));
    if let Some(dir) = &cli.log_dir {
        config = config.in_directory(dir);
    }
    logging::init(&config)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting TubeDeck v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match cli.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    if let Some(dir) = cli.music_dir {
        config.set_music_directory(dir)?;
    }
    info!("Configuration at {}", config.path().display());

    let settings = config.config().clone();
    let host = cli.host.unwrap_or(settings.server.host);
    let port = cli.port.unwrap_or(settings.server.port);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let downloader = RustyYtdlDownloader::with_config(RustyYtdlConfig {
        retries: settings.download.retries.max(1),
        retry_delay: Duration::from_secs(settings.download.retry_delay_secs),
        ..RustyYtdlConfig::default()
    });
    let player = MusicPlayer::with_system_output(&settings.player);
    let state = AppState::new(config, player, Arc::new(downloader))?;
    let _watcher = state.spawn_library_watcher();

    let router = routes::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                // Skip health probes.
                if request.uri().path() == "/health" {
                    Span::none()
                } else {
                    tracing::info_span!("request", method = %request.method(), uri = %request.uri())
                }
            }),
        );

    let listener = TcpListener::bind(addr).await?;
    info!("Dashboard listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_every_option_has_env_fallback() {
        let command = Cli::command();
        for arg in command.get_arguments() {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            assert!(arg.get_env().is_some(), "--{} has no env var", arg.get_id());
        }
        let dev_logs = command
            .get_arguments()
            .find(|arg| arg.get_id() == "dev_logs")
            .expect("dev_logs arg");
        assert_eq!(
            dev_logs.get_env(),
            Some(std::ffi::OsStr::new("TUBEDECK_DEV_LOGS"))
        );
    }

    #[test]
    fn test_dev_logs_flag() {
        let cli = Cli::try_parse_from(["tubedeck", "--dev-logs"]).expect("parse");
        assert!(cli.dev_logs);
    }
}
