mod http;
mod socket;

use clap::Parser;
use rumba_core::modules::default_registry;
use rumba_core::session::HttpTransport;
use rumba_core::{Controller, LoggingInjector};
use rumba_proto::config::{Config, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "rumba-remote", about = "Remote control daemon for a jukebox server")]
struct Args {
    /// Configuration file (default: ~/.config/rumba-remote/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cover art size of the attached display, e.g. 320.  Covers are only
    /// fetched when set.
    #[arg(long)]
    display_res: Option<String>,
}

/// Filter used when `RUST_LOG` is not set.
fn default_directives(logging: &LoggingConfig) -> String {
    match &logging.session_level {
        Some(level) => format!("{},rumba_core::session={}", logging.level, level),
        None => logging.level.clone(),
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<PathBuf> {
    let data_dir = rumba_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("rumba-remote.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives(logging))),
        )
        .init();

    Ok(log_path)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let log_path = init_logging(&config.logging)?;
    info!("Log file: {:?}", log_path);
    info!(
        "Config loaded from: {:?}",
        args.config.clone().unwrap_or_else(Config::config_path)
    );

    let transport = Arc::new(HttpTransport::new(&config.jukebox)?);
    let ctl = Controller::from_config(
        &config,
        transport,
        default_registry(),
        Arc::new(LoggingInjector),
    );
    if let Some(res) = args.display_res {
        ctl.set_display_resolution(res);
    }

    if config.socket.enabled {
        let _socket_handle = socket::start_server(
            config.socket.bind_address.clone(),
            config.socket.port,
            ctl.clone(),
        );
    }

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            ctl.clone(),
        );
    }

    match ctl.start().await {
        Ok(()) => {
            info!("Remote initialised, waiting for input");
            let token = ctl.cancellation_token();
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Signal received, shutting down");
                    ctl.shutdown().await;
                }
                _ = token.cancelled() => {}
            }
        }
        Err(e) => error!("Startup failed: {}", e),
    }

    ctl.wait_closed().await;
    info!("Remote stopped");

    if let Some(reason) = ctl.fatal_error() {
        anyhow::bail!("{}", reason);
    }
    Ok(())
}
