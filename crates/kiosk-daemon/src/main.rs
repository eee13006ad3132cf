mod core;
mod http;
mod media;

use std::path::PathBuf;

use clap::Parser;
use kiosk_proto::config::Config;
use kiosk_proto::protocol::{Command, Target};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{DaemonCore, DaemonEvent};

/// Content rotation daemon for kiosks and menu boards.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir).
    #[arg(long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Play this playlist at startup.
    #[arg(long, conflicts_with = "menu")]
    playlist: Option<String>,

    /// Show this menu at startup.
    #[arg(long)]
    menu: Option<String>,

    /// Override the API origin from the config file.
    #[arg(long)]
    origin: Option<String>,

    /// Do not start the HTTP control surface.
    #[arg(long)]
    no_http: bool,
}

impl Cli {
    fn startup_target(&self) -> Option<Target> {
        match (&self.playlist, &self.menu) {
            (Some(id), _) => Some(Target::Playlist { id: id.clone() }),
            (None, Some(id)) => Some(Target::Menu { id: id.clone() }),
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // File logging plus stderr
    let data_dir = kiosk_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,kiosk_daemon=debug,kiosk_proto=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(
        "Config loaded from: {:?}",
        cli.config.clone().unwrap_or_else(Config::config_path)
    );
    if let Some(origin) = &cli.origin {
        config.api.origin = origin.clone();
    }
    if cli.no_http {
        config.http.enabled = false;
    }
    info!("API origin: {}", config.api.origin);

    // Event channel: all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<DaemonEvent>(256);

    let daemon_core = DaemonCore::new(config.clone(), event_tx.clone()).await?;
    let state_manager = daemon_core.state_manager();

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                state_manager: state_manager.clone(),
                event_tx: event_tx.clone(),
                cache: daemon_core.cache(),
            },
        );
    }

    // CLI selection wins over the persisted one
    let startup = match cli.startup_target() {
        Some(target) => Some(target),
        None => state_manager.last_target().await,
    };
    if let Some(target) = startup {
        info!("Starting with {}", target);
        event_tx
            .send(DaemonEvent::ClientCommand(Command::Select { target }))
            .await?;
    } else {
        info!("No content selected, waiting for a selection");
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
            }
            Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
        }
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_selects_startup_target() {
        let cli = Cli::parse_from(["kiosk-daemon", "--menu", "7", "--no-http"]);
        assert_eq!(cli.startup_target(), Some(Target::Menu { id: "7".into() }));
        assert!(cli.no_http);

        let cli = Cli::parse_from(["kiosk-daemon"]);
        assert!(cli.startup_target().is_none());
    }

    #[test]
    fn playlist_and_menu_are_exclusive() {
        assert!(Cli::try_parse_from(["kiosk-daemon", "--playlist", "1", "--menu", "2"]).is_err());
    }
}
