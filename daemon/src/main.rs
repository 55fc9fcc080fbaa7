//! camcycle-daemon: camera selection and capture stream lifecycle
//!
//! This daemon hosts one capture session and provides:
//! - Lazy camera discovery from a device directory
//! - ToggleVideo / CycleCamera commands with an explicit state machine
//! - IPC server for UI clients (status queries, commands, event push)
//!
//! Camera hardware is provided by the simulated media backend; the
//! session only talks to it through the directory and provider traits.

mod capture;
mod config;
mod devices;
mod events;
mod ipc;
mod lifecycle;
mod session;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::simulated::{cameras_from_labels, SimulatedDirectory, SimulatedProvider};
use crate::config::Config;
use crate::events::SessionEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::session::{CaptureSession, SessionCommand};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "camcycle-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, cameras = ?config.cameras, "configuration loaded");

    let mut shutdown = ShutdownSignal::register()?;

    // IPC server -> session
    let (command_tx, command_rx) = mpsc::channel(32);
    // Session -> IPC server and subscribed clients
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);

    let cameras = cameras_from_labels(&config.cameras);
    let directory =
        SimulatedDirectory::new(cameras.clone()).with_failures(config.directory_failures);
    let provider = SimulatedProvider::new(cameras, config.capture.clone());
    let capture_stats = provider.stats();
    let mut session = CaptureSession::new(directory, provider, event_tx.clone());

    let server = Server::with_events(&config.socket_path, command_tx.clone(), event_tx.clone())?;
    server.attach_capture_stats(capture_stats).await;

    let mut status_rx = event_tx.subscribe();
    let server_for_events = &server;

    // Discover cameras at startup so CycleCamera is available right away
    command_tx.send(SessionCommand::EnsureInitialized).await?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = session.run(command_rx) => {
            info!("capture session exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the served status in step with the session
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "session event");
                        server_for_events.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("session event handler exited");
        }

        signal = shutdown.wait() => {
            info!(signal, "shutdown signal received");
        }
    }

    info!("shutting down...");

    session.close();
    server.shutdown().await;

    info!("camcycle-daemon stopped");

    Ok(())
}
