//! Unix domain socket server for IPC
//!
//! Turns client requests into session commands and pushes session events
//! to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::capture::simulated::CaptureStats;
use crate::devices::DeviceDescriptor;
use crate::events::SessionEvent;
use crate::session::SessionCommand;

use super::protocol::{read_frame, write_frame, DaemonStatus, Notification, Request, Response};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Commands for the capture session
    command_tx: mpsc::Sender<SessionCommand>,
    /// Session events, subscribed to per client on request
    event_tx: Option<broadcast::Sender<SessionEvent>>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
    cameras: Vec<DeviceDescriptor>,
    /// Counters of the media backend, read on each status request
    capture_stats: Option<Arc<CaptureStats>>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, command_tx: mpsc::Sender<SessionCommand>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
            cameras: Vec::new(),
            capture_stats: None,
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            command_tx,
            event_tx: None,
        })
    }

    /// Create a new IPC server that can push session events to clients
    pub fn with_events(
        socket_path: &Path,
        command_tx: mpsc::Sender<SessionCommand>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Self> {
        let mut server = Self::new(socket_path, command_tx)?;
        server.event_tx = Some(event_tx);
        Ok(server)
    }

    /// Report the media backend counters in status responses
    pub async fn attach_capture_stats(&self, stats: Arc<CaptureStats>) {
        self.state.write().await.capture_stats = Some(stats);
    }

    /// Fold a session event into the status served to clients
    pub async fn apply_event(&self, event: &SessionEvent) {
        let mut server_state = self.state.write().await;
        match event {
            SessionEvent::StateChanged(snapshot) => {
                let old_phase = server_state.status.session.phase;
                server_state.status.session = snapshot.clone();

                if old_phase != snapshot.phase {
                    info!(
                        from = %old_phase,
                        to = %snapshot.phase,
                        "IPC server: session phase updated"
                    );
                }
            }
            SessionEvent::CamerasDiscovered { cameras } => {
                server_state.cameras = cameras.clone();
            }
            _ => {}
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let command_tx = self.command_tx.clone();
                    let event_tx = self.event_tx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, command_tx, event_tx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Requests are read on their own task so that pushed notifications
    /// never interrupt a half-read frame.
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        command_tx: mpsc::Sender<SessionCommand>,
        event_tx: Option<broadcast::Sender<SessionEvent>>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel::<Request>(16);

        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame::<_, Request>(&mut reader).await {
                    Ok(Some(request)) => {
                        if request_tx.send(request).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "failed to read request, disconnecting");
                        break;
                    }
                }
            }
        });

        let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        break Ok(());
                    };
                    debug!(?request, "received request");

                    let (response, subscribe) =
                        Self::process_request(request, &state, &command_tx).await;
                    if subscribe && events.is_none() {
                        events = event_tx.as_ref().map(|tx| tx.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    if let Err(e) = write_frame(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = Self::next_event(&mut events), if events.is_some() => {
                    match event {
                        Ok(event) => {
                            let notification = Notification::SessionEvent { event };
                            if let Err(e) = write_frame(&mut writer, &notification).await {
                                break Err(e);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "notification receiver lagged");
                        }
                        Err(RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    async fn next_event(
        events: &mut Option<broadcast::Receiver<SessionEvent>>,
    ) -> Result<SessionEvent, RecvError> {
        match events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        command_tx: &mpsc::Sender<SessionCommand>,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                if let Some(backend) = state.capture_stats.as_ref().map(|s| s.snapshot()) {
                    state.status.backend = backend;
                }
                (Response::Status(state.status.clone()), false)
            }

            Request::Subscribe => (Response::Subscribed, true),

            Request::ListCameras => {
                let state = state.read().await;
                (
                    Response::Cameras {
                        cameras: state.cameras.clone(),
                    },
                    false,
                )
            }

            Request::ToggleVideo => (
                Self::forward(SessionCommand::ToggleVideo, command_tx).await,
                false,
            ),

            Request::CycleCamera => {
                if !state.read().await.status.session.can_cycle {
                    let response = Response::Error {
                        code: "no_camera".to_string(),
                        message: "no camera available to cycle to".to_string(),
                    };
                    return (response, false);
                }
                (
                    Self::forward(SessionCommand::CycleCamera, command_tx).await,
                    false,
                )
            }
        }
    }

    /// Queue a command for the capture session
    async fn forward(
        command: SessionCommand,
        command_tx: &mpsc::Sender<SessionCommand>,
    ) -> Response {
        match command_tx.send(command).await {
            Ok(()) => {
                info!(?command, "command queued via IPC");
                Response::Accepted { command }
            }
            Err(_) => Response::Error {
                code: "session_closed".to_string(),
                message: "capture session is not running".to_string(),
            },
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
