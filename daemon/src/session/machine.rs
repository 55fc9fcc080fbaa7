//! Capture session state machine
//!
//! Tracks whether video is wanted, which camera is selected, and the live
//! stream (if any). Handles ToggleVideo, CycleCamera and the lazy device
//! fetch, and reconciles capture results that arrive after the user has
//! changed their mind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::capture::{
    stop_video_tracks, CaptureConstraints, CaptureError, CaptureProvider, MediaStream,
};
use crate::devices::{self, DeviceDescriptor, DeviceDirectory};
use crate::events::SessionEvent;

type CaptureOutcome = Result<Box<dyn MediaStream>, CaptureError>;

/// Derived lifecycle phase of the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No stream and no request in flight
    #[default]
    Idle,
    /// A capture request is in flight
    Requesting,
    /// A stream is open
    Live,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Requesting => write!(f, "Requesting"),
            Phase::Live => write!(f, "Live"),
        }
    }
}

/// Commands accepted by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCommand {
    EnsureInitialized,
    ToggleVideo,
    CycleCamera,
}

/// Point-in-time view of the session for status displays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub video_requested: bool,
    pub camera_index: usize,
    /// `None` until the device list has been fetched
    pub camera_count: Option<usize>,
    pub selected_camera: Option<String>,
    /// Device the live stream reads from
    pub active_device: Option<String>,
    /// Whether CycleCamera is currently allowed
    pub can_cycle: bool,
}

/// The one capture request allowed in flight
struct PendingCapture {
    device_id: String,
    handle: JoinHandle<CaptureOutcome>,
}

/// Camera selection and stream lifecycle for one user
pub struct CaptureSession<D, P> {
    directory: D,
    provider: Arc<P>,
    event_tx: broadcast::Sender<SessionEvent>,
    video_requested: bool,
    /// Never set by this session; keeps the "nothing requested" guard honest
    audio_requested: bool,
    camera_index: usize,
    cameras: Option<Vec<DeviceDescriptor>>,
    active_stream: Option<Box<dyn MediaStream>>,
    pending: Option<PendingCapture>,
}

impl<D: DeviceDirectory, P: CaptureProvider> CaptureSession<D, P> {
    /// Create an idle session
    pub fn new(directory: D, provider: P, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            directory,
            provider: Arc::new(provider),
            event_tx,
            video_requested: false,
            audio_requested: false,
            camera_index: 0,
            cameras: None,
            active_stream: None,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.pending.is_some() {
            Phase::Requesting
        } else if self.active_stream.is_some() {
            Phase::Live
        } else {
            Phase::Idle
        }
    }

    pub fn video_requested(&self) -> bool {
        self.video_requested
    }

    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    /// Cameras from the first device snapshot, `None` before initialization
    pub fn cameras(&self) -> Option<&[DeviceDescriptor]> {
        self.cameras.as_deref()
    }

    pub fn selected_camera(&self) -> Option<&DeviceDescriptor> {
        self.cameras.as_ref()?.get(self.camera_index)
    }

    /// The live stream, for whoever renders it
    pub fn active_stream(&self) -> Option<&dyn MediaStream> {
        self.active_stream.as_deref()
    }

    pub fn can_cycle(&self) -> bool {
        self.cameras.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            video_requested: self.video_requested(),
            camera_index: self.camera_index(),
            camera_count: self.cameras().map(<[_]>::len),
            selected_camera: self.selected_camera().map(|c| c.label.clone()),
            active_device: self
                .active_stream()
                .and_then(|s| s.video_tracks().first().map(|t| t.device_id())),
            can_cycle: self.can_cycle(),
        }
    }

    /// Run the session, processing commands until the channel closes
    ///
    /// Commands keep flowing while a capture request is in flight; its
    /// result is reconciled against whatever the user asked for since.
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        info!("capture session started in Idle state");

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
                outcome = Self::wait_pending(&mut self.pending), if self.pending.is_some() => {
                    self.resolve_capture(outcome).await;
                }
            }
        }

        self.close();
        info!("capture session stopped");
    }

    /// Release the live stream and abandon any in-flight request
    pub fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(device = %pending.device_id, "abandoning in-flight capture");
            pending.handle.abort();
        }
        self.release_stream();
    }

    /// Apply a command without waiting for a capture it may start
    pub async fn dispatch(&mut self, command: SessionCommand) {
        debug!(?command, "dispatching command");

        let result = match command {
            SessionCommand::EnsureInitialized => self.ensure_initialized().await,
            SessionCommand::ToggleVideo => {
                self.toggle_video().await;
                Ok(())
            }
            SessionCommand::CycleCamera => self.cycle_camera().await,
        };

        if let Err(err) = result {
            self.handle_capture_error(&err);
        }
        self.publish_state();
    }

    /// Fetch the camera list once
    ///
    /// Later calls do not query the directory again. A failed query leaves
    /// the list unset so the next call retries.
    pub async fn ensure_initialized(&mut self) -> Result<(), CaptureError> {
        if self.cameras.is_some() {
            return Ok(());
        }

        let snapshot = self.directory.list_devices().await?;
        devices::log_inventory(&snapshot);

        let cameras = devices::cameras(snapshot);
        self.camera_index = 0;

        match cameras.first() {
            Some(camera) => {
                info!(camera = %camera.label, count = cameras.len(), "selected camera");
                self.emit(SessionEvent::CamerasDiscovered {
                    cameras: cameras.clone(),
                });
            }
            None => {
                warn!("no cameras detected");
                self.emit(SessionEvent::NoCameraAvailable);
            }
        }

        self.cameras = Some(cameras);
        Ok(())
    }

    /// Wait for the in-flight capture request, if any, and apply its result
    #[cfg(test)]
    pub async fn settle(&mut self) {
        while self.pending.is_some() {
            let outcome = Self::wait_pending(&mut self.pending).await;
            self.resolve_capture(outcome).await;
        }
    }

    /// Flip video on or off
    ///
    /// Turning video on issues a capture request; its result is applied
    /// when the request lands.
    pub async fn toggle_video(&mut self) {
        self.video_requested = !self.video_requested;
        info!(video = self.video_requested, "video toggled");

        if self.video_requested {
            self.request_capture().await;
        } else {
            self.release_stream();
        }
    }

    /// Select the next camera, moving a live stream over to it
    pub async fn cycle_camera(&mut self) -> Result<(), CaptureError> {
        let count = match self.cameras.as_ref() {
            Some(cameras) if !cameras.is_empty() => cameras.len(),
            _ => return Err(CaptureError::NoCameraAvailable),
        };

        let next = (self.camera_index + 1) % count;
        if next == self.camera_index {
            debug!("only one camera, selection unchanged");
            return Ok(());
        }
        self.camera_index = next;

        if let Some(camera) = self.selected_camera().cloned() {
            info!(camera = %camera.label, index = next, "selecting camera");
            self.emit(SessionEvent::CameraSelected {
                index: next,
                device_id: camera.id,
                label: camera.label,
            });
        }

        if self.video_requested && self.active_stream.is_some() {
            self.reconfigure_live().await;
        }
        Ok(())
    }

    /// Start a capture for the selected camera
    ///
    /// Never overlaps requests: a request already in flight is left to be
    /// reconciled when it lands.
    async fn request_capture(&mut self) {
        let first_fetch = self.cameras.is_none();
        if let Err(err) = self.ensure_initialized().await {
            self.handle_capture_error(&err);
            return;
        }
        if !self.video_requested && !self.audio_requested {
            return;
        }
        if self.pending.is_some() {
            debug!("capture already in flight");
            return;
        }

        self.release_stream();

        let Some(camera) = self.selected_camera().cloned() else {
            // The first fetch has already reported the empty snapshot
            if !first_fetch {
                warn!("no camera to capture from");
                self.emit(SessionEvent::NoCameraAvailable);
            }
            return;
        };

        let constraints = CaptureConstraints {
            audio_enabled: self.audio_requested,
            ..CaptureConstraints::exact_video(camera.id.clone())
        };
        info!(camera = %camera.label, %constraints, "requesting capture");

        let provider = Arc::clone(&self.provider);
        let handle = tokio::spawn(async move { provider.open(constraints).await });
        self.pending = Some(PendingCapture {
            device_id: camera.id,
            handle,
        });
    }

    async fn wait_pending(pending: &mut Option<PendingCapture>) -> CaptureOutcome {
        match pending {
            Some(pending) => flatten_join((&mut pending.handle).await),
            None => std::future::pending().await,
        }
    }

    /// Commit or discard a finished capture request
    async fn resolve_capture(&mut self, outcome: CaptureOutcome) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let stream = match outcome {
            Ok(stream) => stream,
            Err(err) if !self.video_requested => {
                debug!(%err, "capture failed after video was turned off, dropping error");
                return;
            }
            Err(err) => {
                self.handle_capture_error(&err);
                return;
            }
        };

        if !self.video_requested {
            info!(
                stream = stream.id(),
                "video turned off while capture was pending, discarding stream"
            );
            stop_video_tracks(stream.as_ref());
            self.emit(SessionEvent::StreamDiscarded {
                stream_id: stream.id().to_string(),
            });
            return;
        }

        let label = stream
            .video_tracks()
            .first()
            .map(|t| t.label())
            .unwrap_or_default();
        info!(stream = stream.id(), device = %label, "using video device");
        self.emit(SessionEvent::StreamStarted {
            stream_id: stream.id().to_string(),
            device_id: pending.device_id.clone(),
            label,
        });
        self.active_stream = Some(stream);

        let selected = self.selected_camera().map(|c| c.id.as_str());
        if selected != Some(pending.device_id.as_str()) {
            debug!("selection moved while capture was pending");
            self.reconfigure_live().await;
        }
    }

    /// Point the live stream at the selected camera
    ///
    /// Applies the constraint to the first video track in place; restarts
    /// the capture if the track cannot or will not take it.
    async fn reconfigure_live(&mut self) {
        let Some(camera) = self.selected_camera().cloned() else {
            return;
        };
        let constraints = CaptureConstraints::exact_video(camera.id.clone());

        let Some(stream) = self.active_stream.as_deref() else {
            return;
        };
        let stream_id = stream.id().to_string();
        let applied = match stream.video_tracks().first() {
            Some(track) => track.apply_constraints(&constraints).await,
            None => Err(CaptureError::ReconfigureUnsupported),
        };

        match applied {
            Ok(()) => {
                info!(stream = %stream_id, camera = %camera.label, "constraints applied in place");
                self.emit(SessionEvent::StreamReconfigured {
                    stream_id,
                    device_id: camera.id,
                    label: camera.label,
                });
            }
            Err(CaptureError::ReconfigureUnsupported) => {
                debug!("in-place reconfiguration unavailable, restarting capture");
                self.release_stream();
                self.request_capture().await;
            }
            Err(err) => {
                warn!(%err, "in-place reconfiguration failed, restarting capture");
                self.release_stream();
                self.request_capture().await;
            }
        }
    }

    /// Stop and drop the live stream, if any
    fn release_stream(&mut self) {
        if let Some(stream) = self.active_stream.take() {
            stop_video_tracks(stream.as_ref());
            info!(stream = stream.id(), "stream stopped");
            self.emit(SessionEvent::StreamStopped {
                stream_id: stream.id().to_string(),
            });
        }
    }

    /// Turn a capture error into display messages
    fn handle_capture_error(&self, err: &CaptureError) {
        for message in err.display_messages() {
            error!(kind = err.kind(), "{}", message);
            self.emit(SessionEvent::Error {
                kind: err.kind().to_string(),
                message,
            });
        }
    }

    fn publish_state(&self) {
        self.emit(SessionEvent::StateChanged(self.snapshot()));
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}

fn flatten_join(joined: Result<CaptureOutcome, JoinError>) -> CaptureOutcome {
    joined.unwrap_or_else(|e| Err(CaptureError::failed("AbortError", e.to_string())))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::capture::simulated::{
        cameras_from_labels, CaptureStats, SimulatedBehavior, SimulatedDirectory, SimulatedProvider,
    };
    use crate::capture::{MediaTrack, PERMISSION_DENIED_MESSAGE};

    type TestSession = CaptureSession<SimulatedDirectory, SimulatedProvider>;

    struct Harness {
        session: TestSession,
        directory: SimulatedDirectory,
        stats: Arc<CaptureStats>,
        events: broadcast::Receiver<SessionEvent>,
    }

    fn harness(labels: &[&str], behavior: SimulatedBehavior) -> Harness {
        let cameras = cameras_from_labels(labels);
        let directory = SimulatedDirectory::new(cameras.clone());
        let provider = SimulatedProvider::new(cameras, behavior);
        let stats = provider.stats();
        let (tx, events) = broadcast::channel(256);
        Harness {
            session: CaptureSession::new(directory.clone(), provider, tx),
            directory,
            stats,
            events,
        }
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn error_events(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<(String, String)> {
        drain(events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Error { kind, message } => Some((kind, message)),
                _ => None,
            })
            .collect()
    }

    fn live_device<D, P>(session: &CaptureSession<D, P>) -> Option<String>
    where
        D: DeviceDirectory,
        P: CaptureProvider,
    {
        session
            .active_stream()
            .and_then(|s| s.video_tracks().first().map(|t| t.device_id()))
    }

    async fn toggle<D, P>(session: &mut CaptureSession<D, P>)
    where
        D: DeviceDirectory,
        P: CaptureProvider,
    {
        session.toggle_video().await;
        session.settle().await;
    }

    async fn cycle<D, P>(session: &mut CaptureSession<D, P>) -> Result<(), CaptureError>
    where
        D: DeviceDirectory,
        P: CaptureProvider,
    {
        session.cycle_camera().await?;
        session.settle().await;
        Ok(())
    }

    /// Provider whose tracks fail every in-place change outright
    struct RejectingProvider {
        opens: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    struct RejectingStream {
        id: String,
        tracks: Vec<Box<dyn MediaTrack>>,
    }

    struct RejectingTrack {
        device_id: String,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaTrack for RejectingTrack {
        fn label(&self) -> String {
            self.device_id.clone()
        }

        fn device_id(&self) -> String {
            self.device_id.clone()
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn apply_constraints(
            &self,
            _constraints: &CaptureConstraints,
        ) -> Result<(), CaptureError> {
            Err(CaptureError::failed("OverconstrainedError", "Device is busy"))
        }
    }

    impl MediaStream for RejectingStream {
        fn id(&self) -> &str {
            &self.id
        }

        fn video_tracks(&self) -> &[Box<dyn MediaTrack>] {
            &self.tracks
        }
    }

    #[async_trait]
    impl CaptureProvider for RejectingProvider {
        async fn open(
            &self,
            constraints: CaptureConstraints,
        ) -> Result<Box<dyn MediaStream>, CaptureError> {
            let serial = self.opens.fetch_add(1, Ordering::SeqCst);
            let track = RejectingTrack {
                device_id: constraints.video_device_id.unwrap_or_default(),
                stops: Arc::clone(&self.stops),
            };
            Ok(Box::new(RejectingStream {
                id: format!("rejecting-{}", serial),
                tracks: vec![Box::new(track)],
            }))
        }
    }

    #[test]
    fn test_initial_state() {
        let h = harness(&["A"], SimulatedBehavior::default());
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(!h.session.video_requested());
        assert!(h.session.cameras().is_none());
        assert!(!h.session.can_cycle());
    }

    #[tokio::test]
    async fn test_ensure_initialized_queries_once() {
        let mut h = harness(&["A", "B"], SimulatedBehavior::default());

        assert_ok!(h.session.ensure_initialized().await);
        assert_ok!(h.session.ensure_initialized().await);

        assert_eq!(h.directory.queries(), 1);
        assert_eq!(h.session.cameras().map(|c| c.len()), Some(2));
        assert_eq!(h.session.camera_index(), 0);
        assert!(h.session.can_cycle());
    }

    #[tokio::test]
    async fn test_toggle_cycle_toggle_in_place() {
        let mut h = harness(&["A", "B", "C"], SimulatedBehavior::default());

        toggle(&mut h.session).await;
        assert_eq!(h.session.phase(), Phase::Live);
        assert_eq!(h.stats.requested(), vec!["cam-0".to_string()]);

        assert_ok!(cycle(&mut h.session).await);
        assert_eq!(h.session.phase(), Phase::Live);
        assert_eq!(live_device(&h.session).as_deref(), Some("cam-1"));
        assert_eq!(h.stats.opens(), 1);
        assert_eq!(h.stats.stops(), 0);
        assert_eq!(h.stats.reconfigures(), 1);

        toggle(&mut h.session).await;
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(h.session.active_stream().is_none());
        assert_eq!(h.stats.stops(), 1);
    }

    #[tokio::test]
    async fn test_cycle_falls_back_to_restart() {
        let mut h = harness(
            &["A", "B", "C"],
            SimulatedBehavior {
                in_place: false,
                ..Default::default()
            },
        );

        toggle(&mut h.session).await;
        assert_ok!(cycle(&mut h.session).await);

        assert_eq!(h.session.phase(), Phase::Live);
        assert_eq!(live_device(&h.session).as_deref(), Some("cam-1"));
        assert_eq!(h.stats.opens(), 2);
        assert_eq!(h.stats.stops(), 1);
        assert_eq!(
            h.stats.requested(),
            vec!["cam-0".to_string(), "cam-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cycle_closes_the_loop() {
        let mut h = harness(&["A", "B", "C"], SimulatedBehavior::default());
        assert_ok!(h.session.ensure_initialized().await);

        let start = h.session.camera_index();
        for _ in 0..3 {
            assert_ok!(cycle(&mut h.session).await);
        }
        assert_eq!(h.session.camera_index(), start);
        assert_eq!(h.stats.opens(), 0);
    }

    #[tokio::test]
    async fn test_cycle_single_camera_is_noop() {
        let mut h = harness(&["A"], SimulatedBehavior::default());
        toggle(&mut h.session).await;
        drain(&mut h.events);

        assert_ok!(cycle(&mut h.session).await);

        assert_eq!(h.session.camera_index(), 0);
        assert_eq!(h.stats.opens(), 1);
        assert_eq!(h.stats.stops(), 0);
        assert_eq!(h.stats.reconfigures(), 0);
        assert!(!drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::CameraSelected { .. })));
    }

    #[tokio::test]
    async fn test_cycle_requires_cameras() {
        let mut h = harness(&["A"], SimulatedBehavior::default());
        assert_eq!(
            cycle(&mut h.session).await,
            Err(CaptureError::NoCameraAvailable)
        );

        let mut empty = harness(&[], SimulatedBehavior::default());
        assert_ok!(empty.session.ensure_initialized().await);
        assert_err!(cycle(&mut empty.session).await);
    }

    #[tokio::test]
    async fn test_cycle_while_idle_only_moves_selection() {
        let mut h = harness(&["A", "B"], SimulatedBehavior::default());
        assert_ok!(h.session.ensure_initialized().await);

        assert_ok!(cycle(&mut h.session).await);
        assert_eq!(h.session.camera_index(), 1);
        assert_eq!(h.session.phase(), Phase::Idle);

        toggle(&mut h.session).await;
        assert_eq!(h.stats.requested(), vec!["cam-1".to_string()]);
    }

    #[tokio::test]
    async fn test_no_cameras_never_requests_capture() {
        let mut h = harness(&[], SimulatedBehavior::default());

        toggle(&mut h.session).await;

        assert!(h.session.active_stream().is_none());
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(h.stats.requested().is_empty());

        let events = drain(&mut h.events);
        let warnings = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::NoCameraAvailable))
            .count();
        assert_eq!(warnings, 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. })));

        // Later attempts still warn, once each
        toggle(&mut h.session).await;
        toggle(&mut h.session).await;
        let warnings = drain(&mut h.events)
            .iter()
            .filter(|e| matches!(e, SessionEvent::NoCameraAvailable))
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn test_directory_failure_retries() {
        let cameras = cameras_from_labels(&["A"]);
        let directory = SimulatedDirectory::new(cameras.clone()).with_failures(1);
        let provider = SimulatedProvider::new(cameras, SimulatedBehavior::default());
        let stats = provider.stats();
        let (tx, mut events) = broadcast::channel(64);
        let mut session = CaptureSession::new(directory.clone(), provider, tx);

        toggle(&mut session).await;
        assert!(session.cameras().is_none());
        assert!(session.video_requested());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(stats.requested().is_empty());
        assert!(error_events(&mut events)
            .iter()
            .any(|(kind, _)| kind == "enumeration_failed"));

        toggle(&mut session).await;
        toggle(&mut session).await;
        assert_eq!(session.phase(), Phase::Live);
        assert_eq!(session.cameras().map(|c| c.len()), Some(1));
        assert_eq!(directory.queries(), 2);

        assert_ok!(session.ensure_initialized().await);
        assert_eq!(directory.queries(), 2);
    }

    #[tokio::test]
    async fn test_apply_failure_restarts_capture() {
        let opens = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let provider = RejectingProvider {
            opens: Arc::clone(&opens),
            stops: Arc::clone(&stops),
        };
        let directory = SimulatedDirectory::new(cameras_from_labels(&["A", "B"]));
        let (tx, mut events) = broadcast::channel(64);
        let mut session = CaptureSession::new(directory, provider, tx);

        toggle(&mut session).await;
        assert_ok!(cycle(&mut session).await);

        assert_eq!(session.phase(), Phase::Live);
        assert_eq!(live_device(&session).as_deref(), Some("cam-1"));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let events = drain(&mut events);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::StreamReconfigured { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_constraint_not_satisfiable_reported() {
        let directory = SimulatedDirectory::new(cameras_from_labels(&["A", "B"]));
        let provider =
            SimulatedProvider::new(cameras_from_labels(&["A"]), SimulatedBehavior::default());
        let (tx, mut events) = broadcast::channel(64);
        let mut session = CaptureSession::new(directory, provider, tx);

        assert_ok!(session.ensure_initialized().await);
        assert_ok!(cycle(&mut session).await);
        toggle(&mut session).await;

        assert!(session.active_stream().is_none());
        assert!(session.video_requested());

        let errors = error_events(&mut events);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|(kind, _)| kind == "constraint_not_satisfiable"));
        assert_eq!(
            errors[0].1,
            "The requested camera (deviceId=cam-1) is not supported by your device."
        );
    }

    #[tokio::test]
    async fn test_failure_after_toggle_off_is_dropped() {
        let mut h = harness(
            &["A"],
            SimulatedBehavior {
                deny_permission: true,
                ..Default::default()
            },
        );

        h.session.dispatch(SessionCommand::ToggleVideo).await;
        h.session.dispatch(SessionCommand::ToggleVideo).await;
        h.session.settle().await;

        assert!(!h.session.video_requested());
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(error_events(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_keeps_toggle_on() {
        let mut h = harness(
            &["A"],
            SimulatedBehavior {
                deny_permission: true,
                ..Default::default()
            },
        );

        toggle(&mut h.session).await;

        assert!(h.session.active_stream().is_none());
        assert!(h.session.video_requested());
        assert_eq!(h.session.phase(), Phase::Idle);

        let messages: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Error { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert!(messages.iter().any(|m| m == PERMISSION_DENIED_MESSAGE));
    }

    #[tokio::test]
    async fn test_toggle_sequences_balance_stops() {
        let mut h = harness(&["A", "B"], SimulatedBehavior::default());

        for round in 1..=6 {
            toggle(&mut h.session).await;
            assert!(h.stats.stops() <= h.stats.opens());
            if round % 2 == 0 {
                assert!(h.session.active_stream().is_none());
            }
        }
        assert_eq!(h.stats.opens(), 3);
        assert_eq!(h.stats.stops(), 3);
    }

    #[tokio::test]
    async fn test_toggle_off_while_pending_discards_stream() {
        let mut h = harness(&["A"], SimulatedBehavior::default());

        h.session.dispatch(SessionCommand::ToggleVideo).await;
        assert_eq!(h.session.phase(), Phase::Requesting);

        h.session.dispatch(SessionCommand::ToggleVideo).await;
        assert!(!h.session.video_requested());

        h.session.settle().await;
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(h.session.active_stream().is_none());
        assert_eq!(h.stats.opens(), 1);
        assert_eq!(h.stats.stops(), 1);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::StreamDiscarded { .. })));
    }

    #[tokio::test]
    async fn test_toggle_back_on_while_pending_coalesces() {
        let mut h = harness(&["A"], SimulatedBehavior::default());

        for _ in 0..3 {
            h.session.dispatch(SessionCommand::ToggleVideo).await;
        }
        h.session.settle().await;

        assert_eq!(h.session.phase(), Phase::Live);
        assert_eq!(h.stats.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_while_pending_follows_latest_selection() {
        let mut h = harness(&["A", "B"], SimulatedBehavior::default());

        h.session.dispatch(SessionCommand::ToggleVideo).await;
        h.session.dispatch(SessionCommand::CycleCamera).await;
        assert_eq!(h.session.camera_index(), 1);

        h.session.settle().await;
        assert_eq!(live_device(&h.session).as_deref(), Some("cam-1"));
        assert_eq!(h.stats.opens(), 1);
        assert_eq!(h.stats.reconfigures(), 1);
    }

    #[tokio::test]
    async fn test_run_processes_commands() {
        let h = harness(
            &["A", "B"],
            SimulatedBehavior {
                latency: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let Harness {
            mut session,
            stats,
            mut events,
            ..
        } = h;
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            session.run(rx).await;
            session
        });

        tx.send(SessionCommand::EnsureInitialized).await.unwrap();
        tx.send(SessionCommand::ToggleVideo).await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::StreamStarted { device_id, .. } => {
                    assert_eq!(device_id, "cam-0");
                    break;
                }
                _ => continue,
            }
        }

        drop(tx);
        let session = task.await.unwrap();
        assert!(session.active_stream().is_none());
        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.stops(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_live_stream() {
        let mut h = harness(&["A", "B"], SimulatedBehavior::default());
        toggle(&mut h.session).await;

        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.phase, Phase::Live);
        assert_eq!(snapshot.camera_count, Some(2));
        assert_eq!(snapshot.selected_camera.as_deref(), Some("A"));
        assert_eq!(snapshot.active_device.as_deref(), Some("cam-0"));
        assert!(snapshot.can_cycle);
    }
}
