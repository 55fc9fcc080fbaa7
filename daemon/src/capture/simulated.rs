//! In-process media backend
//!
//! Stands in for the host media stack: a fixed device list and a provider
//! that hands out streams without touching real hardware. Counters record
//! every open, stop and in-place reconfiguration.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::devices::{DeviceDescriptor, DeviceDirectory, DeviceKind};

use super::{CaptureConstraints, CaptureError, CaptureProvider, MediaStream, MediaTrack};

/// Build a camera list from labels, ids are `cam-0`, `cam-1`, ...
pub fn cameras_from_labels<S: AsRef<str>>(labels: &[S]) -> Vec<DeviceDescriptor> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            DeviceDescriptor::new(format!("cam-{}", i), label.as_ref(), DeviceKind::VideoInput)
        })
        .collect()
}

/// Device directory over a fixed snapshot
#[derive(Clone)]
pub struct SimulatedDirectory {
    devices: Arc<Vec<DeviceDescriptor>>,
    queries: Arc<AtomicUsize>,
    /// Queries still to fail before the snapshot is served
    failures: Arc<AtomicUsize>,
}

impl SimulatedDirectory {
    /// Cameras plus one microphone and one speaker
    pub fn new(cameras: Vec<DeviceDescriptor>) -> Self {
        let mut devices = vec![DeviceDescriptor::new(
            "mic-0",
            "Built-in Microphone",
            DeviceKind::AudioInput,
        )];
        devices.extend(cameras);
        devices.push(DeviceDescriptor::new(
            "spk-0",
            "Built-in Speakers",
            DeviceKind::AudioOutput,
        ));

        Self {
            devices: Arc::new(devices),
            queries: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `count` queries with `EnumerationFailed`
    pub fn with_failures(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Number of times the directory was queried
    #[cfg(test)]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDirectory for SimulatedDirectory {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let query = self.queries.fetch_add(1, Ordering::SeqCst) + 1;

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            warn!(query, "simulated device enumeration failure");
            return Err(CaptureError::EnumerationFailed(
                "device list unavailable".to_string(),
            ));
        }

        Ok(self.devices.as_ref().clone())
    }
}

/// How the simulated provider behaves
#[derive(Debug, Clone)]
pub struct SimulatedBehavior {
    /// Refuse every open with `PermissionDenied`
    pub deny_permission: bool,
    /// Tracks accept new constraints while live
    pub in_place: bool,
    /// Delay before an open resolves
    pub latency: Duration,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            deny_permission: false,
            in_place: true,
            latency: Duration::ZERO,
        }
    }
}

/// Point-in-time copy of the provider counters, served in daemon status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub opens: usize,
    pub stops: usize,
    pub reconfigures: usize,
    /// Open requests issued, successful or not
    pub requests: usize,
}

/// Counters shared by a provider and every stream it opened
#[derive(Debug, Default)]
pub struct CaptureStats {
    opens: AtomicUsize,
    stops: AtomicUsize,
    reconfigures: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl CaptureStats {
    pub fn snapshot(&self) -> BackendStats {
        BackendStats {
            opens: self.opens(),
            stops: self.stops(),
            reconfigures: self.reconfigures(),
            requests: self.requested.lock().len(),
        }
    }

    /// Successful opens
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Tracks stopped
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Constraints applied in place
    pub fn reconfigures(&self) -> usize {
        self.reconfigures.load(Ordering::SeqCst)
    }

    /// Device ids of every open request, successful or not
    #[cfg(test)]
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

/// Capture provider over a fixed camera list
pub struct SimulatedProvider {
    cameras: Arc<Vec<DeviceDescriptor>>,
    behavior: SimulatedBehavior,
    stats: Arc<CaptureStats>,
}

impl SimulatedProvider {
    pub fn new(cameras: Vec<DeviceDescriptor>, behavior: SimulatedBehavior) -> Self {
        Self {
            cameras: Arc::new(cameras),
            behavior,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl CaptureProvider for SimulatedProvider {
    async fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        if let Some(id) = &constraints.video_device_id {
            self.stats.requested.lock().push(id.clone());
        }

        if !self.behavior.latency.is_zero() {
            tokio::time::sleep(self.behavior.latency).await;
        }

        if !constraints.video_enabled && !constraints.audio_enabled {
            return Err(CaptureError::failed(
                "TypeError",
                "At least one of audio and video must be requested",
            ));
        }
        if self.behavior.deny_permission {
            return Err(CaptureError::PermissionDenied);
        }

        let camera = match &constraints.video_device_id {
            Some(id) => self.cameras.iter().find(|c| &c.id == id).ok_or_else(|| {
                CaptureError::ConstraintNotSatisfiable {
                    constraint: format!("deviceId={}", id),
                }
            })?,
            None => self.cameras.first().ok_or_else(|| {
                CaptureError::failed("NotFoundError", "Requested device not found")
            })?,
        };

        let serial = self.stats.opens.fetch_add(1, Ordering::SeqCst);
        debug!(device = %camera.label, serial, "simulated stream opened");

        let track = SimulatedTrack {
            device: Mutex::new(camera.clone()),
            cameras: Arc::clone(&self.cameras),
            in_place: self.behavior.in_place,
            stopped: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        };

        Ok(Box::new(SimulatedStream {
            id: format!("stream-{}", serial),
            tracks: vec![Box::new(track)],
        }))
    }
}

struct SimulatedStream {
    id: String,
    tracks: Vec<Box<dyn MediaTrack>>,
}

impl MediaStream for SimulatedStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn video_tracks(&self) -> &[Box<dyn MediaTrack>] {
        &self.tracks
    }
}

struct SimulatedTrack {
    device: Mutex<DeviceDescriptor>,
    cameras: Arc<Vec<DeviceDescriptor>>,
    in_place: bool,
    stopped: AtomicBool,
    stats: Arc<CaptureStats>,
}

#[async_trait]
impl MediaTrack for SimulatedTrack {
    fn label(&self) -> String {
        self.device.lock().label.clone()
    }

    fn device_id(&self) -> String {
        self.device.lock().id.clone()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stats.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn apply_constraints(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<(), CaptureError> {
        if !self.in_place {
            return Err(CaptureError::ReconfigureUnsupported);
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CaptureError::failed("InvalidStateError", "The track has ended"));
        }

        if let Some(id) = &constraints.video_device_id {
            let camera = self.cameras.iter().find(|c| &c.id == id).ok_or_else(|| {
                CaptureError::ConstraintNotSatisfiable {
                    constraint: format!("deviceId={}", id),
                }
            })?;
            *self.device.lock() = camera.clone();
        }

        self.stats.reconfigures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
