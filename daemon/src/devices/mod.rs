//! Device directory for media input/output devices
//!
//! The directory hands out an ordered snapshot of the devices the host
//! media stack currently knows about. The session only ever looks at the
//! video inputs of the first snapshot it fetches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capture::CaptureError;

/// Kind of media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Camera
    VideoInput,
    /// Microphone
    AudioInput,
    /// Speaker or headphones
    AudioOutput,
}

impl DeviceKind {
    /// Glyph used when listing devices in the log
    pub fn icon(&self) -> &'static str {
        match self {
            DeviceKind::VideoInput => "📷",
            DeviceKind::AudioInput => "🎤",
            DeviceKind::AudioOutput => "🔊",
        }
    }
}

/// Immutable description of one device in a directory snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque identifier, used for exact-match capture constraints
    pub id: String,
    /// Human readable name
    pub label: String,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }

    pub fn is_camera(&self) -> bool {
        self.kind == DeviceKind::VideoInput
    }
}

/// Source of device snapshots
///
/// May be called repeatedly; every call returns a best-effort snapshot of
/// what is attached right now.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;
}

/// Log every device in a snapshot, one line each
pub fn log_inventory(devices: &[DeviceDescriptor]) {
    for device in devices {
        info!(
            kind = ?device.kind,
            id = %device.id,
            "{} | {}",
            device.kind.icon(),
            device.label
        );
    }
}

/// Keep only the cameras of a snapshot, preserving order
pub fn cameras(devices: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    devices.into_iter().filter(DeviceDescriptor::is_camera).collect()
}
