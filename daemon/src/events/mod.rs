//! Events emitted by the capture session
//!
//! These are the presentation side of the session: renderers pick up
//! stream set/clear events, status views pick up messages and snapshots.

use serde::{Deserialize, Serialize};

use crate::devices::DeviceDescriptor;
use crate::session::SessionSnapshot;

/// Events emitted by the session during transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First device snapshot taken, cameras in selection order
    CamerasDiscovered { cameras: Vec<DeviceDescriptor> },

    /// Snapshot had no cameras, or a capture was attempted without one
    NoCameraAvailable,

    /// Selection moved to another camera
    CameraSelected {
        index: usize,
        device_id: String,
        label: String,
    },

    /// A new stream is live and should be rendered
    StreamStarted {
        stream_id: String,
        device_id: String,
        label: String,
    },

    /// The live stream now reads from another camera
    StreamReconfigured {
        stream_id: String,
        device_id: String,
        label: String,
    },

    /// The live stream was stopped and should be cleared from the display
    StreamStopped { stream_id: String },

    /// A stream arrived after video was turned off and was dropped
    StreamDiscarded { stream_id: String },

    /// Human readable error line
    Error { kind: String, message: String },

    /// Session state after a command or capture resolution
    StateChanged(SessionSnapshot),
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::CamerasDiscovered { cameras } => {
                write!(f, "CAMERAS_DISCOVERED ({})", cameras.len())
            }
            SessionEvent::NoCameraAvailable => write!(f, "NO_CAMERA_AVAILABLE"),
            SessionEvent::CameraSelected { index, label, .. } => {
                write!(f, "CAMERA_SELECTED #{} ({})", index, label)
            }
            SessionEvent::StreamStarted { stream_id, label, .. } => {
                write!(f, "STREAM_STARTED {} ({})", stream_id, label)
            }
            SessionEvent::StreamReconfigured { stream_id, label, .. } => {
                write!(f, "STREAM_RECONFIGURED {} ({})", stream_id, label)
            }
            SessionEvent::StreamStopped { stream_id } => write!(f, "STREAM_STOPPED {}", stream_id),
            SessionEvent::StreamDiscarded { stream_id } => {
                write!(f, "STREAM_DISCARDED {}", stream_id)
            }
            SessionEvent::Error { kind, message } => write!(f, "ERROR [{}] {}", kind, message),
            SessionEvent::StateChanged(snapshot) => write!(f, "STATE_CHANGED {}", snapshot.phase),
        }
    }
}
