//! Capture provider interface
//!
//! A provider turns a set of constraints into a live stream. Streams carry
//! video tracks; stopping a track releases the camera behind it.

mod error;
pub mod simulated;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::CaptureError;
#[cfg(test)]
pub use error::PERMISSION_DENIED_MESSAGE;

/// Constraints passed to a capture request or applied to a live track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Exact device to use; the provider must fail rather than substitute
    pub video_device_id: Option<String>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

impl CaptureConstraints {
    /// Video from exactly one camera, no audio
    pub fn exact_video(device_id: impl Into<String>) -> Self {
        Self {
            video_device_id: Some(device_id.into()),
            video_enabled: true,
            audio_enabled: false,
        }
    }
}

impl fmt::Display for CaptureConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.video_device_id {
            Some(id) => write!(f, "video=exact:{}", id)?,
            None => write!(f, "video={}", self.video_enabled)?,
        }
        write!(f, " audio={}", self.audio_enabled)
    }
}

/// One media channel of a live stream
#[async_trait]
pub trait MediaTrack: Send + Sync {
    /// Label of the device currently feeding this track
    fn label(&self) -> String;

    fn device_id(&self) -> String;

    /// Stop the track and release its device
    fn stop(&self);

    /// Reconfigure the live track in place
    async fn apply_constraints(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<(), CaptureError> {
        Err(CaptureError::ReconfigureUnsupported)
    }
}

/// A live capture stream
pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;

    fn video_tracks(&self) -> &[Box<dyn MediaTrack>];
}

/// Opens capture streams on request
#[async_trait]
pub trait CaptureProvider: Send + Sync + 'static {
    async fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError>;
}

/// Stop every video track of a stream
pub fn stop_video_tracks(stream: &dyn MediaStream) {
    for track in stream.video_tracks() {
        track.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_video_constraints() {
        let constraints = CaptureConstraints::exact_video("cam-1");
        assert_eq!(constraints.video_device_id.as_deref(), Some("cam-1"));
        assert!(constraints.video_enabled);
        assert!(!constraints.audio_enabled);
        assert_eq!(constraints.to_string(), "video=exact:cam-1 audio=false");
    }
}
