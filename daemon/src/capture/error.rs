//! Capture error taxonomy and user-facing messages

use thiserror::Error;

/// Shown when the host refuses capture permission
pub const PERMISSION_DENIED_MESSAGE: &str = "Permissions have not been granted to use your \
     camera and microphone, you need to allow access to your devices in order for capture \
     to work.";

/// Errors that can occur while enumerating devices or capturing video
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no camera available")]
    NoCameraAvailable,

    #[error("constraint not satisfiable: {constraint}")]
    ConstraintNotSatisfiable { constraint: String },

    #[error("permission denied")]
    PermissionDenied,

    #[error("capture failed: {name}: {message}")]
    CaptureFailed { name: String, message: String },

    /// The track cannot take new constraints while live
    #[error("in-place reconfiguration not supported")]
    ReconfigureUnsupported,

    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),
}

impl CaptureError {
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CaptureFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Stable identifier used in events and IPC error codes
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::NoCameraAvailable => "no_camera",
            CaptureError::ConstraintNotSatisfiable { .. } => "constraint_not_satisfiable",
            CaptureError::PermissionDenied => "permission_denied",
            CaptureError::CaptureFailed { .. } => "capture_failed",
            CaptureError::ReconfigureUnsupported => "reconfigure_unsupported",
            CaptureError::EnumerationFailed(_) => "enumeration_failed",
        }
    }

    /// Media-stack style error name
    pub fn name(&self) -> &str {
        match self {
            CaptureError::NoCameraAvailable => "NotFoundError",
            CaptureError::ConstraintNotSatisfiable { .. } => "ConstraintNotSatisfiedError",
            CaptureError::PermissionDenied => "PermissionDeniedError",
            CaptureError::CaptureFailed { name, .. } => name,
            CaptureError::ReconfigureUnsupported => "NotSupportedError",
            CaptureError::EnumerationFailed(_) => "EnumerationError",
        }
    }

    fn detail(&self) -> String {
        match self {
            CaptureError::NoCameraAvailable => "No cameras detected".to_string(),
            CaptureError::ConstraintNotSatisfiable { constraint } => {
                format!("Cannot satisfy constraint {}", constraint)
            }
            CaptureError::PermissionDenied => "Permission denied".to_string(),
            CaptureError::CaptureFailed { message, .. } => message.clone(),
            CaptureError::ReconfigureUnsupported => {
                "Track does not support applying constraints".to_string()
            }
            CaptureError::EnumerationFailed(reason) => reason.clone(),
        }
    }

    /// Lines to show the user, most specific first
    ///
    /// The raw `name: message` line is always last.
    pub fn display_messages(&self) -> Vec<String> {
        let mut messages = Vec::with_capacity(2);
        match self {
            CaptureError::ConstraintNotSatisfiable { constraint } => messages.push(format!(
                "The requested camera ({}) is not supported by your device.",
                constraint
            )),
            CaptureError::PermissionDenied => messages.push(PERMISSION_DENIED_MESSAGE.to_string()),
            _ => {}
        }
        messages.push(format!("{}: {}", self.name(), self.detail()));
        messages
    }
}
