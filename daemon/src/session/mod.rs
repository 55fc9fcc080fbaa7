//! Capture session module
//!
//! Owns camera selection and the lifecycle of the live capture stream:
//! - Idle: video off, or the last request failed
//! - Requesting: a capture request is in flight
//! - Live: a stream is open and rendered

mod machine;

pub use machine::{CaptureSession, SessionCommand, SessionSnapshot};
