//! Camera capture module
//!
//! Provides cross-platform camera capture using the nokhwa crate. Frames are
//! captured on a background thread and the latest one is made available to
//! the render thread. Session lifecycle changes are reported as
//! [`CaptureEvent`]s and folded into a [`SessionStatus`].

mod capture;
mod session;

pub use capture::{CameraCapture, CameraFrame, CameraInfo};
pub use session::{SessionState, SessionStatus};

use thiserror::Error;

/// Errors from opening or running a camera
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera access was denied")]
    PermissionDenied,

    #[error("camera {0} not found")]
    DeviceNotFound(u32),

    #[error("failed to open camera {index}: {reason}")]
    OpenFailed { index: u32, reason: String },

    #[error("failed to start camera stream: {0}")]
    StreamFailed(String),

    #[error("failed to spawn capture thread: {0}")]
    ThreadSpawn(String),
}

/// Lifecycle notifications from the capture thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Stream is open and delivering frames
    Opened { name: String, width: u32, height: u32 },
    /// The camera could not be started
    Failed(CameraError),
    /// Frames stopped arriving
    Interrupted,
    /// Frames are arriving again after an interruption
    Resumed,
    /// The capture thread exited
    Stopped,
}
