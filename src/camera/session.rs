//! Camera session lifecycle

use super::{CameraError, CaptureEvent};

/// Where the camera session currently stands
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No camera connected
    #[default]
    Idle,
    /// Capture thread started, waiting for the stream to open
    Starting { camera_index: u32 },
    /// Frames are flowing
    Running { name: String, width: u32, height: u32 },
    /// The stream stopped delivering frames
    Interrupted { name: String },
    /// The OS refused camera access
    PermissionDenied,
    /// The camera could not be opened
    Failed(String),
}

/// Folds [`CaptureEvent`]s into a [`SessionState`]
#[derive(Debug, Default)]
pub struct SessionStatus {
    state: SessionState,
    /// Stream info kept across interruptions
    last_running: Option<(String, u32, u32)>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// A new capture was started for `camera_index`
    pub fn begin(&mut self, camera_index: u32) {
        self.last_running = None;
        self.state = SessionState::Starting { camera_index };
    }

    pub fn apply(&mut self, event: &CaptureEvent) {
        let next = match (event, &self.state) {
            (CaptureEvent::Opened { name, width, height }, _) => {
                self.last_running = Some((name.clone(), *width, *height));
                SessionState::Running {
                    name: name.clone(),
                    width: *width,
                    height: *height,
                }
            }
            (CaptureEvent::Failed(CameraError::PermissionDenied), _) => SessionState::PermissionDenied,
            (CaptureEvent::Failed(e), _) => SessionState::Failed(e.to_string()),
            (CaptureEvent::Interrupted, SessionState::Running { name, .. }) => {
                SessionState::Interrupted { name: name.clone() }
            }
            (CaptureEvent::Resumed, SessionState::Interrupted { .. }) => match &self.last_running {
                Some((name, width, height)) => SessionState::Running {
                    name: name.clone(),
                    width: *width,
                    height: *height,
                },
                None => return,
            },
            // Errors stay visible after the thread exits
            (CaptureEvent::Stopped, SessionState::PermissionDenied | SessionState::Failed(_)) => return,
            (CaptureEvent::Stopped, _) => SessionState::Idle,
            _ => return,
        };

        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "Camera session state changed");
            self.state = next;
        }
    }

    /// Back to idle, e.g. after a user disconnect
    pub fn reset(&mut self) {
        self.last_running = None;
        self.state = SessionState::Idle;
    }

    /// Whether frames are currently expected
    pub fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    /// Status line for the UI
    pub fn message(&self) -> String {
        match &self.state {
            SessionState::Idle => "No camera connected".to_string(),
            SessionState::Starting { camera_index } => format!("Opening camera {}...", camera_index),
            SessionState::Running { name, width, height } => format!("{} ({}x{})", name, width, height),
            SessionState::Interrupted { name } => format!("{}: video interrupted", name),
            SessionState::PermissionDenied => {
                "Camera access denied. Allow camera access in system settings and reconnect.".to_string()
            }
            SessionState::Failed(reason) => format!("Camera error: {}", reason),
        }
    }
}
