//! Background camera capture

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

use super::{CameraError, CaptureEvent};
use crate::ml::FrameData;

/// Consecutive failed reads before the stream is reported as interrupted
const INTERRUPT_AFTER_FAILURES: u32 = 30;

/// Back-off between failed reads
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// How long the OS permission prompt may stay unanswered
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
const PERMISSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Slice between `running` checks while waiting on the prompt
const PERMISSION_POLL: Duration = Duration::from_millis(100);

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

impl CameraFrame {
    /// Copy the frame for the inference thread, tagged with the capture
    /// session it belongs to
    pub fn to_frame_data(&self, generation: u64) -> FrameData {
        FrameData {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            frame_number: self.frame_number,
            generation,
        }
    }
}

/// Information about an available camera
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraInfo {
    /// Camera index
    pub index: u32,
    /// Camera name
    pub name: String,
}

type FrameSlots = [Arc<Mutex<Option<CameraFrame>>>; 3];

/// Camera capture interface
pub struct CameraCapture {
    /// Latest captured frames, triple buffered
    frames: FrameSlots,
    /// Index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    /// Whether any frame has been written yet
    has_frame: Arc<AtomicBool>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Lifecycle events from the capture thread
    events: Receiver<CaptureEvent>,
    camera_index: u32,
    /// Requested resolution
    width: u32,
    height: u32,
    /// Frame counter
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(camera_list) => camera_list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Start capturing from `camera_index`, requesting roughly `width` x `height`.
    ///
    /// Opening happens on the capture thread; failures arrive as
    /// [`CaptureEvent::Failed`] through [`CameraCapture::poll_events`].
    pub fn new(camera_index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        let frames: FrameSlots = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let has_frame = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));
        let (event_sender, events) = crossbeam_channel::unbounded();

        let shared = CaptureShared {
            frames: frames.clone(),
            latest_frame_idx: latest_frame_idx.clone(),
            has_frame: has_frame.clone(),
            running: running.clone(),
            frame_count: frame_count.clone(),
            events: event_sender,
        };

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                shared.run(camera_index, width, height);
            })
            .map_err(|e| CameraError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            frames,
            latest_frame_idx,
            has_frame,
            running,
            thread_handle: Some(thread_handle),
            events,
            camera_index,
            width,
            height,
            frame_count,
        })
    }

    /// Get the latest captured frame
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        if !self.has_frame.load(Ordering::Acquire) {
            return None;
        }
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    /// Drain pending lifecycle events
    pub fn poll_events(&self) -> Vec<CaptureEvent> {
        self.events.try_iter().collect()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn camera_index(&self) -> u32 {
        self.camera_index
    }

    /// Get the requested resolution
    pub fn requested_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State shared with the capture thread
struct CaptureShared {
    frames: FrameSlots,
    latest_frame_idx: Arc<AtomicU64>,
    has_frame: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    events: Sender<CaptureEvent>,
}

impl CaptureShared {
    /// Camera capture thread
    fn run(self, camera_index: u32, width: u32, height: u32) {
        tracing::info!(camera = camera_index, "Starting camera capture thread");

        if let Err(e) = self.capture(camera_index, width, height) {
            tracing::error!(camera = camera_index, "Camera capture failed: {}", e);
            let _ = self.events.send(CaptureEvent::Failed(e));
        }

        self.running.store(false, Ordering::Release);
        let _ = self.events.send(CaptureEvent::Stopped);
        tracing::info!(camera = camera_index, "Camera capture thread stopped");
    }

    fn capture(&self, camera_index: u32, width: u32, height: u32) -> Result<(), CameraError> {
        request_access(&self.running)?;

        let mut camera = open_camera(camera_index, width, height)?;
        camera
            .open_stream()
            .map_err(|e| CameraError::StreamFailed(e.to_string()))?;

        let resolution = camera.resolution();
        let name = camera.info().human_name().to_string();
        tracing::info!(
            camera = camera_index,
            width = resolution.width(),
            height = resolution.height(),
            "Camera opened: {}",
            name
        );
        let _ = self.events.send(CaptureEvent::Opened {
            name,
            width: resolution.width(),
            height: resolution.height(),
        });

        let mut write_idx: u64 = 0;
        let mut failures = FailureTracker::new(INTERRUPT_AFTER_FAILURES);

        while self.running.load(Ordering::Acquire) {
            let decoded = camera
                .frame()
                .map_err(|e| e.to_string())
                .and_then(|buffer| {
                    let resolution = buffer.resolution();
                    buffer
                        .decode_image::<RgbAFormat>()
                        .map(|image| (image.into_raw(), resolution))
                        .map_err(|e| e.to_string())
                });

            match decoded {
                Ok((rgba_data, resolution)) => {
                    if let Some(event) = failures.record_success() {
                        tracing::info!(camera = camera_index, "Camera stream resumed");
                        let _ = self.events.send(event);
                    }

                    let frame_number = self.frame_count.fetch_add(1, Ordering::Relaxed);
                    let frame = CameraFrame {
                        data: rgba_data,
                        width: resolution.width(),
                        height: resolution.height(),
                        frame_number,
                        timestamp: Instant::now(),
                    };

                    // Write to the next buffer slot
                    let slot = (write_idx % 3) as usize;
                    *self.frames[slot].lock() = Some(frame);

                    self.latest_frame_idx.store(write_idx, Ordering::Release);
                    self.has_frame.store(true, Ordering::Release);
                    write_idx = write_idx.wrapping_add(1);
                }
                Err(e) => {
                    tracing::debug!(camera = camera_index, "Failed to capture frame: {}", e);
                    if let Some(event) = failures.record_failure() {
                        tracing::warn!(camera = camera_index, "Camera stream interrupted: {}", e);
                        let _ = self.events.send(event);
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!(camera = camera_index, "Failed to stop camera stream: {:?}", e);
        }

        Ok(())
    }
}

/// Counts consecutive failed reads and decides when the stream is
/// interrupted or back
#[derive(Debug)]
struct FailureTracker {
    threshold: u32,
    consecutive: u32,
    interrupted: bool,
}

impl FailureTracker {
    fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            interrupted: false,
        }
    }

    /// `Interrupted` once, when the failure run reaches the threshold
    fn record_failure(&mut self) -> Option<CaptureEvent> {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.threshold && !self.interrupted {
            self.interrupted = true;
            return Some(CaptureEvent::Interrupted);
        }
        None
    }

    /// `Resumed` for the first good read after an interruption
    fn record_success(&mut self) -> Option<CaptureEvent> {
        self.consecutive = 0;
        if std::mem::take(&mut self.interrupted) {
            Some(CaptureEvent::Resumed)
        } else {
            None
        }
    }
}

/// Open a camera, falling back through progressively looser format requests
fn open_camera(camera_index: u32, width: u32, height: u32) -> Result<Camera, CameraError> {
    let index = CameraIndex::Index(camera_index);
    let attempts = [
        RequestedFormatType::HighestResolution(Resolution::new(width, height)),
        RequestedFormatType::AbsoluteHighestResolution,
        RequestedFormatType::None,
    ];

    let mut last_error = String::new();
    for format_type in attempts {
        let requested = RequestedFormat::new::<RgbAFormat>(format_type);
        match Camera::new(index.clone(), requested) {
            Ok(camera) => return Ok(camera),
            Err(e) => {
                tracing::warn!(camera = camera_index, "Failed to open camera with {:?}: {:?}", format_type, e);
                last_error = e.to_string();
            }
        }
    }

    if !CameraCapture::list_cameras().iter().any(|c| c.index == camera_index) {
        return Err(CameraError::DeviceNotFound(camera_index));
    }

    Err(CameraError::OpenFailed {
        index: camera_index,
        reason: last_error,
    })
}

/// Ask the OS for camera access where that is required
///
/// Gives up with `PermissionDenied` when the prompt is not answered within
/// [`PERMISSION_TIMEOUT`], or returns early once `running` is cleared.
#[cfg(target_os = "macos")]
fn request_access(running: &AtomicBool) -> Result<(), CameraError> {
    if nokhwa::nokhwa_check() {
        return Ok(());
    }

    let (sender, receiver) = crossbeam_channel::bounded(1);
    nokhwa::nokhwa_initialize(move |granted| {
        let _ = sender.send(granted);
    });

    wait_for_permission(&receiver, running, PERMISSION_TIMEOUT)
}

#[cfg(not(target_os = "macos"))]
fn request_access(_running: &AtomicBool) -> Result<(), CameraError> {
    Ok(())
}

/// Wait for the permission answer in short slices so `stop` is not blocked
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn wait_for_permission(
    answer: &Receiver<bool>,
    running: &AtomicBool,
    timeout: Duration,
) -> Result<(), CameraError> {
    let deadline = Instant::now() + timeout;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match answer.recv_timeout(PERMISSION_POLL.min(deadline - now)) {
            Ok(true) => return Ok(()),
            Ok(false) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    Err(CameraError::PermissionDenied)
}
