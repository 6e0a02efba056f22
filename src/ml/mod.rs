//! ML inference module
//!
//! Runs the hand pose detector on a background thread. Frames are handed over
//! through a small bounded channel; when the detector falls behind, new frames
//! are dropped instead of queued so the overlay tracks the newest result.

mod onnx;
mod palm;

pub use onnx::{decode_landmarks, OnnxHandDetector};
pub use palm::{PalmDetection, PalmDetector};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::pose::{DetectorError, HandObservation, HandPoseDetector};
use crate::settings::ModelSettings;

/// Frame queue depth between the render and inference threads
const FRAME_QUEUE_DEPTH: usize = 2;

/// Frame data to be processed
#[derive(Clone)]
pub struct FrameData {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Capture session the frame came from
    pub generation: u64,
}

/// Result of running the detector on one frame
#[derive(Clone, Debug)]
pub struct InferenceResult {
    /// Detected hand, if any
    pub observation: Option<HandObservation>,
    /// Frame number this result corresponds to
    pub frame_number: u64,
    /// Capture session of the source frame
    pub generation: u64,
    /// Time spent in the detector
    pub latency: Duration,
    /// When the result was produced
    pub completed_at: Instant,
}

/// Detector lifecycle as seen from the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InferenceStatus {
    Loading,
    Ready { detector: String },
    Failed(String),
}

/// ML inference engine
pub struct MlInference {
    /// Latest result from inference thread
    latest_result: Arc<Mutex<Option<InferenceResult>>>,
    status: Arc<Mutex<InferenceStatus>>,
    /// Channel to send frames to inference thread
    frame_sender: Option<Sender<FrameData>>,
    dropped_frames: Arc<AtomicU64>,
    processed_frames: Arc<AtomicU64>,
    /// Inference thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl MlInference {
    /// Start inference with the ONNX palm and hand landmark models
    pub fn new(model: ModelSettings) -> Result<Self, DetectorError> {
        Self::spawn(move || {
            OnnxHandDetector::load(&model).map(|d| Box::new(d) as Box<dyn HandPoseDetector>)
        })
    }

    /// Start inference with an already constructed detector
    pub fn with_detector<D>(detector: D) -> Result<Self, DetectorError>
    where
        D: HandPoseDetector + 'static,
    {
        Self::spawn(move || Ok(Box::new(detector) as Box<dyn HandPoseDetector>))
    }

    fn spawn<F>(factory: F) -> Result<Self, DetectorError>
    where
        F: FnOnce() -> Result<Box<dyn HandPoseDetector>, DetectorError> + Send + 'static,
    {
        let latest_result = Arc::new(Mutex::new(None));
        let status = Arc::new(Mutex::new(InferenceStatus::Loading));
        let processed_frames = Arc::new(AtomicU64::new(0));

        let (frame_sender, frame_receiver) = crossbeam_channel::bounded::<FrameData>(FRAME_QUEUE_DEPTH);

        let latest_result_clone = latest_result.clone();
        let status_clone = status.clone();
        let processed_clone = processed_frames.clone();

        let thread_handle = std::thread::Builder::new()
            .name("hand-inference".to_string())
            .spawn(move || {
                Self::inference_thread(
                    factory,
                    frame_receiver,
                    latest_result_clone,
                    status_clone,
                    processed_clone,
                );
            })?;

        Ok(Self {
            latest_result,
            status,
            frame_sender: Some(frame_sender),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            processed_frames,
            thread_handle: Some(thread_handle),
        })
    }

    /// Inference thread main loop
    fn inference_thread<F>(
        factory: F,
        frame_receiver: Receiver<FrameData>,
        latest_result: Arc<Mutex<Option<InferenceResult>>>,
        status: Arc<Mutex<InferenceStatus>>,
        processed_frames: Arc<AtomicU64>,
    ) where
        F: FnOnce() -> Result<Box<dyn HandPoseDetector>, DetectorError>,
    {
        tracing::info!("Hand inference thread started");

        let mut detector = match factory() {
            Ok(detector) => {
                tracing::info!(detector = detector.name(), "Hand pose detector ready");
                *status.lock() = InferenceStatus::Ready {
                    detector: detector.name().to_string(),
                };
                detector
            }
            Err(e) => {
                tracing::warn!("Failed to load hand pose detector: {}. Tracking disabled.", e);
                *status.lock() = InferenceStatus::Failed(e.to_string());
                return;
            }
        };

        while let Ok(frame) = frame_receiver.recv() {
            let started = Instant::now();
            match detector.detect(&frame) {
                Ok(observation) => {
                    let completed_at = Instant::now();
                    processed_frames.fetch_add(1, Ordering::Relaxed);
                    *latest_result.lock() = Some(InferenceResult {
                        observation,
                        frame_number: frame.frame_number,
                        generation: frame.generation,
                        latency: completed_at.duration_since(started),
                        completed_at,
                    });
                }
                Err(e) => {
                    tracing::warn!(frame = frame.frame_number, "Inference error: {}", e);
                }
            }
        }

        tracing::info!("Hand inference thread stopped");
    }

    /// Send a frame for inference without blocking.
    ///
    /// Returns false when the frame was dropped.
    pub fn process_frame(&self, frame: FrameData) -> bool {
        let Some(sender) = &self.frame_sender else {
            return false;
        };

        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Get latest inference result
    pub fn latest_result(&self) -> Option<InferenceResult> {
        self.latest_result.lock().clone()
    }

    pub fn status(&self) -> InferenceStatus {
        self.status.lock().clone()
    }

    /// Check if the detector is loaded and running
    pub fn is_ready(&self) -> bool {
        matches!(*self.status.lock(), InferenceStatus::Ready { .. })
    }

    /// Frames dropped because the detector was busy
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Frames the detector has finished
    pub fn processed_frames(&self) -> u64 {
        self.processed_frames.load(Ordering::Relaxed)
    }

    /// Stop the inference thread
    pub fn stop(&mut self) {
        // Drop sender to signal thread to stop
        self.frame_sender = None;

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MlInference {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Joint, RecognizedPoint};

    struct FixedDetector {
        delay: Duration,
    }

    impl HandPoseDetector for FixedDetector {
        fn detect(&mut self, frame: &FrameData) -> Result<Option<HandObservation>, DetectorError> {
            std::thread::sleep(self.delay);
            if frame.frame_number % 2 == 1 {
                return Ok(None);
            }
            let mut hand = HandObservation::new(0.9);
            hand.insert(Joint::Wrist, RecognizedPoint::new(0.5, 0.2, 0.9));
            Ok(Some(hand))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn frame(frame_number: u64) -> FrameData {
        FrameData {
            data: vec![0; 4 * 4 * 4],
            width: 4,
            height: 4,
            frame_number,
            generation: 0,
        }
    }

    fn wait_for<T>(timeout: Duration, mut poll: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(value) = poll() {
                return Some(value);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_result_propagates() {
        let ml = MlInference::with_detector(FixedDetector { delay: Duration::ZERO }).unwrap();
        wait_for(Duration::from_secs(2), || ml.is_ready().then_some(())).unwrap();
        assert_eq!(ml.status(), InferenceStatus::Ready { detector: "fixed".to_string() });

        assert!(ml.process_frame(frame(4)));
        let result = wait_for(Duration::from_secs(2), || ml.latest_result()).unwrap();
        assert_eq!(result.frame_number, 4);
        let hand = result.observation.unwrap();
        assert!(hand.point(Joint::Wrist, 0.5).is_some());
    }

    #[test]
    fn test_result_keeps_generation() {
        let ml = MlInference::with_detector(FixedDetector { delay: Duration::ZERO }).unwrap();
        assert!(ml.process_frame(FrameData {
            generation: 5,
            ..frame(2)
        }));
        let result = wait_for(Duration::from_secs(2), || ml.latest_result()).unwrap();
        assert_eq!(result.generation, 5);
        assert_eq!(result.frame_number, 2);
    }

    #[test]
    fn test_no_hand_result() {
        let ml = MlInference::with_detector(FixedDetector { delay: Duration::ZERO }).unwrap();
        assert!(ml.process_frame(frame(7)));
        let result = wait_for(Duration::from_secs(2), || ml.latest_result()).unwrap();
        assert_eq!(result.frame_number, 7);
        assert!(result.observation.is_none());
    }

    #[test]
    fn test_busy_detector_drops_frames() {
        let ml = MlInference::with_detector(FixedDetector {
            delay: Duration::from_millis(100),
        })
        .unwrap();

        let accepted = (0..10).filter(|i| ml.process_frame(frame(*i))).count();
        assert!(accepted <= FRAME_QUEUE_DEPTH + 1);
        assert_eq!(ml.dropped_frames(), 10 - accepted as u64);
    }

    #[test]
    fn test_failed_load_reports_status() {
        let ml = MlInference::spawn(|| {
            Err(DetectorError::ModelNotFound("hand_landmark.onnx".to_string()))
        })
        .unwrap();

        let status = wait_for(Duration::from_secs(2), || match ml.status() {
            InferenceStatus::Loading => None,
            other => Some(other),
        })
        .unwrap();
        assert!(matches!(status, InferenceStatus::Failed(_)));
        assert!(!ml.is_ready());
    }

    #[test]
    fn test_stop_joins_thread() {
        let mut ml = MlInference::with_detector(FixedDetector { delay: Duration::ZERO }).unwrap();
        ml.stop();
        assert!(!ml.process_frame(frame(0)));
    }
}
