//! Hand pose types and the detector contract
//!
//! A detector takes a video frame and returns at most one hand: a map from
//! named joints to normalized positions with confidence scores.

mod observation;
mod skeleton;

pub use observation::{BendAngle, Chirality, HandObservation, RecognizedPoint};
pub use skeleton::{Finger, Joint, PALM_BONES};

use thiserror::Error;

use crate::ml::FrameData;

/// Errors raised by hand pose detectors
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("hand landmark model not found: {0}")]
    ModelNotFound(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),

    #[error("failed to spawn inference thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Single-hand pose detector
pub trait HandPoseDetector: Send {
    /// Detect a hand in `frame`. `Ok(None)` means no hand was found.
    fn detect(&mut self, frame: &FrameData) -> Result<Option<HandObservation>, DetectorError>;

    /// Short name for logs and the UI
    fn name(&self) -> &str;
}
