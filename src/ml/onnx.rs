//! ONNX Runtime hand landmark detector
//!
//! Runs a MediaPipe-compatible single-hand landmark model on a square hand
//! region. The region comes from the palm detector, or from the previous
//! frame's landmarks while the hand stays present. Without a palm model the
//! whole frame is used. The region is letterboxed into the model input; the
//! model writes 21 landmarks as (x, y, z) in input pixels, followed by a hand
//! presence score and optionally a handedness score.

use std::path::{Path, PathBuf};

use egui::Pos2;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba, RgbaImage};
use ndarray::Array4;
use ort::session::Session;

use super::palm::PalmDetector;
use super::FrameData;
use crate::geometry::{flip_to_bottom_left, flip_to_top_left, letterbox_region, Letterbox, Roi};
use crate::pose::{Chirality, DetectorError, HandObservation, HandPoseDetector, Joint, RecognizedPoint};
use crate::settings::{InputLayout, ModelSettings};

/// Values per landmark in the model output (x, y, z)
const LANDMARK_STRIDE: usize = 3;

/// Next frame's hand region relative to the landmark bounding box
const TRACKING_SCALE: f32 = 2.0;

/// Hand landmark detector backed by an ONNX Runtime session
pub struct OnnxHandDetector {
    session: Session,
    palm: Option<PalmDetector>,
    /// Region for the next frame, from the last confident landmarks
    tracked: Option<Roi>,
    /// Capture session the tracked region belongs to
    generation: Option<u64>,
    input_size: u32,
    layout: InputLayout,
    presence_threshold: f32,
    name: String,
}

impl OnnxHandDetector {
    /// Locate and load the landmark model, plus the palm detector if present
    pub fn load(settings: &ModelSettings) -> Result<Self, DetectorError> {
        let model_path = find_model(settings.model_path.as_deref(), &settings.model_file, "model.model_path")?;
        tracing::info!(path = %model_path.display(), "Loading hand landmark model");

        let session = build_session(&model_path, settings.intra_threads)?;

        let mut name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "onnx".to_string());

        let palm = match PalmDetector::load(settings) {
            Ok(palm) => {
                name.push_str(" + palm");
                Some(palm)
            }
            Err(DetectorError::ModelNotFound(path)) => {
                tracing::warn!("Palm detector not found: {}. Landmarks run on the whole frame.", path);
                None
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            model = %name,
            input_size = settings.input_size,
            layout = ?settings.layout,
            "Hand landmark model loaded"
        );

        Ok(Self {
            session,
            palm,
            tracked: None,
            generation: None,
            input_size: settings.input_size,
            layout: settings.layout,
            presence_threshold: settings.presence_threshold,
            name,
        })
    }

    /// Region to run the landmark model on, or `None` when no palm was found
    fn hand_region(&mut self, frame: &FrameData) -> Result<Option<Roi>, DetectorError> {
        if self.generation != Some(frame.generation) {
            self.generation = Some(frame.generation);
            self.tracked = None;
        }

        if let Some(roi) = self.tracked.take() {
            return Ok(Some(roi));
        }

        match &mut self.palm {
            Some(palm) => Ok(palm.detect(frame)?.map(|p| p.hand_roi())),
            None => Ok(Some(Roi::full_frame(frame.width, frame.height))),
        }
    }
}

impl HandPoseDetector for OnnxHandDetector {
    fn detect(&mut self, frame: &FrameData) -> Result<Option<HandObservation>, DetectorError> {
        let Some(region) = self.hand_region(frame)? else {
            return Ok(None);
        };

        let placement = letterbox_region(frame.width, frame.height, region, self.input_size);
        let input = preprocess(frame, &placement, self.layout)?;
        let outputs = run_model(&mut self.session, input, self.input_size, self.layout)?;
        let observation = decode_landmarks(&outputs, &placement, self.presence_threshold)?;

        if self.palm.is_some() {
            self.tracked = observation
                .as_ref()
                .and_then(|hand| tracking_region(hand, frame.width, frame.height));
        }

        Ok(observation)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Hand region for the next frame around the landmarks of this one
fn tracking_region(hand: &HandObservation, width: u32, height: u32) -> Option<Roi> {
    let points = hand.iter().map(|(_, point)| {
        let top_left = flip_to_top_left(point.location, false);
        Pos2::new(top_left.x * width as f32, top_left.y * height as f32)
    });
    Roi::around_points(points, TRACKING_SCALE).filter(|roi| roi.overlaps_frame(width, height))
}

/// Build a session with the platform's accelerated execution provider
pub(super) fn build_session(path: &Path, intra_threads: usize) -> Result<Session, DetectorError> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()
        .map_err(load_error)?
        .with_intra_threads(intra_threads)
        .map_err(load_error)?;

    #[cfg(target_os = "macos")]
    {
        builder = builder
            .with_execution_providers([
                ort::execution_providers::CoreMLExecutionProvider::default().build(),
            ])
            .map_err(load_error)?;
    }

    #[cfg(target_os = "windows")]
    {
        builder = builder
            .with_execution_providers([
                ort::execution_providers::DirectMLExecutionProvider::default().build(),
            ])
            .map_err(load_error)?;
    }

    builder.commit_from_file(path).map_err(load_error)
}

/// Run a square-input model and copy out every output as floats
pub(super) fn run_model(
    session: &mut Session,
    input: Vec<f32>,
    input_size: u32,
    layout: InputLayout,
) -> Result<Vec<Vec<f32>>, DetectorError> {
    let size = input_size as usize;
    let shape = match layout {
        InputLayout::Nhwc => (1, size, size, 3),
        InputLayout::Nchw => (1, 3, size, size),
    };
    let input_array = Array4::from_shape_vec(shape, input)
        .map_err(|e| DetectorError::Inference(format!("failed to create input array: {}", e)))?;
    let input_tensor = ort::value::Tensor::from_array(input_array)
        .map_err(|e| DetectorError::Inference(format!("failed to create tensor: {}", e)))?;

    let outputs = session
        .run(ort::inputs![input_tensor])
        .map_err(|e| DetectorError::Inference(e.to_string()))?;

    outputs
        .iter()
        .map(|(_, value)| {
            value
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data.to_vec())
                .map_err(|e| DetectorError::UnexpectedOutput(e.to_string()))
        })
        .collect()
}

/// Crop the placed region out of the frame, letterbox it into the model
/// input and convert to floats in [0, 1]. Parts of the region outside the
/// frame stay black.
pub(super) fn preprocess(frame: &FrameData, placement: &Letterbox, layout: InputLayout) -> Result<Vec<f32>, DetectorError> {
    let source: ImageBuffer<Rgba<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.as_slice()).ok_or_else(|| {
            DetectorError::Inference(format!(
                "frame buffer of {} bytes does not match {}x{} RGBA",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;

    let region = placement.source;
    let scale_x = placement.scaled_width as f32 / region.width.max(1.0);
    let scale_y = placement.scaled_height as f32 / region.height.max(1.0);

    // Part of the region that lies on the frame
    let x0 = region.x.max(0.0).floor().min(frame.width as f32) as u32;
    let y0 = region.y.max(0.0).floor().min(frame.height as f32) as u32;
    let x1 = (region.x + region.width).ceil().clamp(0.0, frame.width as f32) as u32;
    let y1 = (region.y + region.height).ceil().clamp(0.0, frame.height as f32) as u32;

    let mut canvas = RgbaImage::new(placement.size, placement.size);
    if x1 > x0 && y1 > y0 {
        let visible = imageops::crop_imm(&source, x0, y0, x1 - x0, y1 - y0);
        let resized = imageops::resize(
            &*visible,
            (((x1 - x0) as f32 * scale_x).round() as u32).max(1),
            (((y1 - y0) as f32 * scale_y).round() as u32).max(1),
            FilterType::Triangle,
        );
        let offset_x = placement.pad_x as f32 + (x0 as f32 - region.x) * scale_x;
        let offset_y = placement.pad_y as f32 + (y0 as f32 - region.y) * scale_y;
        imageops::overlay(&mut canvas, &resized, offset_x.round() as i64, offset_y.round() as i64);
    }

    Ok(to_tensor_data(&canvas, layout))
}

/// Turn raw model outputs into a hand observation.
///
/// `outputs[0]` holds the landmarks, `outputs[1]` the presence score and
/// `outputs[2]` (optional) the handedness score. Presence values outside
/// [0, 1] are treated as logits.
pub fn decode_landmarks(
    outputs: &[Vec<f32>],
    placement: &Letterbox,
    presence_threshold: f32,
) -> Result<Option<HandObservation>, DetectorError> {
    let landmarks = outputs
        .first()
        .ok_or_else(|| DetectorError::UnexpectedOutput("model produced no outputs".to_string()))?;

    if landmarks.len() < Joint::COUNT * LANDMARK_STRIDE {
        return Err(DetectorError::UnexpectedOutput(format!(
            "expected {} landmark values, got {}",
            Joint::COUNT * LANDMARK_STRIDE,
            landmarks.len()
        )));
    }

    let presence = outputs
        .get(1)
        .and_then(|v| v.first())
        .copied()
        .map(to_probability)
        .unwrap_or(1.0);

    if presence < presence_threshold {
        return Ok(None);
    }

    let mut observation = HandObservation::new(presence);
    if let Some(handedness) = outputs.get(2).and_then(|v| v.first()).copied() {
        observation.chirality = Some(chirality_from_score(to_probability(handedness)));
    }

    for joint in Joint::ALL {
        let base = joint.index() * LANDMARK_STRIDE;
        let top_left = placement.unmap(landmarks[base], landmarks[base + 1]);
        let location = flip_to_bottom_left(top_left, false);

        // The model has no per-landmark score; points off the frame get none
        let confidence = if location.is_in_frame() { presence } else { 0.0 };

        observation.insert(
            joint,
            RecognizedPoint {
                location,
                confidence,
            },
        );
    }

    Ok(Some(observation))
}

/// The handedness score is "right hand" for a mirrored (selfie) image. Frames
/// reach the model unmirrored, so a high score means a left hand.
fn chirality_from_score(right_if_mirrored: f32) -> Chirality {
    if right_if_mirrored > 0.5 {
        Chirality::Left
    } else {
        Chirality::Right
    }
}

/// Pass logits through a sigmoid, leave probabilities alone
fn to_probability(value: f32) -> f32 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        1.0 / (1.0 + (-value).exp())
    }
}

/// Convert an RGBA image to RGB floats in [0, 1] with the given layout
fn to_tensor_data(image: &RgbaImage, layout: InputLayout) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut output = vec![0.0f32; plane * 3];

    for (x, y, pixel) in image.enumerate_pixels() {
        let pixel_idx = (y * width + x) as usize;
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            match layout {
                InputLayout::Nhwc => output[pixel_idx * 3 + channel] = value,
                InputLayout::Nchw => output[channel * plane + pixel_idx] = value,
            }
        }
    }

    output
}

fn load_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::ModelLoad(e.to_string())
}

/// Find a model file: the explicit path when set, else `file` in a `models/` directory
pub(super) fn find_model(explicit: Option<&Path>, file: &str, setting: &str) -> Result<PathBuf, DetectorError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(DetectorError::ModelNotFound(path.display().to_string()));
    }

    for dir in model_dirs() {
        let candidate = dir.join(file);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(DetectorError::ModelNotFound(format!(
        "{} (place it in a 'models' directory next to the executable or set {})",
        file, setting
    )))
}

/// Candidate `models/` directories, nearest first
fn model_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    // Next to the executable and up to three levels above (cargo target dirs)
    if let Ok(exe_path) = std::env::current_exe() {
        let mut current: Option<&Path> = exe_path.parent();
        for _ in 0..4 {
            let Some(dir) = current else { break };
            dirs.push(dir.join("models"));
            current = dir.parent();
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("models"));
    }

    dirs
}
