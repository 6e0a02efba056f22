//! Palm detector
//!
//! A MediaPipe-compatible SSD palm model looks at the whole letterboxed frame
//! and proposes where a hand is. Its box is turned into a square hand region
//! that the landmark model then sees at full input resolution.

use egui::{Pos2, Rect, Vec2};
use ort::session::Session;

use super::onnx::{build_session, find_model, preprocess, run_model};
use super::FrameData;
use crate::geometry::{letterbox, Letterbox, Roi};
use crate::pose::DetectorError;
use crate::settings::{InputLayout, ModelSettings};

/// Anchor grid per output layer: (stride, anchors per cell)
const ANCHOR_LAYERS: [(u32, usize); 2] = [(8, 2), (16, 6)];

/// Box (cx, cy, w, h) followed by 7 keypoints (x, y)
const VALUES_PER_ANCHOR: usize = 18;

const WRIST_KEYPOINT: usize = 0;
const MIDDLE_BASE_KEYPOINT: usize = 2;

/// Hand region side relative to the palm box
const PALM_TO_HAND_SCALE: f32 = 2.6;

/// Shift of the hand region toward the fingers, relative to the palm box
const PALM_TO_HAND_SHIFT: f32 = 0.5;

/// Score logits are clipped to this range before the sigmoid
const SCORE_CLIP: f32 = 100.0;

/// Center of an SSD anchor in normalized input coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

/// Anchor centers for a square input of `input_size` pixels
pub fn ssd_anchors(input_size: u32) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    for (stride, per_cell) in ANCHOR_LAYERS {
        let cells = input_size.div_ceil(stride).max(1);
        for y in 0..cells {
            for x in 0..cells {
                let anchor = Anchor {
                    x: (x as f32 + 0.5) / cells as f32,
                    y: (y as f32 + 0.5) / cells as f32,
                };
                anchors.extend(std::iter::repeat(anchor).take(per_cell));
            }
        }
    }
    anchors
}

/// Best palm in model-input pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawPalm {
    pub score: f32,
    pub center: Pos2,
    pub size: Vec2,
    pub wrist: Pos2,
    pub middle_base: Pos2,
}

/// Pick the highest scoring palm above `threshold`
pub fn decode_palms(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[Anchor],
    input_size: u32,
    threshold: f32,
) -> Result<Option<RawPalm>, DetectorError> {
    if scores.len() != anchors.len() || boxes.len() != anchors.len() * VALUES_PER_ANCHOR {
        return Err(DetectorError::UnexpectedOutput(format!(
            "palm model produced {} boxes and {} scores for {} anchors",
            boxes.len() / VALUES_PER_ANCHOR,
            scores.len(),
            anchors.len()
        )));
    }

    let best = scores
        .iter()
        .map(|&logit| 1.0 / (1.0 + (-logit.clamp(-SCORE_CLIP, SCORE_CLIP)).exp()))
        .enumerate()
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let Some((index, score)) = best else {
        return Ok(None);
    };

    let size = input_size as f32;
    let anchor = anchors[index];
    let params = &boxes[index * VALUES_PER_ANCHOR..(index + 1) * VALUES_PER_ANCHOR];
    let at = |x: f32, y: f32| Pos2::new(x + anchor.x * size, y + anchor.y * size);
    let keypoint = |k: usize| at(params[4 + k * 2], params[5 + k * 2]);

    Ok(Some(RawPalm {
        score,
        center: at(params[0], params[1]),
        size: Vec2::new(params[2], params[3]),
        wrist: keypoint(WRIST_KEYPOINT),
        middle_base: keypoint(MIDDLE_BASE_KEYPOINT),
    }))
}

/// A palm in frame pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PalmDetection {
    pub score: f32,
    pub bounds: Rect,
    pub wrist: Pos2,
    pub middle_base: Pos2,
}

impl PalmDetection {
    pub fn from_raw(raw: &RawPalm, placement: &Letterbox) -> Self {
        let half = raw.size / 2.0;
        let min = placement.unmap_pixels(raw.center.x - half.x, raw.center.y - half.y);
        let max = placement.unmap_pixels(raw.center.x + half.x, raw.center.y + half.y);
        Self {
            score: raw.score,
            bounds: Rect::from_two_pos(min, max),
            wrist: placement.unmap_pixels(raw.wrist.x, raw.wrist.y),
            middle_base: placement.unmap_pixels(raw.middle_base.x, raw.middle_base.y),
        }
    }

    /// Square region around the whole hand: the palm box moved toward the
    /// fingers and enlarged
    pub fn hand_roi(&self) -> Roi {
        let palm_side = self.bounds.width().max(self.bounds.height());
        let toward_fingers = (self.middle_base - self.wrist).normalized();
        let center = self.bounds.center() + toward_fingers * palm_side * PALM_TO_HAND_SHIFT;
        Roi::square(center, palm_side * PALM_TO_HAND_SCALE)
    }
}

/// Palm detector backed by an ONNX Runtime session
pub struct PalmDetector {
    session: Session,
    input_size: u32,
    layout: InputLayout,
    threshold: f32,
    anchors: Vec<Anchor>,
}

impl PalmDetector {
    pub fn load(settings: &ModelSettings) -> Result<Self, DetectorError> {
        let path = find_model(
            settings.palm_model_path.as_deref(),
            &settings.palm_model_file,
            "model.palm_model_path",
        )?;
        tracing::info!(path = %path.display(), "Loading palm detection model");

        let session = build_session(&path, settings.intra_threads)?;
        let anchors = ssd_anchors(settings.palm_input_size);
        tracing::info!(
            input_size = settings.palm_input_size,
            anchors = anchors.len(),
            "Palm detection model loaded"
        );

        Ok(Self {
            session,
            input_size: settings.palm_input_size,
            layout: settings.layout,
            threshold: settings.palm_threshold,
            anchors,
        })
    }

    /// Find the most confident palm in the frame
    pub fn detect(&mut self, frame: &FrameData) -> Result<Option<PalmDetection>, DetectorError> {
        let placement = letterbox(frame.width, frame.height, self.input_size);
        let input = preprocess(frame, &placement, self.layout)?;
        let outputs = run_model(&mut self.session, input, self.input_size, self.layout)?;

        // Output order differs between conversions; tell them apart by length
        let boxes = outputs
            .iter()
            .find(|o| o.len() == self.anchors.len() * VALUES_PER_ANCHOR)
            .ok_or_else(|| DetectorError::UnexpectedOutput("palm model has no box output".to_string()))?;
        let scores = outputs
            .iter()
            .find(|o| o.len() == self.anchors.len())
            .ok_or_else(|| DetectorError::UnexpectedOutput("palm model has no score output".to_string()))?;

        let palm = decode_palms(boxes, scores, &self.anchors, self.input_size, self.threshold)?
            .map(|raw| PalmDetection::from_raw(&raw, &placement));
        if let Some(palm) = &palm {
            tracing::debug!(
                frame = frame.frame_number,
                score = palm.score,
                x = palm.bounds.center().x,
                y = palm.bounds.center().y,
                "Palm found"
            );
        }
        Ok(palm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs_with_palm(anchors: &[Anchor], index: usize, logit: f32) -> (Vec<f32>, Vec<f32>) {
        let mut boxes = vec![0.0; anchors.len() * VALUES_PER_ANCHOR];
        let mut scores = vec![-10.0; anchors.len()];
        scores[index] = logit;

        let params = &mut boxes[index * VALUES_PER_ANCHOR..(index + 1) * VALUES_PER_ANCHOR];
        params[0] = 2.0;
        params[1] = -4.0;
        params[2] = 40.0;
        params[3] = 30.0;
        // Wrist below the middle finger base
        params[4 + WRIST_KEYPOINT * 2 + 1] = 10.0;
        params[4 + MIDDLE_BASE_KEYPOINT * 2 + 1] = -10.0;
        (boxes, scores)
    }

    #[test]
    fn test_anchor_grid() {
        let anchors = ssd_anchors(192);
        assert_eq!(anchors.len(), 24 * 24 * 2 + 12 * 12 * 6);
        assert_eq!(anchors.len(), 2016);

        assert_eq!(anchors[0], Anchor { x: 0.5 / 24.0, y: 0.5 / 24.0 });
        assert_eq!(anchors[0], anchors[1]);
        assert_eq!(anchors[2].x, 1.5 / 24.0);

        // The coarse layer starts after the fine one
        assert_eq!(anchors[1152], Anchor { x: 0.5 / 12.0, y: 0.5 / 12.0 });
        let last = anchors[anchors.len() - 1];
        assert!((last.x - 11.5 / 12.0).abs() < 1e-6);
        assert!((last.y - 11.5 / 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_best_palm() {
        let anchors = ssd_anchors(192);
        let (boxes, mut scores) = outputs_with_palm(&anchors, 1200, 3.0);
        scores[10] = 1.0;

        let palm = decode_palms(&boxes, &scores, &anchors, 192, 0.5).unwrap().unwrap();
        assert!(palm.score > 0.95);
        let anchor = anchors[1200];
        assert!((palm.center.x - (2.0 + anchor.x * 192.0)).abs() < 1e-4);
        assert!((palm.center.y - (-4.0 + anchor.y * 192.0)).abs() < 1e-4);
        assert_eq!(palm.size, Vec2::new(40.0, 30.0));
        assert!(palm.wrist.y > palm.middle_base.y);
    }

    #[test]
    fn test_decode_below_threshold() {
        let anchors = ssd_anchors(192);
        let (boxes, scores) = outputs_with_palm(&anchors, 5, -1.0);
        assert!(decode_palms(&boxes, &scores, &anchors, 192, 0.5).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_mismatched_outputs() {
        let anchors = ssd_anchors(192);
        let result = decode_palms(&[0.0; 18], &[0.0; 1], &anchors, 192, 0.5);
        assert!(matches!(result, Err(DetectorError::UnexpectedOutput(_))));
    }

    #[test]
    fn test_palm_maps_to_frame_pixels() {
        // 1280x720 into 192 leaves 42px bars top and bottom
        let placement = letterbox(1280, 720, 192);
        assert_eq!(placement.pad_y, 42);
        let raw = RawPalm {
            score: 0.9,
            center: Pos2::new(96.0, 96.0),
            size: Vec2::new(20.0, 20.0),
            wrist: Pos2::new(96.0, 106.0),
            middle_base: Pos2::new(96.0, 86.0),
        };
        let palm = PalmDetection::from_raw(&raw, &placement);
        assert!((palm.bounds.center().x - 640.0).abs() < 1e-3);
        assert!((palm.bounds.center().y - 360.0).abs() < 1e-3);
        assert!((palm.bounds.width() - 20.0 * 1280.0 / 192.0).abs() < 1e-3);
    }

    #[test]
    fn test_hand_roi_extends_toward_fingers() {
        let palm = PalmDetection {
            score: 0.9,
            bounds: Rect::from_center_size(Pos2::new(300.0, 400.0), Vec2::splat(100.0)),
            wrist: Pos2::new(300.0, 440.0),
            middle_base: Pos2::new(300.0, 360.0),
        };
        let roi = palm.hand_roi();
        assert!((roi.width - 260.0).abs() < 1e-3);
        assert_eq!(roi.width, roi.height);
        // Fingers point up (smaller y), so the region moves up by half the palm
        assert!((roi.center().y - 350.0).abs() < 1e-3);
        assert!((roi.center().x - 300.0).abs() < 1e-3);
    }
}
