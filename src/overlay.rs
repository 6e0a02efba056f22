//! Hand skeleton overlay
//!
//! Turns a [`HandObservation`] into line segments, joint dots and angle labels
//! in view coordinates, ready to paint over the video with an egui painter.

use std::time::{Duration, Instant};

use egui::{Align2, Color32, FontId, Painter, Pos2, Rect, Stroke, Vec2};

use crate::geometry::{flip_to_top_left, video_to_view, NormalizedPoint, VideoGravity};
use crate::pose::{Finger, HandObservation, Joint, PALM_BONES};
use crate::settings::OverlaySettings;

/// Offset of angle labels from their joint, in points
const LABEL_OFFSET: Vec2 = Vec2::new(8.0, -6.0);

/// Where the video sits in the view and how it is oriented
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMapping {
    /// Video frame size in pixels
    pub video_size: Vec2,
    /// View rectangle the video is placed in
    pub view_rect: Rect,
    pub gravity: VideoGravity,
    pub mirrored: bool,
}

impl ViewMapping {
    /// Detector-space point to view coordinates
    pub fn project(&self, point: NormalizedPoint) -> Pos2 {
        video_to_view(
            flip_to_top_left(point, self.mirrored),
            self.video_size,
            self.view_rect,
            self.gravity,
        )
    }
}

/// Overlay appearance
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayStyle {
    /// Indexed by [`Finger::ALL`] order
    pub finger_colors: [Color32; 5],
    pub palm_color: Color32,
    pub joint_color: Color32,
    pub label_color: Color32,
    pub line_width: f32,
    pub joint_radius: f32,
    /// Radius used for fingertips
    pub tip_radius: f32,
    pub show_angles: bool,
    pub min_confidence: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            finger_colors: [
                Color32::from_rgb(180, 229, 255),
                Color32::from_rgb(128, 64, 128),
                Color32::from_rgb(0, 204, 255),
                Color32::from_rgb(48, 255, 48),
                Color32::from_rgb(192, 101, 21),
            ],
            palm_color: Color32::from_rgb(220, 220, 220),
            joint_color: Color32::WHITE,
            label_color: Color32::from_rgb(255, 236, 140),
            line_width: 3.0,
            joint_radius: 4.0,
            tip_radius: 6.0,
            show_angles: true,
            min_confidence: 0.3,
        }
    }
}

impl OverlayStyle {
    pub fn from_settings(settings: &OverlaySettings) -> Self {
        Self {
            line_width: settings.line_width,
            show_angles: settings.show_angles,
            min_confidence: settings.min_confidence,
            ..Self::default()
        }
    }

    fn finger_color(&self, finger: Finger) -> Color32 {
        let idx = Finger::ALL.iter().position(|f| *f == finger).unwrap_or(0);
        self.finger_colors[idx]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub from: Pos2,
    pub to: Pos2,
    pub stroke: Stroke,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointDot {
    pub joint: Joint,
    pub center: Pos2,
    pub radius: f32,
    pub color: Color32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AngleLabel {
    pub joint: Joint,
    pub anchor: Pos2,
    pub degrees: f32,
    pub text: String,
}

/// Drawable primitives for one hand
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub segments: Vec<Segment>,
    pub joints: Vec<JointDot>,
    pub labels: Vec<AngleLabel>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.joints.is_empty() && self.labels.is_empty()
    }

    /// Paint bones, then joints, then labels on top
    pub fn paint(&self, painter: &Painter, label_color: Color32) {
        for segment in &self.segments {
            painter.line_segment([segment.from, segment.to], segment.stroke);
        }

        for dot in &self.joints {
            painter.circle_filled(dot.center, dot.radius, dot.color);
            painter.circle_stroke(dot.center, dot.radius, Stroke::new(1.0, Color32::from_black_alpha(180)));
        }

        for label in &self.labels {
            let galley = painter.layout_no_wrap(label.text.clone(), FontId::proportional(13.0), label_color);
            let rect = Align2::LEFT_BOTTOM.anchor_size(label.anchor, galley.size());
            painter.rect_filled(rect.expand(2.0), 3.0, Color32::from_black_alpha(160));
            painter.galley(rect.min, galley, label_color);
        }
    }
}

/// Build the overlay for `observation` placed through `mapping`
pub fn build_overlay(observation: &HandObservation, mapping: &ViewMapping, style: &OverlayStyle) -> Overlay {
    let mut overlay = Overlay::default();
    let project = |joint: Joint| {
        observation
            .point(joint, style.min_confidence)
            .map(|p| mapping.project(p))
    };

    for finger in Finger::ALL {
        let stroke = Stroke::new(style.line_width, style.finger_color(finger));
        for (from, to) in finger.bones() {
            if let (Some(from), Some(to)) = (project(from), project(to)) {
                overlay.segments.push(Segment { from, to, stroke });
            }
        }
    }

    let palm_stroke = Stroke::new(style.line_width, style.palm_color);
    for (from, to) in PALM_BONES {
        if let (Some(from), Some(to)) = (project(from), project(to)) {
            overlay.segments.push(Segment {
                from,
                to,
                stroke: palm_stroke,
            });
        }
    }

    for joint in Joint::ALL {
        let Some(center) = project(joint) else {
            continue;
        };
        let (radius, color) = match joint.finger() {
            Some(finger) if joint.is_tip() => (style.tip_radius, style.finger_color(finger)),
            _ => (style.joint_radius, style.joint_color),
        };
        overlay.joints.push(JointDot {
            joint,
            center,
            radius,
            color,
        });
    }

    if style.show_angles {
        for angle in observation.bend_angles(style.min_confidence) {
            let Some(center) = project(angle.joint) else {
                continue;
            };
            overlay.labels.push(AngleLabel {
                joint: angle.joint,
                anchor: center + LABEL_OFFSET,
                degrees: angle.degrees,
                text: format!("{:.0}°", angle.degrees),
            });
        }
    }

    overlay
}

/// Whether a result completed at `completed_at` is too old to draw at `now`
pub fn is_stale(completed_at: Instant, now: Instant, stale_after: Duration) -> bool {
    now.saturating_duration_since(completed_at) > stale_after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::RecognizedPoint;

    fn mapping(mirrored: bool) -> ViewMapping {
        ViewMapping {
            video_size: Vec2::new(640.0, 480.0),
            view_rect: Rect::from_min_size(Pos2::ZERO, Vec2::new(640.0, 480.0)),
            gravity: VideoGravity::Fit,
            mirrored,
        }
    }

    /// Every joint present, fingers straight up and fanned out
    fn full_hand(confidence: f32) -> HandObservation {
        let mut hand = HandObservation::new(confidence);
        hand.insert(Joint::Wrist, RecognizedPoint::new(0.5, 0.1, confidence));
        for (i, finger) in Finger::ALL.iter().enumerate() {
            let x = 0.3 + 0.1 * i as f32;
            for (j, joint) in finger.chain().iter().skip(1).enumerate() {
                hand.insert(*joint, RecognizedPoint::new(x, 0.3 + 0.1 * j as f32, confidence));
            }
        }
        hand
    }

    #[test]
    fn test_project_flips_y() {
        let m = mapping(false);
        let top = m.project(NormalizedPoint::new(0.25, 1.0));
        assert!((top.x - 160.0).abs() < 1e-3);
        assert!(top.y.abs() < 1e-3);

        let mirrored = mapping(true).project(NormalizedPoint::new(0.25, 0.0));
        assert!((mirrored.x - 480.0).abs() < 1e-3);
        assert!((mirrored.y - 480.0).abs() < 1e-3);
    }

    #[test]
    fn test_full_hand_counts() {
        let overlay = build_overlay(&full_hand(0.9), &mapping(true), &OverlayStyle::default());
        assert_eq!(overlay.segments.len(), 5 * 4 + PALM_BONES.len());
        assert_eq!(overlay.joints.len(), Joint::COUNT);
        assert_eq!(overlay.labels.len(), 15);

        let tips = overlay.joints.iter().filter(|d| d.joint.is_tip()).count();
        let large = overlay.joints.iter().filter(|d| d.radius > 5.0).count();
        assert_eq!(tips, 5);
        assert_eq!(large, 5);
    }

    #[test]
    fn test_straight_finger_labels() {
        let overlay = build_overlay(&full_hand(0.9), &mapping(false), &OverlayStyle::default());
        let label = overlay
            .labels
            .iter()
            .find(|l| l.joint == Joint::IndexPip)
            .unwrap();
        assert_eq!(label.text, "180°");
    }

    #[test]
    fn test_angles_hidden() {
        let style = OverlayStyle {
            show_angles: false,
            ..OverlayStyle::default()
        };
        let overlay = build_overlay(&full_hand(0.9), &mapping(false), &style);
        assert!(overlay.labels.is_empty());
        assert!(!overlay.segments.is_empty());
    }

    #[test]
    fn test_low_confidence_hidden() {
        let overlay = build_overlay(&full_hand(0.1), &mapping(false), &OverlayStyle::default());
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_missing_joint_breaks_chain() {
        let mut hand = HandObservation::new(0.9);
        for (joint, point) in full_hand(0.9).iter() {
            if joint != Joint::MiddlePip {
                hand.insert(joint, *point);
            }
        }
        let overlay = build_overlay(&hand, &mapping(false), &OverlayStyle::default());
        assert_eq!(overlay.segments.len(), 5 * 4 + PALM_BONES.len() - 2);
        assert_eq!(overlay.joints.len(), Joint::COUNT - 1);
        // MCP and DIP lose a neighbour, PIP itself is gone
        assert_eq!(overlay.labels.len(), 12);
    }

    #[test]
    fn test_stale() {
        let start = Instant::now();
        let stale_after = Duration::from_millis(500);
        assert!(!is_stale(start, start + Duration::from_millis(100), stale_after));
        assert!(is_stale(start, start + Duration::from_millis(600), stale_after));
        assert!(!is_stale(start + Duration::from_millis(10), start, stale_after));
    }
}
