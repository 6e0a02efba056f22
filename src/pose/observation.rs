//! Detector output for a single hand

use std::collections::BTreeMap;

use super::skeleton::{Finger, Joint};
use crate::geometry::{bend_angle, NormalizedPoint};

/// A joint position with the detector's confidence in it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecognizedPoint {
    /// Normalized position, origin bottom-left
    pub location: NormalizedPoint,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

impl RecognizedPoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            location: NormalizedPoint::new(x, y),
            confidence,
        }
    }
}

/// Which hand was detected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chirality {
    Left,
    Right,
}

impl Chirality {
    pub fn display_name(&self) -> &'static str {
        match self {
            Chirality::Left => "Left",
            Chirality::Right => "Right",
        }
    }
}

/// Bend angle at a joint, in degrees
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BendAngle {
    pub joint: Joint,
    pub degrees: f32,
}

/// Named joints of one detected hand.
///
/// The map is sparse: detectors may omit joints they could not place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandObservation {
    points: BTreeMap<Joint, RecognizedPoint>,
    /// Overall confidence that a hand is present
    pub confidence: f32,
    pub chirality: Option<Chirality>,
}

impl HandObservation {
    pub fn new(confidence: f32) -> Self {
        Self {
            points: BTreeMap::new(),
            confidence,
            chirality: None,
        }
    }

    pub fn insert(&mut self, joint: Joint, point: RecognizedPoint) {
        self.points.insert(joint, point);
    }

    pub fn get(&self, joint: Joint) -> Option<&RecognizedPoint> {
        self.points.get(&joint)
    }

    /// Location of `joint` if it was reported with at least `min_confidence`
    pub fn point(&self, joint: Joint, min_confidence: f32) -> Option<NormalizedPoint> {
        self.points
            .get(&joint)
            .filter(|p| p.confidence >= min_confidence)
            .map(|p| p.location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Joint, &RecognizedPoint)> {
        self.points.iter().map(|(joint, point)| (*joint, point))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bend angle at `joint` along its finger chain.
    ///
    /// `None` for the wrist, fingertips, joints whose neighbours are missing or
    /// below `min_confidence`, and degenerate geometry.
    pub fn bend_angle(&self, joint: Joint, min_confidence: f32) -> Option<f32> {
        let finger = joint.finger()?;
        let (previous, _, next) = finger
            .bend_triplets()
            .into_iter()
            .find(|(_, j, _)| *j == joint)?;

        bend_angle(
            self.point(previous, min_confidence)?,
            self.point(joint, min_confidence)?,
            self.point(next, min_confidence)?,
        )
    }

    /// Bend angles for every interior joint that can be computed, thumb first
    pub fn bend_angles(&self, min_confidence: f32) -> Vec<BendAngle> {
        Finger::ALL
            .iter()
            .flat_map(|finger| finger.bend_triplets())
            .filter_map(|(_, joint, _)| {
                self.bend_angle(joint, min_confidence)
                    .map(|degrees| BendAngle { joint, degrees })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Open hand: every finger straight up from the wrist, fanned out
    fn open_hand(confidence: f32) -> HandObservation {
        let mut hand = HandObservation::new(confidence);
        hand.insert(Joint::Wrist, RecognizedPoint::new(0.5, 0.1, confidence));
        for (f, finger) in Finger::ALL.iter().enumerate() {
            let x = 0.3 + f as f32 * 0.1;
            for (i, joint) in finger.chain()[1..].iter().enumerate() {
                let y = 0.3 + i as f32 * 0.1;
                hand.insert(*joint, RecognizedPoint::new(x, y, confidence));
            }
        }
        hand
    }

    #[test]
    fn test_point_respects_confidence() {
        let mut hand = HandObservation::new(0.9);
        hand.insert(Joint::Wrist, RecognizedPoint::new(0.5, 0.5, 0.4));
        assert!(hand.point(Joint::Wrist, 0.3).is_some());
        assert!(hand.point(Joint::Wrist, 0.5).is_none());
        assert!(hand.point(Joint::IndexTip, 0.0).is_none());
    }

    #[test]
    fn test_straight_finger_joints_are_180() {
        let hand = open_hand(0.9);
        for joint in [Joint::IndexDip, Joint::MiddlePip, Joint::LittleDip] {
            let angle = hand.bend_angle(joint, 0.5).unwrap();
            assert!((angle - 180.0).abs() < 0.1, "{:?} = {}", joint, angle);
        }
    }

    #[test]
    fn test_bent_finger() {
        let mut hand = open_hand(0.9);
        // Curl the index tip sideways at the DIP
        let dip = hand.get(Joint::IndexDip).unwrap().location;
        hand.insert(Joint::IndexTip, RecognizedPoint::new(dip.x + 0.1, dip.y, 0.9));
        let angle = hand.bend_angle(Joint::IndexDip, 0.5).unwrap();
        assert!((angle - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_no_angle_at_wrist_or_tip() {
        let hand = open_hand(0.9);
        assert!(hand.bend_angle(Joint::Wrist, 0.0).is_none());
        assert!(hand.bend_angle(Joint::ThumbTip, 0.0).is_none());
    }

    #[test]
    fn test_all_interior_angles() {
        let hand = open_hand(0.9);
        let angles = hand.bend_angles(0.5);
        assert_eq!(angles.len(), 15);
        assert_eq!(angles[0].joint, Joint::ThumbCmc);
    }

    #[test]
    fn test_missing_neighbour_skips_angle() {
        let mut hand = open_hand(0.9);
        hand.insert(Joint::RingDip, RecognizedPoint::new(0.6, 0.5, 0.1));
        let angles = hand.bend_angles(0.5);
        // Ring PIP, DIP lose a neighbour or themselves; ring MCP keeps its angle
        assert!(angles.iter().all(|a| a.joint != Joint::RingPip && a.joint != Joint::RingDip));
        assert!(angles.iter().any(|a| a.joint == Joint::RingMcp));
        assert_eq!(angles.len(), 13);
    }

    #[test]
    fn test_low_confidence_hand_has_no_angles() {
        let hand = open_hand(0.2);
        assert!(hand.bend_angles(0.5).is_empty());
    }
}
