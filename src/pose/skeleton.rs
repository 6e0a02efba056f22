//! Hand skeleton graph
//!
//! The 21 landmarks follow the MediaPipe hand model ordering, which is also the
//! order the landmark model writes them to its output tensor.

/// A named anatomical landmark on the hand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Joint {
    Wrist,
    ThumbCmc,
    ThumbMp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    LittleMcp,
    LittlePip,
    LittleDip,
    LittleTip,
}

impl Joint {
    /// Number of landmarks reported per hand
    pub const COUNT: usize = 21;

    /// All joints in landmark index order
    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Wrist,
        Joint::ThumbCmc,
        Joint::ThumbMp,
        Joint::ThumbIp,
        Joint::ThumbTip,
        Joint::IndexMcp,
        Joint::IndexPip,
        Joint::IndexDip,
        Joint::IndexTip,
        Joint::MiddleMcp,
        Joint::MiddlePip,
        Joint::MiddleDip,
        Joint::MiddleTip,
        Joint::RingMcp,
        Joint::RingPip,
        Joint::RingDip,
        Joint::RingTip,
        Joint::LittleMcp,
        Joint::LittlePip,
        Joint::LittleDip,
        Joint::LittleTip,
    ];

    /// Landmark index in the model output
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Joint> {
        Joint::ALL.get(index).copied()
    }

    /// Finger this joint belongs to, `None` for the wrist
    pub fn finger(self) -> Option<Finger> {
        match self {
            Joint::Wrist => None,
            Joint::ThumbCmc | Joint::ThumbMp | Joint::ThumbIp | Joint::ThumbTip => Some(Finger::Thumb),
            Joint::IndexMcp | Joint::IndexPip | Joint::IndexDip | Joint::IndexTip => Some(Finger::Index),
            Joint::MiddleMcp | Joint::MiddlePip | Joint::MiddleDip | Joint::MiddleTip => Some(Finger::Middle),
            Joint::RingMcp | Joint::RingPip | Joint::RingDip | Joint::RingTip => Some(Finger::Ring),
            Joint::LittleMcp | Joint::LittlePip | Joint::LittleDip | Joint::LittleTip => Some(Finger::Little),
        }
    }

    pub fn is_tip(self) -> bool {
        matches!(
            self,
            Joint::ThumbTip | Joint::IndexTip | Joint::MiddleTip | Joint::RingTip | Joint::LittleTip
        )
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Joint::Wrist => "Wrist",
            Joint::ThumbCmc => "Thumb CMC",
            Joint::ThumbMp => "Thumb MP",
            Joint::ThumbIp => "Thumb IP",
            Joint::ThumbTip => "Thumb tip",
            Joint::IndexMcp => "Index MCP",
            Joint::IndexPip => "Index PIP",
            Joint::IndexDip => "Index DIP",
            Joint::IndexTip => "Index tip",
            Joint::MiddleMcp => "Middle MCP",
            Joint::MiddlePip => "Middle PIP",
            Joint::MiddleDip => "Middle DIP",
            Joint::MiddleTip => "Middle tip",
            Joint::RingMcp => "Ring MCP",
            Joint::RingPip => "Ring PIP",
            Joint::RingDip => "Ring DIP",
            Joint::RingTip => "Ring tip",
            Joint::LittleMcp => "Little MCP",
            Joint::LittlePip => "Little PIP",
            Joint::LittleDip => "Little DIP",
            Joint::LittleTip => "Little tip",
        }
    }
}

/// A finger, identifying one skeleton chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Little,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Little,
    ];

    /// Bone path from the wrist to the fingertip
    pub fn chain(self) -> [Joint; 5] {
        match self {
            Finger::Thumb => [Joint::Wrist, Joint::ThumbCmc, Joint::ThumbMp, Joint::ThumbIp, Joint::ThumbTip],
            Finger::Index => [Joint::Wrist, Joint::IndexMcp, Joint::IndexPip, Joint::IndexDip, Joint::IndexTip],
            Finger::Middle => [Joint::Wrist, Joint::MiddleMcp, Joint::MiddlePip, Joint::MiddleDip, Joint::MiddleTip],
            Finger::Ring => [Joint::Wrist, Joint::RingMcp, Joint::RingPip, Joint::RingDip, Joint::RingTip],
            Finger::Little => [Joint::Wrist, Joint::LittleMcp, Joint::LittlePip, Joint::LittleDip, Joint::LittleTip],
        }
    }

    /// Consecutive joint pairs along the chain
    pub fn bones(self) -> impl Iterator<Item = (Joint, Joint)> {
        let chain = self.chain();
        (0..chain.len() - 1).map(move |i| (chain[i], chain[i + 1]))
    }

    /// `(previous, joint, next)` for every joint that has two chain neighbours
    pub fn bend_triplets(self) -> [(Joint, Joint, Joint); 3] {
        let c = self.chain();
        [(c[0], c[1], c[2]), (c[1], c[2], c[3]), (c[2], c[3], c[4])]
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Finger::Thumb => "Thumb",
            Finger::Index => "Index",
            Finger::Middle => "Middle",
            Finger::Ring => "Ring",
            Finger::Little => "Little",
        }
    }
}

/// Knuckle line across the palm, drawn in addition to the finger chains
pub const PALM_BONES: [(Joint, Joint); 3] = [
    (Joint::IndexMcp, Joint::MiddleMcp),
    (Joint::MiddleMcp, Joint::RingMcp),
    (Joint::RingMcp, Joint::LittleMcp),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_order_matches_all() {
        for (i, joint) in Joint::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
            assert_eq!(Joint::from_index(i), Some(*joint));
        }
        assert_eq!(Joint::from_index(21), None);
    }

    #[test]
    fn test_chains_start_at_wrist_and_end_at_tip() {
        for finger in Finger::ALL {
            let chain = finger.chain();
            assert_eq!(chain[0], Joint::Wrist);
            assert!(chain[4].is_tip());
            for joint in &chain[1..] {
                assert_eq!(joint.finger(), Some(finger));
            }
        }
    }

    #[test]
    fn test_every_joint_in_exactly_one_chain() {
        for joint in Joint::ALL.iter().filter(|j| **j != Joint::Wrist) {
            let count = Finger::ALL
                .iter()
                .filter(|f| f.chain().contains(joint))
                .count();
            assert_eq!(count, 1, "{:?}", joint);
        }
    }

    #[test]
    fn test_bones_and_triplets() {
        let bones: Vec<_> = Finger::Index.bones().collect();
        assert_eq!(bones.len(), 4);
        assert_eq!(bones[0], (Joint::Wrist, Joint::IndexMcp));
        assert_eq!(bones[3], (Joint::IndexDip, Joint::IndexTip));

        let triplets = Finger::Thumb.bend_triplets();
        assert_eq!(triplets[0].1, Joint::ThumbCmc);
        assert_eq!(triplets[2], (Joint::ThumbMp, Joint::ThumbIp, Joint::ThumbTip));
    }
}
