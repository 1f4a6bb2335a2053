//! Derived visual state: the pose the view actually draws.
//!
//! `AnimationPose` is a pure function of the canonical state plus the
//! animator's timer phases. It is recomputed on every tick and never stored
//! anywhere else.

use serde::Serialize;

use crate::state::{AvatarState, Emotion};

/// Named animation applied to the avatar body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseName {
    #[default]
    Idle,
    Speaking,
    Happy,
    Sad,
    Surprised,
    Thinking,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouthState {
    #[default]
    Closed,
    Open,
}

impl MouthState {
    pub fn toggled(self) -> Self {
        match self {
            Self::Open => Self::Closed,
            Self::Closed => Self::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandGesture {
    #[default]
    Idle,
    Talking,
}

/// Timer phases owned by the animator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerPhases {
    pub blinking: bool,
    pub mouth: MouthState,
    pub hand: HandGesture,
}

/// The fully resolved visual state handed to the view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AnimationPose {
    pub pose: PoseName,
    pub mouth: MouthState,
    pub blinking: bool,
    pub hand: HandGesture,
    /// Particle overlay, shown for the happy emotion.
    pub particles: bool,
}

/// Resolve the pose from canonical state and timer phases.
///
/// Speaking wins over emotion (the mouth animation replaces the emotion
/// pose); a non-neutral emotion wins over idle.
pub fn resolve(state: &AvatarState, phases: TimerPhases) -> AnimationPose {
    let pose = if state.speaking {
        PoseName::Speaking
    } else {
        match state.emotion {
            Emotion::Neutral => PoseName::Idle,
            Emotion::Happy => PoseName::Happy,
            Emotion::Sad => PoseName::Sad,
            Emotion::Surprised => PoseName::Surprised,
            Emotion::Thinking => PoseName::Thinking,
        }
    };

    AnimationPose {
        pose,
        mouth: phases.mouth,
        blinking: phases.blinking,
        hand: phases.hand,
        particles: state.emotion == Emotion::Happy,
    }
}
