//! Canonical avatar state and the command protocol that mutates it.
//!
//! `AvatarState` is owned exclusively by the shell; everything else sees it
//! through a watch channel. User intent and internal timer expiries both
//! arrive as tagged [`Command`] variants on a single mpsc channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The avatar's transient emotional expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
    Thinking,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprised,
        Emotion::Thinking,
    ];
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Surprised => "surprised",
            Self::Thinking => "thinking",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Self::Neutral),
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            "surprised" => Ok(Self::Surprised),
            "thinking" => Ok(Self::Thinking),
            other => Err(format!("unknown emotion: {other}")),
        }
    }
}

/// Canonical avatar state. Owned by the shell; mutated only in its
/// command handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarState {
    pub active: bool,
    pub emotion: Emotion,
    pub speaking: bool,
    pub message: String,
}

impl Default for AvatarState {
    fn default() -> Self {
        Self {
            active: true,
            emotion: Emotion::Neutral,
            speaking: false,
            message: String::new(),
        }
    }
}

impl AvatarState {
    /// Reset applied the instant `active` goes false: while inactive the
    /// avatar carries no emotion, no speech, no message.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.emotion = Emotion::Neutral;
        self.speaking = false;
        self.message.clear();
    }
}

/// Tunable animation settings (the control panel's slider).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settings {
    /// Cadence multiplier, clamped to [0.5, 3.0]. Timer delays divide by it.
    pub animation_speed: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            animation_speed: 1.0,
        }
    }
}

pub const MIN_ANIMATION_SPEED: f32 = 0.5;
pub const MAX_ANIMATION_SPEED: f32 = 3.0;

/// Everything that can happen to the avatar, as one tagged enum.
///
/// The first group is user intent from the control panel; the second group
/// is internal timer expiries routed back through the same channel so the
/// shell's handler stays the single point of mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ToggleActive,
    SetEmotion(Emotion),
    SetSpeaking(bool),
    SetMessage(String),
    /// Speak a message aloud: sets `message`, raises `speaking`, arms the
    /// auto-stop timer, and invokes the speech driver.
    Say(String),
    SetAnimationSpeed(f32),
    SetVoice(String),

    /// The animator held a non-neutral emotion for its full duration.
    AnimationComplete,
    /// The shell's post-completion debounce elapsed.
    EmotionDebounceElapsed,
    /// The message auto-stop timer fired.
    SpeechTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_round_trips_through_str() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.to_string().parse::<Emotion>().unwrap(), emotion);
        }
    }

    #[test]
    fn emotion_parse_is_case_insensitive() {
        assert_eq!("Happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!(" SURPRISED ".parse::<Emotion>().unwrap(), Emotion::Surprised);
        assert!("angry".parse::<Emotion>().is_err());
    }

    #[test]
    fn deactivate_clears_everything() {
        let mut state = AvatarState {
            active: true,
            emotion: Emotion::Happy,
            speaking: true,
            message: "Bonjour".into(),
        };
        state.deactivate();
        assert!(!state.active);
        assert_eq!(state.emotion, Emotion::Neutral);
        assert!(!state.speaking);
        assert!(state.message.is_empty());
    }
}
