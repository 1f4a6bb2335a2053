//! Predefined messages and the recent-utterance log.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;

/// Canned phrases offered by the control panel, in the avatar's locale.
pub const PREDEFINED_MESSAGES: [&str; 6] = [
    "Bonjour ! Je suis Carla, votre assistante virtuelle.",
    "Comment puis-je vous aider aujourd'hui ?",
    "C'est un plaisir de vous rencontrer !",
    "Avez-vous des questions pour moi ?",
    "Je suis là pour vous accompagner.",
    "Que souhaitez-vous découvrir ?",
];

const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct UtteranceRecord {
    pub timestamp: String,
    pub text: String,
    pub chars: usize,
    pub voice: String,
    pub spoken: bool,
}

/// Bounded in-memory log of what the avatar has said, newest first.
pub struct UtteranceLog {
    records: Mutex<VecDeque<UtteranceRecord>>,
}

impl UtteranceLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// `spoken` is false when the text only drove the animation (no backend).
    pub fn record(&self, text: &str, voice: &str, spoken: bool) {
        let record = UtteranceRecord {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            text: text.to_string(),
            chars: text.chars().count(),
            voice: voice.to_string(),
            spoken,
        };

        let mut records = self.records.lock().unwrap();
        if records.len() == HISTORY_CAPACITY {
            records.pop_back();
        }
        records.push_front(record);
    }

    pub fn recent(&self) -> Vec<UtteranceRecord> {
        self.records.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for UtteranceLog {
    fn default() -> Self {
        Self::new()
    }
}
