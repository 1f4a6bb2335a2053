//! The speech capability boundary: one trait, one request shape.
//!
//! Kokoro voice names encode language and gender in their prefix
//! (`af_heart` = American female, `ff_siwis` = French female, ...), which is
//! what locale-by-prefix voice selection keys on.

use async_trait::async_trait;

/// One utterance request. Built from the avatar's message plus speech config.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    /// BCP 47 style locale, e.g. "fr-FR". Used for voice selection when no
    /// explicit voice is set.
    pub locale: String,
    /// Speaking rate multiplier (1.0 = normal).
    pub rate: f32,
    /// Playback pitch factor (1.0 = normal).
    pub pitch: f32,
    /// Playback volume (1.0 = full).
    pub volume: f32,
    /// Explicit voice override; resolved by the driver when absent.
    pub voice: Option<String>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locale: locale.into(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
        }
    }
}

/// Result of one utterance with timing breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeakOutcome {
    pub generate_ms: f64,
    pub playback_ms: f64,
    pub cancelled: bool,
}

/// The platform speech capability. Process-wide singular: only the
/// [`SpeechDriver`](super::driver::SpeechDriver) may touch it.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Whether the capability is usable at all (model loaded, audio output
    /// open). When false, every speak is a silent no-op upstream.
    fn available(&self) -> bool;

    /// Voice names known to the backend, sorted.
    fn voices(&self) -> Vec<String>;

    /// Whether `name` is a known voice.
    fn has_voice(&self, name: &str) -> bool {
        self.voices().iter().any(|v| v == name)
    }

    /// Synthesize and play the request to completion or cancellation.
    async fn speak(&self, request: &SpeechRequest) -> SpeakOutcome;

    /// Stop the in-flight utterance immediately. Safe to call when idle.
    fn cancel(&self);
}

/// Map a locale to the Kokoro voice-name language prefix.
///
/// Only the language subtag matters, except English where the region picks
/// between American and British voices.
pub fn locale_voice_prefix(locale: &str) -> Option<char> {
    let lower = locale.to_ascii_lowercase();
    let mut parts = lower.split(['-', '_']);
    let language = parts.next()?;
    let region = parts.next();

    match language {
        "en" => match region {
            Some("gb") | Some("uk") => Some('b'),
            _ => Some('a'),
        },
        "es" => Some('e'),
        "fr" => Some('f'),
        "hi" => Some('h'),
        "it" => Some('i'),
        "ja" => Some('j'),
        "pt" => Some('p'),
        "zh" => Some('z'),
        _ => None,
    }
}

/// First voice matching the locale's prefix, if any.
pub fn select_voice_for_locale<'a>(voices: &'a [String], locale: &str) -> Option<&'a str> {
    let prefix = locale_voice_prefix(locale)?;
    voices
        .iter()
        .find(|v| v.starts_with(prefix))
        .map(String::as_str)
}
