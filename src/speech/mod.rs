//! Speech synthesis: the avatar's one externally audible capability.
//!
//! Components:
//! - `synth`: the `SpeechBackend` trait (the opaque platform capability),
//!   request/outcome types, and locale-to-voice-prefix mapping
//! - `kokoro`: Kokoro ONNX model inference + rodio playback with cancellation
//! - `driver`: sole owner of the backend; at-most-one utterance, start/end
//!   event broadcast, idempotent cancel

pub mod driver;
pub mod kokoro;
pub mod synth;

pub use driver::{SpeechDriver, SpeechEvent};
pub use kokoro::KokoroEngine;
pub use synth::{SpeakOutcome, SpeechBackend, SpeechRequest};
