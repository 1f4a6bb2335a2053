//! Speech driver: sole owner of the TTS backend.
//!
//! Serializes utterances (no queue; a new `speak` interrupts the current
//! one) and publishes lifecycle events on a broadcast channel. Every
//! started utterance gets exactly one `Ended`, whether it finished,
//! failed, or was cancelled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::synth::{select_voice_for_locale, SpeechBackend, SpeechRequest};

/// Utterance lifecycle, broadcast to the animator and anything else
/// that wants to follow along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    Started { id: u64 },
    Ended { id: u64 },
}

struct Utterance {
    id: u64,
    // Swapped to true by whichever side fires Ended first.
    ended_sent: Arc<AtomicBool>,
}

pub struct SpeechDriver {
    backend: Arc<dyn SpeechBackend>,
    events: broadcast::Sender<SpeechEvent>,
    next_id: AtomicU64,
    current: Mutex<Option<Utterance>>,
    // Serializes backend access across overlapping speak tasks.
    speak_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SpeechDriver {
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            backend,
            events,
            next_id: AtomicU64::new(1),
            current: Mutex::new(None),
            speak_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.events.subscribe()
    }

    pub fn available(&self) -> bool {
        self.backend.available()
    }

    pub fn voices(&self) -> Vec<String> {
        self.backend.voices()
    }

    /// Start speaking `request`. Interrupts any in-flight utterance (its
    /// `Ended` fires before the new `Started`). Returns the utterance id,
    /// or `None` when the request was silently dropped (empty text or no
    /// usable backend).
    pub fn speak(self: &Arc<Self>, mut request: SpeechRequest) -> Option<u64> {
        if request.text.trim().is_empty() {
            return None;
        }
        if !self.backend.available() {
            debug!("Speech backend unavailable; dropping utterance");
            return None;
        }

        self.cancel();

        request.voice = self.resolve_voice(&request);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ended_sent = Arc::new(AtomicBool::new(false));
        *self.current.lock().unwrap() = Some(Utterance {
            id,
            ended_sent: ended_sent.clone(),
        });

        let _ = self.events.send(SpeechEvent::Started { id });

        let driver = self.clone();
        tokio::spawn(async move {
            let _guard = driver.speak_lock.lock().await;

            // Cancelled while waiting for the previous utterance to wind down.
            if !ended_sent.load(Ordering::Relaxed) {
                let outcome = driver.backend.speak(&request).await;
                debug!(
                    "Utterance {id} done: gen={:.0}ms play={:.0}ms cancelled={}",
                    outcome.generate_ms, outcome.playback_ms, outcome.cancelled
                );
            }

            if !ended_sent.swap(true, Ordering::AcqRel) {
                let _ = driver.events.send(SpeechEvent::Ended { id });
                let mut current = driver.current.lock().unwrap();
                if current.as_ref().is_some_and(|u| u.id == id) {
                    *current = None;
                }
            }
        });

        Some(id)
    }

    /// Stop the in-flight utterance, firing its `Ended` immediately.
    /// No event when nothing is in flight.
    pub fn cancel(&self) {
        self.backend.cancel();
        if let Some(utterance) = self.current.lock().unwrap().take() {
            if !utterance.ended_sent.swap(true, Ordering::AcqRel) {
                let _ = self.events.send(SpeechEvent::Ended { id: utterance.id });
            }
        }
    }

    /// Is an utterance currently in flight (Started without Ended)?
    pub fn is_speaking(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    fn resolve_voice(&self, request: &SpeechRequest) -> Option<String> {
        if let Some(v) = &request.voice {
            if self.backend.has_voice(v) {
                return Some(v.clone());
            }
            warn!("Unknown voice '{v}'; falling back to locale match");
        }
        let voices = self.backend.voices();
        select_voice_for_locale(&voices, &request.locale).map(str::to_string)
    }
}
