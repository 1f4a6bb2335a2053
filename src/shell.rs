//! Application shell: the single owner of canonical avatar state.
//!
//! Every mutation arrives as a `Command` on one mpsc channel, whether it
//! came from the HTTP API, the MCP server, or one of the shell's own
//! detached timers. The handler applies it and publishes the new state on
//! the watch channel; nothing else writes state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{AvatarConfig, TimingConfig};
use crate::messages::UtteranceLog;
use crate::speech::{SpeechDriver, SpeechRequest};
use crate::state::{
    AvatarState, Command, Emotion, Settings, MAX_ANIMATION_SPEED, MIN_ANIMATION_SPEED,
};
use crate::timers::TimerSlot;

pub struct Shell {
    avatar: AvatarConfig,
    timing: TimingConfig,
    rx: mpsc::Receiver<Command>,
    // Clone handed to the detached timer slots so expiries come back
    // through the same channel.
    tx: mpsc::Sender<Command>,
    state_tx: watch::Sender<AvatarState>,
    settings_tx: watch::Sender<Settings>,
    driver: Arc<SpeechDriver>,
    log: Arc<UtteranceLog>,

    // Voice override from the control panel; None means locale default.
    voice: Option<String>,
    auto_stop: TimerSlot,
    emotion_debounce: TimerSlot,
}

impl Shell {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        avatar: AvatarConfig,
        timing: TimingConfig,
        rx: mpsc::Receiver<Command>,
        tx: mpsc::Sender<Command>,
        state_tx: watch::Sender<AvatarState>,
        settings_tx: watch::Sender<Settings>,
        driver: Arc<SpeechDriver>,
        log: Arc<UtteranceLog>,
    ) -> Self {
        Self {
            avatar,
            timing,
            rx,
            tx,
            state_tx,
            settings_tx,
            driver,
            log,
            voice: None,
            auto_stop: TimerSlot::new(),
            emotion_debounce: TimerSlot::new(),
        }
    }

    pub async fn run(mut self) {
        info!("{} is ready", self.avatar.name);
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        self.driver.cancel();
        debug!("Shell stopped");
    }

    fn active(&self) -> bool {
        self.state_tx.borrow().active
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::ToggleActive => {
                if self.active() {
                    // Reset everything and silence the driver. The pending
                    // auto-stop timer is deliberately left alive; its late
                    // firing re-clears already-cleared fields.
                    self.state_tx.send_modify(|s| s.deactivate());
                    self.driver.cancel();
                    self.emotion_debounce.cancel();
                    info!("Avatar deactivated");
                } else {
                    self.state_tx.send_modify(|s| s.active = true);
                    info!("Avatar activated");
                }
            }

            Command::SetEmotion(emotion) => {
                if !self.active() {
                    debug!("Dropping emotion change while inactive");
                    return;
                }
                self.state_tx.send_modify(|s| s.emotion = emotion);
            }

            Command::SetSpeaking(speaking) => {
                if !self.active() {
                    return;
                }
                self.state_tx.send_modify(|s| s.speaking = speaking);
                if !speaking {
                    self.driver.cancel();
                }
            }

            Command::SetMessage(text) => {
                if !self.active() {
                    return;
                }
                self.state_tx.send_modify(|s| s.message = text);
            }

            Command::Say(text) => self.say(text),

            Command::SetAnimationSpeed(speed) => {
                let speed = speed.clamp(MIN_ANIMATION_SPEED, MAX_ANIMATION_SPEED);
                let _ = self.settings_tx.send(Settings {
                    animation_speed: speed,
                });
            }

            Command::SetVoice(voice) => {
                if self.driver.voices().iter().any(|v| *v == voice) {
                    info!("Voice set to {voice}");
                    self.voice = Some(voice);
                } else {
                    warn!("Ignoring unknown voice '{voice}'");
                }
            }

            Command::AnimationComplete => {
                if self.state_tx.borrow().emotion != Emotion::Neutral {
                    self.emotion_debounce.arm(
                        Duration::from_millis(self.timing.emotion_debounce),
                        self.tx.clone(),
                        Command::EmotionDebounceElapsed,
                    );
                }
            }

            Command::EmotionDebounceElapsed => {
                if self.state_tx.borrow().emotion != Emotion::Neutral {
                    self.state_tx.send_modify(|s| s.emotion = Emotion::Neutral);
                }
            }

            Command::SpeechTimeout => {
                self.state_tx.send_modify(|s| {
                    s.speaking = false;
                    s.message.clear();
                });
            }
        }
    }

    fn say(&mut self, text: String) {
        if !self.active() {
            debug!("Dropping message while inactive");
            return;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        self.state_tx.send_modify(|s| {
            s.message = text.clone();
            s.speaking = true;
        });

        // Character-count heuristic from the source animation; runs on its
        // own clock and ignores actual playback duration.
        let delay = trimmed.chars().count() as u64 * self.timing.autostop_per_char
            + self.timing.autostop_base;
        self.auto_stop.arm(
            Duration::from_millis(delay),
            self.tx.clone(),
            Command::SpeechTimeout,
        );

        let mut request = SpeechRequest::new(trimmed, self.avatar.locale.as_str());
        request.voice = self.voice.clone();
        let spoken = self.driver.speak(request).is_some();

        let voice = self.voice.as_deref().unwrap_or("auto");
        self.log.record(trimmed, voice, spoken);
        info!("Saying ({} chars, auto-stop in {delay}ms)", trimmed.chars().count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::speech::{SpeakOutcome, SpeechBackend};

    struct MockBackend {
        available: bool,
        cancelled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SpeechBackend for MockBackend {
        fn available(&self) -> bool {
            self.available
        }

        fn voices(&self) -> Vec<String> {
            if self.available {
                vec!["ff_siwis".into(), "af_heart".into()]
            } else {
                Vec::new()
            }
        }

        async fn speak(&self, _request: &SpeechRequest) -> SpeakOutcome {
            self.cancelled.store(false, Ordering::Relaxed);
            loop {
                if self.cancelled.load(Ordering::Relaxed) {
                    return SpeakOutcome {
                        cancelled: true,
                        ..SpeakOutcome::default()
                    };
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::Relaxed);
        }
    }

    struct Harness {
        tx: mpsc::Sender<Command>,
        state_rx: watch::Receiver<AvatarState>,
        settings_rx: watch::Receiver<Settings>,
        driver: Arc<SpeechDriver>,
    }

    fn spawn_shell(backend_available: bool) -> Harness {
        let (tx, rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(AvatarState::default());
        let (settings_tx, settings_rx) = watch::channel(Settings::default());
        let driver = SpeechDriver::new(Arc::new(MockBackend {
            available: backend_available,
            cancelled: Arc::new(AtomicBool::new(false)),
        }));

        let shell = Shell::new(
            AvatarConfig::default(),
            TimingConfig::default(),
            rx,
            tx.clone(),
            state_tx,
            settings_tx,
            driver.clone(),
            Arc::new(UtteranceLog::new()),
        );
        tokio::spawn(shell.run());

        Harness {
            tx,
            state_rx,
            settings_rx,
            driver,
        }
    }

    async fn settle() {
        // Let the shell drain its queue without advancing virtual time.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_off_resets_state_and_cancels_speech() {
        let h = spawn_shell(true);

        h.tx.send(Command::Say("Bonjour tout le monde".into()))
            .await
            .unwrap();
        h.tx.send(Command::SetEmotion(Emotion::Happy)).await.unwrap();
        settle().await;
        assert!(h.state_rx.borrow().speaking);
        assert!(h.driver.is_speaking());

        h.tx.send(Command::ToggleActive).await.unwrap();
        settle().await;

        let state = h.state_rx.borrow().clone();
        assert!(!state.active);
        assert!(!state.speaking);
        assert_eq!(state.emotion, Emotion::Neutral);
        assert!(state.message.is_empty());
        assert!(!h.driver.is_speaking());

        h.tx.send(Command::ToggleActive).await.unwrap();
        settle().await;
        assert!(h.state_rx.borrow().active);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_dropped_while_inactive() {
        let h = spawn_shell(false);

        h.tx.send(Command::ToggleActive).await.unwrap();
        h.tx.send(Command::SetEmotion(Emotion::Sad)).await.unwrap();
        h.tx.send(Command::Say("Ignoré".into())).await.unwrap();
        h.tx.send(Command::SetSpeaking(true)).await.unwrap();
        settle().await;

        let state = h.state_rx.borrow().clone();
        assert_eq!(state.emotion, Emotion::Neutral);
        assert!(!state.speaking);
        assert!(state.message.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn say_auto_stops_on_character_count() {
        let h = spawn_shell(false);

        // 3 chars → 3*100 + 2000 = 2300 ms
        h.tx.send(Command::Say("Oui".into())).await.unwrap();
        settle().await;
        assert!(h.state_rx.borrow().speaking);
        assert_eq!(h.state_rx.borrow().message, "Oui");

        tokio::time::sleep(Duration::from_millis(2299)).await;
        settle().await;
        assert!(h.state_rx.borrow().speaking);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert!(!h.state_rx.borrow().speaking);
        assert!(h.state_rx.borrow().message.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_say_rearms_auto_stop() {
        let h = spawn_shell(false);

        h.tx.send(Command::Say("Oui".into())).await.unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_millis(2000)).await;

        h.tx.send(Command::Say("Non".into())).await.unwrap();
        settle().await;

        // Old timer (due at 2300) was cancelled; the new one runs its full
        // 2300 from here.
        tokio::time::sleep(Duration::from_millis(2299)).await;
        settle().await;
        assert!(h.state_rx.borrow().speaking);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert!(!h.state_rx.borrow().speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_auto_stop_after_deactivation_is_harmless() {
        let h = spawn_shell(false);

        h.tx.send(Command::Say("Oui".into())).await.unwrap();
        settle().await;
        h.tx.send(Command::ToggleActive).await.unwrap();
        settle().await;
        assert!(!h.state_rx.borrow().active);

        // The auto-stop timer survives deactivation and fires late into an
        // already-cleared state.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        settle().await;
        let state = h.state_rx.borrow().clone();
        assert!(!state.active);
        assert!(!state.speaking);
        assert!(state.message.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn emotion_debounce_resets_after_half_second() {
        let h = spawn_shell(false);

        h.tx.send(Command::SetEmotion(Emotion::Happy)).await.unwrap();
        h.tx.send(Command::AnimationComplete).await.unwrap();
        settle().await;
        assert_eq!(h.state_rx.borrow().emotion, Emotion::Happy);

        tokio::time::sleep(Duration::from_millis(499)).await;
        settle().await;
        assert_eq!(h.state_rx.borrow().emotion, Emotion::Happy);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(h.state_rx.borrow().emotion, Emotion::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn animation_complete_with_neutral_emotion_is_noop() {
        let h = spawn_shell(false);

        h.tx.send(Command::AnimationComplete).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(h.state_rx.borrow().emotion, Emotion::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn animation_speed_is_clamped() {
        let h = spawn_shell(false);

        h.tx.send(Command::SetAnimationSpeed(10.0)).await.unwrap();
        settle().await;
        assert_eq!(h.settings_rx.borrow().animation_speed, MAX_ANIMATION_SPEED);

        h.tx.send(Command::SetAnimationSpeed(0.1)).await.unwrap();
        settle().await;
        assert_eq!(h.settings_rx.borrow().animation_speed, MIN_ANIMATION_SPEED);
    }

    #[tokio::test(start_paused = true)]
    async fn set_speaking_false_silences_driver() {
        let h = spawn_shell(true);

        h.tx.send(Command::Say("Une longue phrase".into())).await.unwrap();
        settle().await;
        assert!(h.driver.is_speaking());

        h.tx.send(Command::SetSpeaking(false)).await.unwrap();
        settle().await;
        assert!(!h.driver.is_speaking());
        assert!(!h.state_rx.borrow().speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_voice_is_rejected() {
        let h = spawn_shell(true);

        h.tx.send(Command::SetVoice("zz_nobody".into())).await.unwrap();
        h.tx.send(Command::SetVoice("af_heart".into())).await.unwrap();
        settle().await;

        // Only the known voice sticks; verified indirectly via say still
        // working (no panic, speech starts).
        h.tx.send(Command::Say("Bonjour".into())).await.unwrap();
        settle().await;
        assert!(h.driver.is_speaking());
    }
}
