//! Timer-driven animator.
//!
//! Owns the blink, mouth, and emotion-hold timers and publishes the
//! resolved `AnimationPose` on a watch channel. Canonical state flows in
//! (watch), utterance lifecycle flows in (broadcast), and the single
//! `Command::AnimationComplete` flows back to the shell when an emotion
//! has been held long enough.

use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, trace};

use crate::config::TimingConfig;
use crate::pose::{self, AnimationPose, HandGesture, MouthState, TimerPhases};
use crate::speech::SpeechEvent;
use crate::state::{AvatarState, Command, Emotion, Settings};

enum BlinkPhase {
    /// Eyes open, waiting for the next random blink.
    Waiting,
    /// Eyes closed for the blink duration.
    Closing,
}

pub struct Animator {
    timing: TimingConfig,
    state_rx: watch::Receiver<AvatarState>,
    settings_rx: watch::Receiver<Settings>,
    speech_rx: broadcast::Receiver<SpeechEvent>,
    pose_tx: watch::Sender<AnimationPose>,
    shell_tx: mpsc::Sender<Command>,

    phases: TimerPhases,
    blink_phase: BlinkPhase,
    // True once a Started event arrived for the current speech period;
    // switches the mouth to the faster cadence.
    real_speech: bool,
}

impl Animator {
    pub fn new(
        timing: TimingConfig,
        state_rx: watch::Receiver<AvatarState>,
        settings_rx: watch::Receiver<Settings>,
        speech_rx: broadcast::Receiver<SpeechEvent>,
        pose_tx: watch::Sender<AnimationPose>,
        shell_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            timing,
            state_rx,
            settings_rx,
            speech_rx,
            pose_tx,
            shell_tx,
            phases: TimerPhases::default(),
            blink_phase: BlinkPhase::Waiting,
            real_speech: false,
        }
    }

    /// Delay divided by the animation-speed slider.
    fn scaled(&self, ms: u64) -> Duration {
        let speed = self.settings_rx.borrow().animation_speed.max(0.01);
        Duration::from_millis(ms).div_f32(speed)
    }

    fn random_blink_delay(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.timing.blink_min..self.timing.blink_max);
        self.scaled(ms)
    }

    fn mouth_cadence(&self) -> Duration {
        let ms = if self.real_speech {
            self.timing.mouth_interval_speech
        } else {
            self.timing.mouth_interval
        };
        self.scaled(ms)
    }

    fn new_mouth_interval(&self) -> Interval {
        let cadence = self.mouth_cadence();
        // First toggle after one full period, like the source animation.
        let mut ticker = interval_at(Instant::now() + cadence, cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn publish(&self) {
        let pose = pose::resolve(&self.state_rx.borrow(), self.phases);
        let _ = self.pose_tx.send(pose);
    }

    pub async fn run(mut self) {
        let mut blink: Pin<Box<Sleep>> = Box::pin(sleep(self.random_blink_delay()));
        let mut mouth: Option<Interval> = None;
        let mut emotion: Option<Pin<Box<Sleep>>> = None;
        let mut speech_open = true;

        let (mut prev_emotion, mut prev_speaking) = {
            let state = self.state_rx.borrow();
            (state.emotion, state.speaking)
        };

        // Timers for the initial state.
        if prev_speaking {
            mouth = Some(self.new_mouth_interval());
        }
        if prev_emotion != Emotion::Neutral && !prev_speaking {
            emotion = Some(Box::pin(sleep(self.scaled(self.timing.emotion_hold))));
        }
        self.publish();

        loop {
            tokio::select! {
                () = &mut blink => {
                    match self.blink_phase {
                        BlinkPhase::Waiting => {
                            self.phases.blinking = true;
                            self.blink_phase = BlinkPhase::Closing;
                            let d = self.scaled(self.timing.blink_duration);
                            blink.as_mut().reset(Instant::now() + d);
                        }
                        BlinkPhase::Closing => {
                            self.phases.blinking = false;
                            self.blink_phase = BlinkPhase::Waiting;
                            let d = self.random_blink_delay();
                            blink.as_mut().reset(Instant::now() + d);
                        }
                    }
                    self.publish();
                }

                _ = async { mouth.as_mut().unwrap().tick().await }, if mouth.is_some() => {
                    self.phases.mouth = self.phases.mouth.toggled();
                    self.publish();
                }

                () = async { emotion.as_mut().unwrap().as_mut().await }, if emotion.is_some() => {
                    emotion = None;
                    trace!("Emotion hold elapsed");
                    if self.shell_tx.send(Command::AnimationComplete).await.is_err() {
                        break;
                    }
                }

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let (speaking, emotion_now) = {
                        let state = self.state_rx.borrow();
                        (state.speaking, state.emotion)
                    };

                    if speaking != prev_speaking {
                        if speaking {
                            self.real_speech = false;
                            mouth = Some(self.new_mouth_interval());
                        } else {
                            mouth = None;
                            self.phases.mouth = MouthState::Closed;
                            self.phases.hand = HandGesture::Idle;
                            self.real_speech = false;
                        }
                    }

                    // Cancel-before-create on any emotion or speaking change.
                    if emotion_now != prev_emotion || speaking != prev_speaking {
                        if emotion_now != Emotion::Neutral && !speaking {
                            emotion =
                                Some(Box::pin(sleep(self.scaled(self.timing.emotion_hold))));
                        } else {
                            emotion = None;
                        }
                    }

                    prev_speaking = speaking;
                    prev_emotion = emotion_now;
                    self.publish();
                }

                changed = self.settings_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!(
                        "Animation speed now {:.2}",
                        self.settings_rx.borrow().animation_speed
                    );
                    if mouth.is_some() {
                        mouth = Some(self.new_mouth_interval());
                    }
                }

                event = self.speech_rx.recv(), if speech_open => {
                    match event {
                        Ok(SpeechEvent::Started { .. }) => {
                            self.real_speech = true;
                            self.phases.hand = HandGesture::Talking;
                            if mouth.is_some() {
                                mouth = Some(self.new_mouth_interval());
                            }
                            self.publish();
                        }
                        Ok(SpeechEvent::Ended { .. }) => {
                            self.real_speech = false;
                            self.phases.hand = HandGesture::Idle;
                            self.phases.mouth = MouthState::Closed;
                            if mouth.is_some() {
                                mouth = Some(self.new_mouth_interval());
                            }
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Speech event stream lagged by {n}");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            speech_open = false;
                        }
                    }
                }
            }
        }
        debug!("Animator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        state_tx: watch::Sender<AvatarState>,
        settings_tx: watch::Sender<Settings>,
        speech_tx: broadcast::Sender<SpeechEvent>,
        pose_rx: watch::Receiver<AnimationPose>,
        shell_rx: mpsc::Receiver<Command>,
    }

    fn spawn_animator() -> Harness {
        let (state_tx, state_rx) = watch::channel(AvatarState::default());
        let (settings_tx, settings_rx) = watch::channel(Settings::default());
        let (speech_tx, speech_rx) = broadcast::channel(16);
        let (pose_tx, pose_rx) = watch::channel(AnimationPose::default());
        let (shell_tx, shell_rx) = mpsc::channel(16);

        let animator = Animator::new(
            TimingConfig::default(),
            state_rx,
            settings_rx,
            speech_rx,
            pose_tx,
            shell_tx,
        );
        tokio::spawn(animator.run());

        Harness {
            state_tx,
            settings_tx,
            speech_tx,
            pose_rx,
            shell_rx,
        }
    }

    async fn next_pose(rx: &mut watch::Receiver<AnimationPose>) -> AnimationPose {
        rx.changed().await.unwrap();
        *rx.borrow_and_update()
    }

    #[tokio::test(start_paused = true)]
    async fn blink_fires_in_window_and_clears() {
        let mut h = spawn_animator();
        let start = Instant::now();

        // First change after startup publish is the blink opening.
        loop {
            let pose = next_pose(&mut h.pose_rx).await;
            if pose.blinking {
                break;
            }
        }
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(3000), "blinked at {waited:?}");
        assert!(waited < Duration::from_millis(5001), "blinked at {waited:?}");

        let blink_open = Instant::now();
        loop {
            let pose = next_pose(&mut h.pose_rx).await;
            if !pose.blinking {
                break;
            }
        }
        assert_eq!(blink_open.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn mouth_toggles_while_speaking_and_closes_after() {
        let mut h = spawn_animator();

        h.state_tx.send_modify(|s| s.speaking = true);
        let start = Instant::now();
        loop {
            let pose = next_pose(&mut h.pose_rx).await;
            if pose.mouth == MouthState::Open {
                break;
            }
        }
        // Fallback cadence: no Started event was observed.
        assert_eq!(start.elapsed(), Duration::from_millis(200));

        h.state_tx.send_modify(|s| s.speaking = false);
        loop {
            let pose = next_pose(&mut h.pose_rx).await;
            if !pose.blinking {
                assert_eq!(pose.mouth, MouthState::Closed);
                break;
            }
        }

        // No further mouth movement once speaking stopped.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.pose_rx.borrow().mouth, MouthState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn started_event_speeds_cadence_and_raises_hand() {
        let mut h = spawn_animator();

        h.state_tx.send_modify(|s| s.speaking = true);
        h.pose_rx.changed().await.unwrap();

        h.speech_tx.send(SpeechEvent::Started { id: 1 }).unwrap();
        let pose = next_pose(&mut h.pose_rx).await;
        assert_eq!(pose.hand, HandGesture::Talking);

        let start = Instant::now();
        loop {
            let pose = next_pose(&mut h.pose_rx).await;
            if pose.mouth == MouthState::Open {
                break;
            }
        }
        assert_eq!(start.elapsed(), Duration::from_millis(150));

        h.speech_tx.send(SpeechEvent::Ended { id: 1 }).unwrap();
        let pose = next_pose(&mut h.pose_rx).await;
        assert_eq!(pose.hand, HandGesture::Idle);
        assert_eq!(pose.mouth, MouthState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn emotion_hold_sends_animation_complete_once() {
        let mut h = spawn_animator();

        h.state_tx.send_modify(|s| s.emotion = Emotion::Happy);
        let start = Instant::now();
        let cmd = h.shell_rx.recv().await.unwrap();
        assert_eq!(cmd, Command::AnimationComplete);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));

        // One-shot: nothing else arrives.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert!(h.shell_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn emotion_change_rearms_hold_timer() {
        let mut h = spawn_animator();

        h.state_tx.send_modify(|s| s.emotion = Emotion::Happy);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        h.state_tx.send_modify(|s| s.emotion = Emotion::Sad);
        let start = Instant::now();

        let cmd = h.shell_rx.recv().await.unwrap();
        assert_eq!(cmd, Command::AnimationComplete);
        // Full hold measured from the re-arm, not the first emotion.
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_suspends_emotion_hold() {
        let mut h = spawn_animator();

        h.state_tx.send_modify(|s| s.emotion = Emotion::Thinking);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        h.state_tx.send_modify(|s| s.speaking = true);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(
            h.shell_rx.try_recv().is_err(),
            "hold must not fire while speaking"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn animation_speed_divides_mouth_cadence() {
        let mut h = spawn_animator();

        h.settings_tx
            .send(Settings {
                animation_speed: 2.0,
            })
            .unwrap();
        h.state_tx.send_modify(|s| s.speaking = true);

        let start = Instant::now();
        loop {
            let pose = next_pose(&mut h.pose_rx).await;
            if pose.mouth == MouthState::Open {
                break;
            }
        }
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
