//! HTTP control panel for the avatar.
//!
//! Thin translation layer: every mutation becomes a `Command` on the
//! shell's channel; reads come straight off the watch channels. Runs on
//! port 8768 (configurable) using axum.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::messages::{UtteranceLog, UtteranceRecord, PREDEFINED_MESSAGES};
use crate::pose::AnimationPose;
use crate::speech::SpeechDriver;
use crate::state::{AvatarState, Command, Emotion, Settings};

#[derive(Clone)]
pub struct ApiState {
    pub commands: mpsc::Sender<Command>,
    pub state_rx: watch::Receiver<AvatarState>,
    pub settings_rx: watch::Receiver<Settings>,
    pub pose_rx: watch::Receiver<AnimationPose>,
    pub driver: Arc<SpeechDriver>,
    pub log: Arc<UtteranceLog>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SayRequest {
    text: String,
}

#[derive(Deserialize)]
struct EmotionRequest {
    emotion: String,
}

#[derive(Deserialize)]
struct SpeakingRequest {
    speaking: bool,
}

#[derive(Deserialize)]
struct SettingsRequest {
    animation_speed: f32,
}

#[derive(Deserialize)]
struct SetVoiceRequest {
    voice: String,
}

#[derive(Serialize)]
struct StatusResponse {
    state: AvatarState,
    pose: AnimationPose,
    animation_speed: f32,
    speech_available: bool,
    speech_active: bool,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            voice: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            voice: None,
            error: Some(message.into()),
        }
    }
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/say", post(handle_say))
        .route("/emotion", post(handle_emotion))
        .route("/speaking", post(handle_speaking))
        .route("/active-toggle", post(handle_active_toggle))
        .route("/cancel", post(handle_cancel))
        .route("/settings", post(handle_settings))
        .route("/voices", get(handle_voices))
        .route("/set-voice", post(handle_set_voice))
        .route("/messages", get(handle_messages))
        .route("/history", get(handle_history))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.state_rx.borrow().clone(),
        pose: *state.pose_rx.borrow(),
        animation_speed: state.settings_rx.borrow().animation_speed,
        speech_available: state.driver.available(),
        speech_active: state.driver.is_speaking(),
    })
}

async fn handle_say(
    State(state): State<ApiState>,
    Json(req): Json<SayRequest>,
) -> Json<SimpleResponse> {
    if req.text.trim().is_empty() {
        return Json(SimpleResponse::err("empty text"));
    }

    let preview: String = req.text.chars().take(80).collect();
    info!("HTTP /say: \"{}\" ({} chars)", preview.replace('\n', " "), req.text.chars().count());

    if state.commands.send(Command::Say(req.text)).await.is_err() {
        return Json(SimpleResponse::err("avatar is shutting down"));
    }
    Json(SimpleResponse::ok("speaking"))
}

async fn handle_emotion(
    State(state): State<ApiState>,
    Json(req): Json<EmotionRequest>,
) -> Json<SimpleResponse> {
    let emotion: Emotion = match req.emotion.parse() {
        Ok(e) => e,
        Err(_) => return Json(SimpleResponse::err(format!("Unknown emotion: {}", req.emotion))),
    };
    let _ = state.commands.send(Command::SetEmotion(emotion)).await;
    Json(SimpleResponse::ok("ok"))
}

async fn handle_speaking(
    State(state): State<ApiState>,
    Json(req): Json<SpeakingRequest>,
) -> Json<SimpleResponse> {
    let _ = state.commands.send(Command::SetSpeaking(req.speaking)).await;
    Json(SimpleResponse::ok("ok"))
}

async fn handle_active_toggle(State(state): State<ApiState>) -> Json<SimpleResponse> {
    let _ = state.commands.send(Command::ToggleActive).await;
    Json(SimpleResponse::ok("toggled"))
}

async fn handle_cancel(State(state): State<ApiState>) -> Json<SimpleResponse> {
    let _ = state.commands.send(Command::SetSpeaking(false)).await;
    Json(SimpleResponse::ok("cancelled"))
}

async fn handle_settings(
    State(state): State<ApiState>,
    Json(req): Json<SettingsRequest>,
) -> Json<SimpleResponse> {
    if !req.animation_speed.is_finite() {
        return Json(SimpleResponse::err("animation_speed must be a number"));
    }
    let _ = state
        .commands
        .send(Command::SetAnimationSpeed(req.animation_speed))
        .await;
    Json(SimpleResponse::ok("ok"))
}

async fn handle_voices(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.driver.voices())
}

async fn handle_set_voice(
    State(state): State<ApiState>,
    Json(req): Json<SetVoiceRequest>,
) -> Json<SimpleResponse> {
    if !state.driver.voices().iter().any(|v| *v == req.voice) {
        return Json(SimpleResponse::err(format!("Unknown voice: {}", req.voice)));
    }
    let _ = state.commands.send(Command::SetVoice(req.voice.clone())).await;
    Json(SimpleResponse {
        voice: Some(req.voice),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_messages() -> Json<Vec<&'static str>> {
    Json(PREDEFINED_MESSAGES.to_vec())
}

async fn handle_history(State(state): State<ApiState>) -> Json<Vec<UtteranceRecord>> {
    Json(state.log.recent())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Handler-level tests; transport is axum's concern.

    fn test_state() -> (ApiState, mpsc::Receiver<Command>) {
        use crate::speech::{SpeakOutcome, SpeechBackend, SpeechRequest};
        use async_trait::async_trait;

        struct NoBackend;

        #[async_trait]
        impl SpeechBackend for NoBackend {
            fn available(&self) -> bool {
                false
            }
            fn voices(&self) -> Vec<String> {
                Vec::new()
            }
            async fn speak(&self, _request: &SpeechRequest) -> SpeakOutcome {
                SpeakOutcome::default()
            }
            fn cancel(&self) {}
        }

        let (commands, rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(AvatarState::default());
        let (_settings_tx, settings_rx) = watch::channel(Settings::default());
        let (_pose_tx, pose_rx) = watch::channel(AnimationPose::default());
        let state = ApiState {
            commands,
            state_rx,
            settings_rx,
            pose_rx,
            driver: SpeechDriver::new(Arc::new(NoBackend)),
            log: Arc::new(UtteranceLog::new()),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn say_rejects_empty_text_without_sending() {
        let (state, mut rx) = test_state();

        let resp = handle_say(
            State(state),
            Json(SayRequest {
                text: "   ".into(),
            }),
        )
        .await;
        assert_eq!(resp.0.status, "error");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn say_forwards_command() {
        let (state, mut rx) = test_state();

        let resp = handle_say(
            State(state),
            Json(SayRequest {
                text: "Bonjour".into(),
            }),
        )
        .await;
        assert_eq!(resp.0.status, "speaking");
        assert_eq!(rx.recv().await.unwrap(), Command::Say("Bonjour".into()));
    }

    #[tokio::test]
    async fn emotion_is_validated_before_sending() {
        let (state, mut rx) = test_state();

        let resp = handle_emotion(
            State(state.clone()),
            Json(EmotionRequest {
                emotion: "angry".into(),
            }),
        )
        .await;
        assert_eq!(resp.0.status, "error");
        assert!(rx.try_recv().is_err());

        handle_emotion(
            State(state),
            Json(EmotionRequest {
                emotion: "happy".into(),
            }),
        )
        .await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Command::SetEmotion(Emotion::Happy)
        );
    }

    #[tokio::test]
    async fn unknown_voice_is_rejected_locally() {
        let (state, mut rx) = test_state();

        let resp = handle_set_voice(
            State(state),
            Json(SetVoiceRequest {
                voice: "ff_siwis".into(),
            }),
        )
        .await;
        // NoBackend has no voices at all.
        assert_eq!(resp.0.status, "error");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_returns_the_predefined_set() {
        let resp = handle_messages().await;
        assert_eq!(resp.0.len(), 6);
        assert!(resp.0[0].contains("Carla"));
    }
}
