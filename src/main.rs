//! carla-rs: animated talking avatar service.

mod animator;
mod api;
mod config;
mod mcp_server;
mod messages;
mod pose;
mod shell;
mod speech;
mod state;
mod timers;
mod view;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::pose::AnimationPose;
use crate::speech::{KokoroEngine, SpeechBackend, SpeechDriver};
use crate::state::{AvatarState, Settings};

#[derive(Parser, Debug)]
#[command(name = "carla-rs", about = "Animated talking avatar service")]
struct Args {
    /// Path to carla.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without the TTS backend (animation only)
    #[arg(long)]
    no_speech: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort/rmcp internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info,rmcp=info")
    } else {
        EnvFilter::new("info,ort=warn,rmcp=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("carla-rs starting");

    let config = config::Config::load(args.config.as_deref());
    info!(
        "Config loaded: avatar '{}', locale {}",
        config.avatar.name, config.avatar.locale
    );

    // Load the TTS backend; a failed load means a silent avatar, not a
    // dead one.
    let backend: Arc<dyn SpeechBackend> = if config.speech.enabled && !args.no_speech {
        info!("Loading Kokoro TTS model...");
        let mut engine = KokoroEngine::new(&config.speech);
        if let Err(e) = engine.load() {
            tracing::warn!("Failed to load TTS model: {e}");
            info!("Speech disabled - avatar continues silent");
        }
        Arc::new(engine)
    } else {
        info!("Speech disabled by configuration");
        Arc::new(KokoroEngine::new(&config.speech))
    };

    let driver = SpeechDriver::new(backend);
    let log = Arc::new(messages::UtteranceLog::new());

    // Channels between the components.
    let (command_tx, command_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(AvatarState {
        active: config.avatar.start_active,
        ..AvatarState::default()
    });
    let (settings_tx, settings_rx) = watch::channel(Settings::default());
    let (pose_tx, pose_rx) = watch::channel(AnimationPose::default());

    // Animator
    let animator = animator::Animator::new(
        config.timing.clone(),
        state_rx.clone(),
        settings_rx.clone(),
        driver.subscribe(),
        pose_tx,
        command_tx.clone(),
    );
    tokio::spawn(animator.run());

    // Terminal view
    tokio::spawn(view::run(
        config.avatar.name.clone(),
        pose_rx.clone(),
        state_rx.clone(),
    ));

    // Control API
    let api_state = api::ApiState {
        commands: command_tx.clone(),
        state_rx: state_rx.clone(),
        settings_rx: settings_rx.clone(),
        pose_rx,
        driver: driver.clone(),
        log: log.clone(),
    };
    api::start(api_state, config.api.port).await;

    // MCP server (background task)
    if config.mcp.enabled {
        mcp_server::start(config.mcp.port, config.api.port).await;
    }

    // The shell runs on the main task until the command channel closes.
    let shell = shell::Shell::new(
        config.avatar.clone(),
        config.timing.clone(),
        command_rx,
        command_tx,
        state_tx,
        settings_tx,
        driver,
        log,
    );
    shell.run().await;

    Ok(())
}
