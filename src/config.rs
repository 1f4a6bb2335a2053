//! Configuration management for carla-rs.
//!
//! Loads config from YAML files in standard locations. Every timing knob
//! has a built-in default, so a missing config file still yields a fully
//! animated avatar.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub name: String,
    pub start_active: bool,
    /// BCP 47 style locale used to pick a speech voice by prefix.
    pub locale: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            name: "Carla".into(),
            start_active: true,
            locale: "fr-FR".into(),
        }
    }
}

/// All animation timings, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Inclusive lower bound of the random inter-blink delay.
    pub blink_min: u64,
    /// Exclusive upper bound of the random inter-blink delay.
    pub blink_max: u64,
    /// How long the eyelids stay closed.
    pub blink_duration: u64,
    /// Mouth toggle cadence while speaking (fallback, no real speech).
    pub mouth_interval: u64,
    /// Mouth toggle cadence once real synthesized speech has started.
    pub mouth_interval_speech: u64,
    /// How long the animator holds a non-neutral emotion.
    pub emotion_hold: u64,
    /// Shell-side debounce between animation-complete and the reset.
    pub emotion_debounce: u64,
    /// Auto-stop delay contribution per message character.
    pub autostop_per_char: u64,
    /// Auto-stop delay floor.
    pub autostop_base: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            blink_min: 3000,
            blink_max: 5000,
            blink_duration: 150,
            mouth_interval: 200,
            mouth_interval_speech: 150,
            emotion_hold: 2000,
            emotion_debounce: 500,
            autostop_per_char: 100,
            autostop_base: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Default voice when no locale match is found.
    pub voice: String,
    pub speed: f32,
    pub pitch: f32,
    pub volume: f32,
    pub model_path: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: "ff_siwis".into(),
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            model_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8768 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8769,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub avatar: AvatarConfig,
    pub timing: TimingConfig,
    pub speech: SpeechConfig,
    pub api: ApiConfig,
    pub mcp: McpConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./carla.yaml
    /// 2. ~/.config/carla/config.yaml
    /// 3. /etc/carla/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("carla.yaml")),
                dirs::home_dir().map(|h| h.join(".config/carla/config.yaml")),
                Some(PathBuf::from("/etc/carla/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}
