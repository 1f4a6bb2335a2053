//! Kokoro TTS backend: text → phonemes → ONNX inference → audio playback.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Audio → rodio Sink playback with cancellation
//!
//! If any asset fails to load the engine stays unloaded and reports
//! `available() == false`; the avatar then animates on the synthetic mouth
//! cadence with no audio.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;

use super::synth::{SpeakOutcome, SpeechBackend, SpeechRequest};

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

/// Native Kokoro TTS engine.
pub struct KokoroEngine {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<Option<ort::session::Session>>,

    // Phonemizer (misaki-rs G2P). English-only; other languages are
    // approximated through the English grapheme rules.
    phonemizer: Option<misaki_rs::G2P>,

    // Tokenizer vocabulary: char → token ID
    vocab: HashMap<char, i64>,

    // Voice style vectors indexed by token count, per voice. shape: (510, 256)
    voices: HashMap<String, Array2<f32>>,

    // Base parameters from config; per-request rate/pitch/volume multiply these
    default_voice: String,
    base_speed: f32,
    base_pitch: f32,
    base_volume: f32,

    // Audio output (kept alive for process lifetime)
    output_stream: Option<OutputStream>,

    // State
    cancel_flag: Arc<AtomicBool>,
    speak_lock: AsyncMutex<()>,
    active_sink: Arc<Mutex<Option<Sink>>>,

    // Paths
    model_path: PathBuf,
    voices_path: PathBuf,
    tokenizer_path: PathBuf,
}

impl KokoroEngine {
    pub fn new(config: &SpeechConfig) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_default();

        let model_path = if config.model_path.is_empty() {
            base_dir.join("kokoro-v1.0.onnx")
        } else {
            PathBuf::from(&config.model_path)
        };

        let voices_path = base_dir.join("voices-v1.0.bin");
        let tokenizer_path = base_dir.join("tokenizer.json");

        Self {
            session: Mutex::new(None),
            phonemizer: None,
            vocab: HashMap::new(),
            voices: HashMap::new(),
            default_voice: config.voice.clone(),
            base_speed: config.speed,
            base_pitch: config.pitch,
            base_volume: config.volume,
            output_stream: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            speak_lock: AsyncMutex::new(()),
            active_sink: Arc::new(Mutex::new(None)),
            model_path,
            voices_path,
            tokenizer_path,
        }
    }

    /// Load the ONNX model, tokenizer, voices, and phonemizer.
    /// Blocking; called once at startup.
    pub fn load(&mut self) -> Result<(), String> {
        let t0 = Instant::now();

        info!("Loading tokenizer from {}", self.tokenizer_path.display());
        self.vocab = load_vocab(&self.tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", self.vocab.len());

        info!("Loading voices from {}", self.voices_path.display());
        self.voices = load_voice_styles(&self.voices_path)?;
        info!("Loaded {} voices", self.voices.len());

        info!("Loading ONNX model from {}", self.model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create ONNX session builder: {e}"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| format!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| format!("Failed to set thread count: {e}"))?
            .commit_from_file(&self.model_path)
            .map_err(|e| format!("Failed to load ONNX model: {e}"))?;
        *self.session.lock().unwrap() = Some(session);

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);
        self.phonemizer = Some(phonemizer);

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"))?;
        self.output_stream = Some(stream);

        let load_ms = t0.elapsed().as_millis();
        info!("Kokoro TTS loaded in {load_ms}ms");

        Ok(())
    }

    async fn speak_inner(&self, request: &SpeechRequest) -> SpeakOutcome {
        let sentences = split_sentences(request.text.trim());
        if sentences.is_empty() {
            return SpeakOutcome::default();
        }

        let voice = request
            .voice
            .as_deref()
            .filter(|v| self.voices.contains_key(*v))
            .unwrap_or(&self.default_voice)
            .to_string();

        let mut outcome = SpeakOutcome::default();

        for (i, sentence) in sentences.iter().enumerate() {
            if self.cancel_flag.load(Ordering::Relaxed) {
                outcome.cancelled = true;
                info!("Cancelled before sentence {}/{}", i + 1, sentences.len());
                break;
            }

            let t_gen = Instant::now();
            let samples = match self.generate_audio(sentence, &voice, request.rate) {
                Ok(s) => s,
                Err(e) => {
                    warn!("TTS generation failed for sentence {}: {e}", i + 1);
                    continue;
                }
            };
            let gen_ms = t_gen.elapsed().as_secs_f64() * 1000.0;
            outcome.generate_ms += gen_ms;

            if self.cancel_flag.load(Ordering::Relaxed) {
                outcome.cancelled = true;
                info!("Cancelled after generating sentence {}/{}", i + 1, sentences.len());
                break;
            }

            if samples.is_empty() {
                continue;
            }

            let t_play = Instant::now();
            let was_cancelled = self
                .play_audio(samples, request.volume * self.base_volume, request.pitch * self.base_pitch)
                .await;
            let play_ms = t_play.elapsed().as_secs_f64() * 1000.0;
            outcome.playback_ms += play_ms;

            if was_cancelled {
                outcome.cancelled = true;
                info!("Cancelled during playback of sentence {}/{}", i + 1, sentences.len());
                break;
            }

            debug!(
                "Sentence {}/{}: gen={gen_ms:.0}ms play={:.1}s",
                i + 1,
                sentences.len(),
                play_ms / 1000.0
            );
        }

        outcome
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str, voice: &str, rate: f32) -> Result<Vec<f32>, String> {
        let mut session_guard = self.session.lock().unwrap();
        let session = session_guard.as_mut().ok_or("Model not loaded")?;
        let phonemizer = self.phonemizer.as_ref().ok_or("Phonemizer not loaded")?;

        let (phonemes, _tokens) = phonemizer
            .g2p(text)
            .map_err(|e| format!("Phonemization failed: {e}"))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // Phonemes → token IDs, padded on both ends
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        for ch in phonemes.chars() {
            if let Some(&id) = self.vocab.get(&ch) {
                token_ids.push(id);
            }
            // Skip unknown characters silently
        }
        token_ids.push(0);

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        let styles = self
            .voices
            .get(voice)
            .ok_or_else(|| format!("Voice not found: {voice}"))?;

        // Index into style array by token count (clamped to max)
        let style_idx = (n_tokens.saturating_sub(2)).min(styles.nrows() - 1);
        let style_vec: Vec<f32> = styles.row(style_idx).to_vec();

        // Build ONNX input tensors (ort 2.0: must convert to Tensor values)
        let tokens_array = ndarray::Array2::from_shape_vec((1, n_tokens), token_ids.clone())
            .map_err(|e| format!("Failed to create tokens tensor: {e}"))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| format!("Failed to create tokens ort tensor: {e}"))?;

        let style_array = ndarray::Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| format!("Failed to create style tensor: {e}"))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| format!("Failed to create style ort tensor: {e}"))?;

        let speed = (self.base_speed * rate).clamp(0.25, 4.0);
        let speed_array = ndarray::Array1::from_vec(vec![speed]);
        let speed_tensor = Tensor::from_array(speed_array)
            .map_err(|e| format!("Failed to create speed ort tensor: {e}"))?;

        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| format!("ONNX inference failed: {e}"))?;

        // ort 2.0: try_extract_tensor returns (&Shape, &[T]) tuple
        let first_output = outputs
            .iter()
            .next()
            .ok_or("No output tensor from model")?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract audio tensor: {e}"))?;

        let samples: Vec<f32> = audio_slice.iter().copied().collect();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        Ok(samples)
    }

    /// Play audio samples through rodio. Returns true if cancelled during playback.
    async fn play_audio(&self, samples: Vec<f32>, volume: f32, pitch: f32) -> bool {
        let stream = match &self.output_stream {
            Some(s) => s,
            None => {
                warn!("No audio output stream");
                return false;
            }
        };

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        sink.set_volume(volume.clamp(0.0, 1.0));
        // The model has no pitch input; approximate by resampling playback.
        if (pitch - 1.0).abs() > f32::EPSILON {
            sink.set_speed(pitch.clamp(0.5, 2.0));
        }
        let source = SamplesBuffer::new(1, SAMPLE_RATE, samples);
        sink.append(source);

        *self.active_sink.lock().unwrap() = Some(sink);

        // Poll for completion or cancellation
        let cancel_flag = self.cancel_flag.clone();
        let active_sink = self.active_sink.clone();

        let was_cancelled = tokio::task::spawn_blocking(move || {
            loop {
                let is_empty = {
                    let guard = active_sink.lock().unwrap();
                    match guard.as_ref() {
                        Some(s) => s.empty(),
                        None => true,
                    }
                };

                if is_empty {
                    return false;
                }

                if cancel_flag.load(Ordering::Relaxed) {
                    if let Some(sink) = active_sink.lock().unwrap().take() {
                        sink.stop();
                    }
                    return true;
                }

                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        })
        .await
        .unwrap_or(false);

        *self.active_sink.lock().unwrap() = None;

        was_cancelled
    }
}

#[async_trait]
impl SpeechBackend for KokoroEngine {
    fn available(&self) -> bool {
        self.session.lock().unwrap().is_some() && self.output_stream.is_some()
    }

    fn voices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.voices.keys().cloned().collect();
        names.sort();
        names
    }

    async fn speak(&self, request: &SpeechRequest) -> SpeakOutcome {
        let _guard = self.speak_lock.lock().await;
        self.cancel_flag.store(false, Ordering::Relaxed);
        self.speak_inner(request).await
    }

    fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(sink) = self.active_sink.lock().unwrap().take() {
            sink.stop();
        }
        debug!("Kokoro playback cancelled");
    }
}

// --- Helper functions ---

/// Load tokenizer vocabulary from tokenizer.json.
fn load_vocab(path: &Path) -> Result<HashMap<char, i64>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read tokenizer: {e}"))?;

    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse tokenizer JSON: {e}"))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or("Missing model.vocab in tokenizer.json")?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id.as_i64().ok_or("Token ID is not an integer")?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load all voice style arrays from an NPZ file, squeezed to (510, 256).
fn load_voice_styles(path: &Path) -> Result<HashMap<String, Array2<f32>>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to open voices file: {e}"))?;

    let mut npz =
        NpzReader::new(file).map_err(|e| format!("Failed to read NPZ voices file: {e}"))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| format!("Failed to list NPZ entries: {e}"))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in &names {
        let npy_name = format!("{name}.npy");
        let arr: Array3<f32> = npz
            .by_name(&npy_name)
            .map_err(|e| format!("Failed to read voice '{name}': {e}"))?;

        // Shape is (510, 1, 256). Squeeze the middle dimension.
        let dim0 = arr.shape()[0];
        let dim2 = arr.shape()[2];
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| format!("Failed to reshape voice '{name}': {e}"))?;

        voices.insert(name.clone(), styles);
    }

    Ok(voices)
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_boundaries() {
        let parts = split_sentences("Bonjour ! Je suis Carla. Comment allez-vous ?");
        assert_eq!(parts, vec!["Bonjour !", "Je suis Carla.", "Comment allez-vous ?"]);
    }

    #[test]
    fn single_sentence_passes_through() {
        assert_eq!(split_sentences("Bonjour"), vec!["Bonjour"]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn unloaded_engine_is_unavailable() {
        let engine = KokoroEngine::new(&SpeechConfig::default());
        assert!(!engine.available());
        assert!(engine.voices().is_empty());
    }
}
