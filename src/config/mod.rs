//! Command-line parsing, validation and reloadable configuration sources.

mod defaults;
mod source;
mod validation;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::SAMPLE_WIDTH;
pub use defaults::*;
pub use source::{config_hash, ConfigSource, JsonFileConfig, StaticConfig};

/// Listener options. Every field that affects the audio pipeline is also
/// serializable so a JSON override file can be hot-reloaded.
#[derive(Debug, Clone, PartialEq, Parser, Serialize, Deserialize)]
#[command(
    name = "voxlisten",
    about = "VoxListen always-on wake word listener",
    author,
    version
)]
#[serde(default)]
pub struct ListenerConfig {
    /// Capture sample rate (Hz)
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Samples per audio chunk delivered by the microphone
    #[arg(long = "frames-per-buffer", default_value_t = DEFAULT_FRAMES_PER_BUFFER)]
    pub frames_per_buffer: usize,

    /// Preferred audio input device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Audio input device index (see --list-input-devices)
    #[arg(long = "device-index")]
    pub device_index: Option<usize>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    #[serde(skip)]
    pub list_input_devices: bool,

    /// Wake phrase the listener waits for
    #[arg(long = "wake-word", default_value = DEFAULT_WAKE_WORD)]
    pub wake_word: String,

    /// Wake word engine module
    #[arg(long = "wake-word-module", default_value = DEFAULT_WAKE_WORD_MODULE)]
    pub wake_word_module: String,

    /// Average phoneme duration used to size the wake word window (milliseconds)
    #[arg(long = "phoneme-duration-ms", default_value_t = DEFAULT_PHONEME_DURATION_MS)]
    pub phoneme_duration_ms: u64,

    /// Phrase that wakes the listener from sleep mode
    #[arg(long = "stand-up-word")]
    pub stand_up_word: Option<String>,

    /// Seconds of contiguous speech before a phrase starts
    #[arg(long = "speech-seconds", default_value_t = DEFAULT_SPEECH_SECONDS)]
    pub speech_seconds: f64,

    /// Seconds of trailing silence that end a phrase
    #[arg(long = "silence-seconds", default_value_t = DEFAULT_SILENCE_SECONDS)]
    pub silence_seconds: f64,

    /// Minimum phrase length (seconds)
    #[arg(long = "min-seconds", default_value_t = DEFAULT_MIN_SECONDS)]
    pub min_seconds: f64,

    /// Audio kept from before the phrase started (seconds)
    #[arg(long = "before-seconds", default_value_t = DEFAULT_BEFORE_SECONDS)]
    pub before_seconds: f64,

    /// Audio discarded at the start of each recording (seconds)
    #[arg(long = "skip-seconds", default_value_t = DEFAULT_SKIP_SECONDS)]
    pub skip_seconds: f64,

    /// Recording ceiling in seconds (0 disables the timeout)
    #[arg(long = "max-seconds", default_value_t = DEFAULT_MAX_SECONDS)]
    pub max_seconds: f64,

    /// VAD frame size (milliseconds)
    #[arg(long = "vad-frame-ms", default_value_t = DEFAULT_VAD_FRAME_MS)]
    pub vad_frame_ms: u64,

    /// Voice activity detector implementation to use
    #[arg(long = "vad-engine", value_enum, default_value_t = default_vad_engine())]
    pub vad_engine: VadEngineKind,

    /// Voice activity detection threshold (decibels)
    #[arg(long = "vad-threshold-db", default_value_t = DEFAULT_VAD_THRESHOLD_DB, allow_hyphen_values = true)]
    pub vad_threshold_db: f32,

    /// Debiased energy above which a frame always counts as speech
    #[arg(long = "vad-energy-threshold")]
    pub vad_energy_threshold: Option<f64>,

    /// Max/current energy ratio above which a frame counts as silence
    #[arg(long = "vad-max-ratio")]
    pub vad_max_ratio: Option<f64>,

    /// Fixed maximum energy for the ratio check (dynamic when unset)
    #[arg(long = "vad-max-energy")]
    pub vad_max_energy: Option<f64>,

    /// Initial wake word energy threshold
    #[arg(long = "energy-threshold", default_value_t = DEFAULT_ENERGY_THRESHOLD)]
    pub energy_threshold: f64,

    /// Multiplier applied to the threshold before adaptation
    #[arg(long = "multiplier", default_value_t = DEFAULT_MULTIPLIER)]
    pub multiplier: f64,

    /// Target ratio between ambient energy and the threshold
    #[arg(long = "energy-ratio", default_value_t = DEFAULT_ENERGY_RATIO)]
    pub energy_ratio: f64,

    /// Damping per second for the dynamic energy threshold
    #[arg(long = "energy-damping", default_value_t = DEFAULT_ENERGY_DAMPING)]
    pub energy_damping: f64,

    /// Mute the microphone while audio output is playing
    #[arg(long = "mute-during-output", default_value_t = false)]
    pub mute_during_output: bool,

    /// Attempts to open the microphone before giving up
    #[arg(long = "mic-open-attempts", default_value_t = DEFAULT_MIC_OPEN_ATTEMPTS)]
    pub mic_open_attempts: u32,

    /// Delay between microphone open attempts (milliseconds)
    #[arg(long = "mic-open-backoff-ms", default_value_t = DEFAULT_MIC_OPEN_BACKOFF_MS)]
    pub mic_open_backoff_ms: u64,

    /// Consecutive device faults tolerated before the listener stops
    #[arg(long = "max-mic-restarts", default_value_t = DEFAULT_MAX_MIC_RESTARTS)]
    pub max_mic_restarts: u32,

    /// Report the device as stalled after this long without audio (milliseconds)
    #[arg(long = "device-stall-ms", default_value_t = DEFAULT_DEVICE_STALL_MS)]
    pub device_stall_ms: u64,

    /// Speech-to-text module
    #[arg(long = "stt", default_value = DEFAULT_STT_MODULE)]
    pub stt_module: String,

    /// Whisper model path (required when --stt whisper)
    #[arg(long = "whisper-model-path")]
    pub whisper_model_path: Option<String>,

    /// Whisper beam size (>1 enables beam search)
    #[arg(long = "whisper-beam-size", default_value_t = 0)]
    pub whisper_beam_size: u32,

    /// Whisper sampling temperature
    #[arg(long = "whisper-temperature", default_value_t = 0.0)]
    pub whisper_temperature: f32,

    /// Language reported with transcripts and passed to the STT engine
    #[arg(long = "lang", default_value = DEFAULT_LANG)]
    pub lang: String,

    /// File that receives periodic energy/threshold snapshots
    #[arg(long = "mic-level-file")]
    pub mic_level_file: Option<PathBuf>,

    /// JSON file of overrides, polled for changes while running
    #[arg(long = "config")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXLISTEN_LOGS", default_value_t = false)]
    #[serde(skip)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXLISTEN_NO_LOGS", default_value_t = false)]
    #[serde(skip)]
    pub no_logs: bool,

    /// Enable verbose timing logs
    #[arg(long = "log-timings", default_value_t = false)]
    #[serde(skip)]
    pub log_timings: bool,
}

/// Available runtime-selectable VAD implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadEngineKind {
    Earshot,
    Simple,
}

impl VadEngineKind {
    pub fn label(self) -> &'static str {
        match self {
            VadEngineKind::Earshot => "earshot",
            VadEngineKind::Simple => "simple",
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            input_device: None,
            device_index: None,
            list_input_devices: false,
            wake_word: DEFAULT_WAKE_WORD.to_string(),
            wake_word_module: DEFAULT_WAKE_WORD_MODULE.to_string(),
            phoneme_duration_ms: DEFAULT_PHONEME_DURATION_MS,
            stand_up_word: None,
            speech_seconds: DEFAULT_SPEECH_SECONDS,
            silence_seconds: DEFAULT_SILENCE_SECONDS,
            min_seconds: DEFAULT_MIN_SECONDS,
            before_seconds: DEFAULT_BEFORE_SECONDS,
            skip_seconds: DEFAULT_SKIP_SECONDS,
            max_seconds: DEFAULT_MAX_SECONDS,
            vad_frame_ms: DEFAULT_VAD_FRAME_MS,
            vad_engine: default_vad_engine(),
            vad_threshold_db: DEFAULT_VAD_THRESHOLD_DB,
            vad_energy_threshold: None,
            vad_max_ratio: None,
            vad_max_energy: None,
            energy_threshold: DEFAULT_ENERGY_THRESHOLD,
            multiplier: DEFAULT_MULTIPLIER,
            energy_ratio: DEFAULT_ENERGY_RATIO,
            energy_damping: DEFAULT_ENERGY_DAMPING,
            mute_during_output: false,
            mic_open_attempts: DEFAULT_MIC_OPEN_ATTEMPTS,
            mic_open_backoff_ms: DEFAULT_MIC_OPEN_BACKOFF_MS,
            max_mic_restarts: DEFAULT_MAX_MIC_RESTARTS,
            device_stall_ms: DEFAULT_DEVICE_STALL_MS,
            stt_module: DEFAULT_STT_MODULE.to_string(),
            whisper_model_path: None,
            whisper_beam_size: 0,
            whisper_temperature: 0.0,
            lang: DEFAULT_LANG.to_string(),
            mic_level_file: None,
            config_file: None,
            logs: false,
            no_logs: false,
            log_timings: false,
        }
    }
}

impl ListenerConfig {
    /// Bytes in one microphone chunk.
    pub fn chunk_bytes(&self) -> usize {
        self.frames_per_buffer * SAMPLE_WIDTH
    }

    pub fn seconds_per_buffer(&self) -> f64 {
        self.frames_per_buffer as f64 / f64::from(self.sample_rate)
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.seconds_per_buffer())
    }

    /// Recording ceiling, `None` when disabled.
    pub fn max_recording_seconds(&self) -> Option<f64> {
        (self.max_seconds > 0.0).then_some(self.max_seconds)
    }

    pub fn phoneme_duration(&self) -> Duration {
        Duration::from_millis(self.phoneme_duration_ms)
    }

    pub fn device_stall(&self) -> Duration {
        Duration::from_millis(self.device_stall_ms)
    }

    pub fn mic_open_backoff(&self) -> Duration {
        Duration::from_millis(self.mic_open_backoff_ms)
    }
}
