use super::VadEngineKind;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_FRAMES_PER_BUFFER: usize = 480;

pub const DEFAULT_WAKE_WORD: &str = "hey mycroft";
pub const DEFAULT_WAKE_WORD_MODULE: &str = "energy";
pub const DEFAULT_PHONEME_DURATION_MS: u64 = 120;

pub const DEFAULT_SPEECH_SECONDS: f64 = 0.1;
pub const DEFAULT_SILENCE_SECONDS: f64 = 0.5;
pub const DEFAULT_MIN_SECONDS: f64 = 1.0;
pub const DEFAULT_BEFORE_SECONDS: f64 = 0.5;
pub const DEFAULT_SKIP_SECONDS: f64 = 0.0;
pub const DEFAULT_MAX_SECONDS: f64 = 10.0;

pub const DEFAULT_VAD_FRAME_MS: u64 = 30;
pub const DEFAULT_VAD_THRESHOLD_DB: f32 = -55.0;

pub const DEFAULT_ENERGY_THRESHOLD: f64 = 300.0;
pub const DEFAULT_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_ENERGY_RATIO: f64 = 1.5;
pub const DEFAULT_ENERGY_DAMPING: f64 = 0.15;

pub const DEFAULT_MIC_OPEN_ATTEMPTS: u32 = 5;
pub const DEFAULT_MIC_OPEN_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_MAX_MIC_RESTARTS: u32 = 20;
pub const DEFAULT_DEVICE_STALL_MS: u64 = 2_000;

pub const DEFAULT_STT_MODULE: &str = "none";
pub const DEFAULT_LANG: &str = "en-US";

/// Hard ceiling for a single recording when `--max-seconds` is enabled.
pub const MAX_RECORDING_SECONDS: f64 = 120.0;
/// VAD frame sizes accepted by every engine (earshot only supports these).
pub const SUPPORTED_VAD_FRAME_MS: [u64; 3] = [10, 20, 30];
pub const STT_MODULES: [&str; 2] = ["none", "whisper"];

pub fn default_vad_engine() -> VadEngineKind {
    if cfg!(feature = "vad_earshot") {
        VadEngineKind::Earshot
    } else {
        VadEngineKind::Simple
    }
}
