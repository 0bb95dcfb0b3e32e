//! Earshot-powered Voice Activity Detector adapter implementing `VadEngine`.

use crate::audio::{VadDecision, VadEngine};
use crate::config::ListenerConfig;
use earshot::{VoiceActivityDetector, VoiceActivityProfile};

/// Earshot window: 30 ms at 16 kHz.
const WINDOW_SAMPLES: usize = 480;

/// Thin wrapper that adapts `earshot` to the crate's `VadEngine` trait.
///
/// Frames longer than one window are split; the frame is speech when any
/// window is.
pub struct EarshotVad {
    detector: VoiceActivityDetector,
    window_samples: usize,
    scratch: Vec<i16>,
}

impl EarshotVad {
    pub fn from_config(cfg: &ListenerConfig) -> Self {
        let profile = match cfg.vad_threshold_db {
            t if t <= -50.0 => VoiceActivityProfile::VERY_AGGRESSIVE,
            t if t <= -40.0 => VoiceActivityProfile::AGGRESSIVE,
            t if t <= -30.0 => VoiceActivityProfile::LBR,
            _ => VoiceActivityProfile::QUALITY,
        };
        let frame_ms = cfg.vad_frame_ms.clamp(10, 30) as usize;
        let window_samples = (16_000 * frame_ms / 1000).min(WINDOW_SAMPLES);
        Self {
            detector: VoiceActivityDetector::new(profile),
            window_samples: window_samples.max(160),
            scratch: Vec::new(),
        }
    }
}

impl VadEngine for EarshotVad {
    fn process_frame(&mut self, samples: &[i16]) -> VadDecision {
        if samples.is_empty() {
            return VadDecision::Uncertain;
        }
        let mut decision = VadDecision::Uncertain;
        for window in samples.chunks(self.window_samples) {
            self.scratch.clear();
            self.scratch.extend_from_slice(window);
            self.scratch.resize(self.window_samples, 0);
            match self.detector.predict_16khz(&self.scratch) {
                Ok(true) => return VadDecision::Speech,
                Ok(false) => decision = VadDecision::Silence,
                Err(_) => {}
            }
        }
        decision
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_vad"
    }
}
