//! Acoustic voice activity detection engines.
//!
//! Engines classify one fixed-size frame at a time; the phrase state machine
//! in `silence.rs` layers timing rules on top of these per-frame decisions.

use crate::config::{ListenerConfig, VadEngineKind};

/// Voice Activity Detection engine that processes 16-bit mono frames.
///
/// # Frame Size Contract
/// Earshot expects frames of 10ms, 20ms, or 30ms duration at 16kHz.
/// Frame size in samples = (sample_rate * frame_duration_ms) / 1000, so
/// 30ms @ 16kHz = 480 samples.
pub trait VadEngine: Send {
    fn process_frame(&mut self, samples: &[i16]) -> VadDecision;
    fn reset(&mut self);
    fn name(&self) -> &'static str {
        "unknown_vad"
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
    Uncertain,
}

impl VadDecision {
    /// Only a confident silence decision counts as silence.
    pub fn is_silence(self) -> bool {
        self == VadDecision::Silence
    }
}

/// Lightweight VAD that compares frame RMS (dBFS) to a threshold. Used when
/// Earshot is disabled or unavailable.
#[derive(Debug, Clone)]
pub struct SimpleThresholdVad {
    threshold_db: f32,
}

impl SimpleThresholdVad {
    pub fn new(threshold_db: f32) -> Self {
        Self { threshold_db }
    }
}

impl VadEngine for SimpleThresholdVad {
    fn process_frame(&mut self, samples: &[i16]) -> VadDecision {
        if samples.is_empty() {
            return VadDecision::Uncertain;
        }
        let energy: f64 = samples
            .iter()
            .map(|&s| {
                let value = f64::from(s) / 32_768.0;
                value * value
            })
            .sum::<f64>()
            / samples.len() as f64;
        let rms = energy.sqrt().max(1e-6);
        let db = (20.0 * rms.log10()) as f32;
        if db >= self.threshold_db {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "simple_threshold_vad"
    }
}

/// Build the configured engine, falling back to the threshold VAD when the
/// earshot feature is compiled out.
pub fn create_vad_engine(config: &ListenerConfig) -> Box<dyn VadEngine> {
    match config.vad_engine {
        VadEngineKind::Earshot => {
            #[cfg(feature = "vad_earshot")]
            {
                Box::new(crate::vad_earshot::EarshotVad::from_config(config))
            }
            #[cfg(not(feature = "vad_earshot"))]
            {
                tracing::warn!("earshot VAD not compiled in; using simple threshold VAD");
                Box::new(SimpleThresholdVad::new(config.vad_threshold_db))
            }
        }
        VadEngineKind::Simple => Box::new(SimpleThresholdVad::new(config.vad_threshold_db)),
    }
}
