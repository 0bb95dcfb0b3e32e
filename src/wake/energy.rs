use super::{WakeWordEngine, WakeWordSpec};
use crate::audio::{pcm, SAMPLE_WIDTH};
use std::time::Duration;

/// Loud chunks must exceed the noise floor by this factor.
const TRIGGER_RATIO: f64 = 3.0;
/// Absolute floor so digital silence never makes everything "loud".
const MIN_TRIGGER_ENERGY: f64 = 200.0;
const FLOOR_SMOOTHING: f64 = 0.05;
/// Quiet tail that closes a burst.
const TAIL_SECONDS: f64 = 0.15;

/// Fires on a single burst of sound about as long as the key phrase.
///
/// This is a stand-in for a trained model: it knows nothing about the words
/// themselves, only that a short isolated utterance of the right length
/// happened.
#[derive(Debug, Clone)]
pub struct EnergyPhraseEngine {
    key_phrase: String,
    expected: Duration,
    sample_rate: u32,
    noise_floor: Option<f64>,
    loud_seconds: f64,
    quiet_seconds: f64,
    triggered: bool,
}

impl EnergyPhraseEngine {
    pub fn new(spec: &WakeWordSpec) -> Self {
        Self {
            key_phrase: spec.key_phrase.clone(),
            expected: spec.expected_duration(),
            sample_rate: spec.sample_rate.max(1),
            noise_floor: None,
            loud_seconds: 0.0,
            quiet_seconds: 0.0,
            triggered: false,
        }
    }

    fn burst_matches(&self) -> bool {
        let expected = self.expected.as_secs_f64();
        self.loud_seconds >= expected * 0.5 && self.loud_seconds <= expected * 2.0
    }
}

impl WakeWordEngine for EnergyPhraseEngine {
    fn key_phrase(&self) -> &str {
        &self.key_phrase
    }

    fn expected_duration(&self) -> Duration {
        self.expected
    }

    fn update(&mut self, chunk: &[u8]) {
        let seconds = (chunk.len() / SAMPLE_WIDTH) as f64 / f64::from(self.sample_rate);
        let energy = pcm::rms(chunk);
        let floor = self.noise_floor.unwrap_or(energy);
        let loud = energy > MIN_TRIGGER_ENERGY.max(floor * TRIGGER_RATIO);
        if loud {
            self.loud_seconds += seconds;
            self.quiet_seconds = 0.0;
            return;
        }
        self.noise_floor = Some(floor + FLOOR_SMOOTHING * (energy - floor));
        if self.loud_seconds > 0.0 {
            self.quiet_seconds += seconds;
            if self.quiet_seconds >= TAIL_SECONDS {
                if self.burst_matches() {
                    self.triggered = true;
                }
                self.loud_seconds = 0.0;
                self.quiet_seconds = 0.0;
            }
        }
    }

    fn found_wake_word(&mut self, _frame_data: &[u8]) -> bool {
        std::mem::take(&mut self.triggered)
    }

    fn stop(&mut self) {
        self.loud_seconds = 0.0;
        self.quiet_seconds = 0.0;
        self.triggered = false;
    }
}
