//! Waits for the wake phrase while tracking ambient noise.

use super::events::{EventSink, ListenerEvent};
use super::state::RunState;
use crate::audio::{pcm, ChunkStream, DeviceError, RingAudioBuffer, RollingMean, SAMPLE_WIDTH};
use crate::config::ListenerConfig;
use crate::diagnostics::{LevelMeter, Watchdog};
use crate::wake::WakeWordEngine;
use std::collections::VecDeque;

/// Time between wake word checks.
pub const SEC_BETWEEN_WW_CHECKS: f64 = 0.2;
/// Silence appended to every window handed to the engine.
pub const SILENCE_SEC: f64 = 0.01;
/// Shortest window the engine is ever tested on.
pub const MIN_TEST_SECONDS: f64 = 3.0;
/// Chunks after the wake phrase kept to seed the recording.
pub const TRAILING_CHUNKS: usize = 7;
/// Rolling energy average window.
pub const AVERAGE_SECONDS: f64 = 5.0;
/// Ambient calibration before each wait.
pub const AMBIENT_ADJUST_SECONDS: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordResult {
    /// Window that was last tested, padded with trailing silence.
    pub audio: Vec<u8>,
    pub found: bool,
    pub stopped: bool,
    /// Most recent chunks, oldest first.
    pub trailing_chunks: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaiterSettings {
    pub sample_rate: u32,
    pub seconds_per_buffer: f64,
    pub initial_threshold: f64,
    pub multiplier: f64,
    pub energy_ratio: f64,
    pub damping: f64,
}

impl WaiterSettings {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            seconds_per_buffer: config.seconds_per_buffer(),
            initial_threshold: config.energy_threshold,
            multiplier: config.multiplier,
            energy_ratio: config.energy_ratio,
            damping: config.energy_damping,
        }
    }

    fn duration_to_bytes(&self, seconds: f64) -> usize {
        (seconds * f64::from(self.sample_rate)) as usize * SAMPLE_WIDTH
    }
}

/// Feeds chunks to the wake word engine until it fires.
pub struct WakeWordWaiter {
    settings: WaiterSettings,
    engine: Box<dyn WakeWordEngine>,
    engine_module: String,
    stand_up: Option<Box<dyn WakeWordEngine>>,
    energy_threshold: f64,
    meter: LevelMeter,
    watchdog: Watchdog,
}

impl WakeWordWaiter {
    pub fn new(
        settings: WaiterSettings,
        engine: Box<dyn WakeWordEngine>,
        engine_module: impl Into<String>,
        meter: LevelMeter,
        watchdog: Watchdog,
    ) -> Self {
        Self {
            energy_threshold: settings.initial_threshold,
            settings,
            engine,
            engine_module: engine_module.into(),
            stand_up: None,
            meter,
            watchdog,
        }
    }

    /// Engine that wakes a sleeping listener.
    pub fn with_stand_up(mut self, engine: Box<dyn WakeWordEngine>) -> Self {
        self.stand_up = Some(engine);
        self
    }

    pub fn energy_threshold(&self) -> f64 {
        self.energy_threshold
    }

    pub fn key_phrase(&self) -> &str {
        self.engine.key_phrase()
    }

    pub fn engine_module(&self) -> &str {
        &self.engine_module
    }

    /// Pull the threshold toward `energy * energy_ratio`, damped per second.
    pub fn adjust_threshold(&mut self, energy: f64) {
        if energy <= 0.0 {
            return;
        }
        let damping = self.settings.damping.powf(self.settings.seconds_per_buffer);
        let target_energy = energy * self.settings.energy_ratio;
        self.energy_threshold = self.energy_threshold * damping + target_energy * (1.0 - damping);
    }

    /// Calibrate the threshold on `duration` seconds of ambient audio.
    pub fn adjust_for_ambient_noise(
        &mut self,
        source: &mut dyn ChunkStream,
        duration: f64,
    ) -> Result<(), DeviceError> {
        let mut elapsed = 0.0;
        while elapsed < duration {
            let chunk = source.next_chunk()?;
            elapsed += self.settings.seconds_per_buffer;
            if source.is_muted() {
                continue;
            }
            self.adjust_threshold(pcm::rms(&chunk));
        }
        tracing::trace!(threshold = self.energy_threshold, "ambient threshold adjusted");
        Ok(())
    }

    /// Block until the wake phrase is heard, a listen is triggered or the
    /// loop is stopped.
    pub fn wait(
        &mut self,
        source: &mut dyn ChunkStream,
        state: &RunState,
        events: &dyn EventSink,
    ) -> Result<WakeWordResult, DeviceError> {
        let seconds_per_buffer = self.settings.seconds_per_buffer;
        let ww_duration = self.engine.expected_duration().as_secs_f64();
        let test_size = self
            .settings
            .duration_to_bytes(ww_duration.max(MIN_TEST_SECONDS));
        let silence = pcm::silence(self.settings.duration_to_bytes(SILENCE_SEC));

        let mut audio_buffer = RingAudioBuffer::new(test_size);
        let buffers_per_check = SEC_BETWEEN_WW_CHECKS / seconds_per_buffer;
        let mut buffers_since_check = 0.0;
        let mut audio_mean = RollingMean::new((AVERAGE_SECONDS / seconds_per_buffer) as usize);
        let mut trailing: VecDeque<Vec<u8>> = VecDeque::with_capacity(TRAILING_CHUNKS);
        let mut mic_write_counter: u64 = 0;
        let mut audio_data = silence.clone();

        let result = |audio: Vec<u8>, found: bool, stopped: bool, trailing: VecDeque<Vec<u8>>| {
            WakeWordResult {
                audio,
                found,
                stopped,
                trailing_chunks: trailing.into(),
            }
        };

        loop {
            if state.stop_signaled() || !state.is_running() {
                return Ok(result(audio_data, false, true, trailing));
            }
            if state.take_listen_trigger() {
                tracing::debug!("listen triggered; skipping wake word");
                return Ok(result(audio_data, false, false, trailing));
            }

            let chunk = source.next_chunk()?;
            if source.is_muted() {
                // Muted audio is neither scored nor adapted to, but the
                // heartbeat keeps going.
                self.heartbeat(&mut mic_write_counter, 0.0, true);
                continue;
            }

            audio_buffer.append(&chunk);
            if trailing.len() == TRAILING_CHUNKS {
                trailing.pop_front();
            }
            trailing.push_back(chunk.clone());
            buffers_since_check += 1.0;

            let energy = pcm::rms(&chunk);
            audio_mean.append_sample(energy);
            if energy < self.energy_threshold * self.settings.multiplier {
                self.adjust_threshold(energy);
            }
            // Bump the threshold just above sustained loud input.
            if self.energy_threshold < energy && energy < audio_mean.value() * 1.5 {
                self.energy_threshold = energy * 1.2;
            }

            self.heartbeat(&mut mic_write_counter, energy, false);

            let sleeping = state.is_sleeping();
            let engine: &mut dyn WakeWordEngine = if sleeping {
                match self.stand_up.as_deref_mut() {
                    Some(engine) => engine,
                    None => continue,
                }
            } else {
                self.engine.as_mut()
            };
            engine.update(&chunk);

            if buffers_since_check > buffers_per_check {
                buffers_since_check -= buffers_per_check;
                audio_data = audio_buffer.get_last(test_size);
                audio_data.extend_from_slice(&silence);
                if !engine.found_wake_word(&audio_data) {
                    continue;
                }
                if sleeping {
                    tracing::info!("stand-up phrase heard; waking up");
                    state.set_sleeping(false);
                    events.emit(ListenerEvent::Awoken);
                    continue;
                }
                tracing::info!(phrase = %self.engine.key_phrase(), "wake word found");
                return Ok(result(audio_data, true, false, trailing));
            }
        }
    }

    /// Watchdog and level snapshot on two of every three chunks.
    fn heartbeat(&self, counter: &mut u64, energy: f64, muted: bool) {
        if *counter % 3 != 0 {
            (self.watchdog)();
            self.meter.record(energy, self.energy_threshold, muted);
        }
        *counter += 1;
    }

    /// Release engine resources.
    pub fn stop(&mut self) {
        self.engine.stop();
        if let Some(stand_up) = self.stand_up.as_mut() {
            stand_up.stop();
        }
    }
}
