use super::defaults::{MAX_RECORDING_SECONDS, STT_MODULES, SUPPORTED_VAD_FRAME_MS};
use super::ListenerConfig;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;

impl ListenerConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check option ranges and normalize free-form strings.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=48_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 48000 Hz, got {}",
                self.sample_rate
            );
        }
        let max_frames = self.sample_rate as usize;
        if self.frames_per_buffer == 0 || self.frames_per_buffer > max_frames {
            bail!(
                "--frames-per-buffer must be between 1 and {max_frames}, got {}",
                self.frames_per_buffer
            );
        }
        if let Some(name) = self.input_device.as_mut() {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                bail!("--input-device cannot be empty");
            }
            if trimmed.chars().any(char::is_control) {
                bail!("--input-device cannot contain control characters");
            }
            *name = trimmed.to_string();
        }

        self.wake_word = normalize_phrase(&self.wake_word, "--wake-word")?;
        if let Some(phrase) = self.stand_up_word.as_deref() {
            self.stand_up_word = Some(normalize_phrase(phrase, "--stand-up-word")?);
        }
        let module = self.wake_word_module.trim().to_ascii_lowercase();
        if module.is_empty() {
            bail!("--wake-word-module cannot be empty");
        }
        self.wake_word_module = module;
        if !(1..=1_000).contains(&self.phoneme_duration_ms) {
            bail!(
                "--phoneme-duration-ms must be between 1 and 1000, got {}",
                self.phoneme_duration_ms
            );
        }

        check_seconds("--speech-seconds", self.speech_seconds, false)?;
        check_seconds("--silence-seconds", self.silence_seconds, false)?;
        check_seconds("--min-seconds", self.min_seconds, true)?;
        check_seconds("--before-seconds", self.before_seconds, true)?;
        check_seconds("--skip-seconds", self.skip_seconds, true)?;
        check_seconds("--max-seconds", self.max_seconds, true)?;
        if self.max_seconds > MAX_RECORDING_SECONDS {
            bail!(
                "--max-seconds must be at most {MAX_RECORDING_SECONDS}, got {}",
                self.max_seconds
            );
        }

        if !SUPPORTED_VAD_FRAME_MS.contains(&self.vad_frame_ms) {
            bail!(
                "--vad-frame-ms must be one of {SUPPORTED_VAD_FRAME_MS:?}, got {}",
                self.vad_frame_ms
            );
        }
        if !(-120.0..=0.0).contains(&self.vad_threshold_db) {
            bail!(
                "--vad-threshold-db must be between -120.0 and 0.0 dB, got {}",
                self.vad_threshold_db
            );
        }
        if let Some(threshold) = self.vad_energy_threshold {
            check_positive("--vad-energy-threshold", threshold)?;
        }
        if let Some(ratio) = self.vad_max_ratio {
            check_positive("--vad-max-ratio", ratio)?;
        }
        if let Some(energy) = self.vad_max_energy {
            check_positive("--vad-max-energy", energy)?;
        }

        if !self.energy_threshold.is_finite() || self.energy_threshold < 0.0 {
            bail!(
                "--energy-threshold must be a non-negative number, got {}",
                self.energy_threshold
            );
        }
        check_positive("--multiplier", self.multiplier)?;
        check_positive("--energy-ratio", self.energy_ratio)?;
        if !(self.energy_damping > 0.0 && self.energy_damping <= 1.0) {
            bail!(
                "--energy-damping must be in (0, 1], got {}",
                self.energy_damping
            );
        }

        if !(1..=100).contains(&self.mic_open_attempts) {
            bail!(
                "--mic-open-attempts must be between 1 and 100, got {}",
                self.mic_open_attempts
            );
        }
        if self.mic_open_backoff_ms > 60_000 {
            bail!(
                "--mic-open-backoff-ms must be at most 60000, got {}",
                self.mic_open_backoff_ms
            );
        }
        if !(200..=60_000).contains(&self.device_stall_ms) {
            bail!(
                "--device-stall-ms must be between 200 and 60000, got {}",
                self.device_stall_ms
            );
        }

        let stt = self.stt_module.trim().to_ascii_lowercase();
        if !STT_MODULES.contains(&stt.as_str()) {
            bail!("--stt must be one of {STT_MODULES:?}, got '{}'", self.stt_module);
        }
        self.stt_module = stt;
        if self.stt_module == "whisper" {
            let Some(path) = self.whisper_model_path.as_deref() else {
                bail!("--whisper-model-path is required when --stt whisper is selected");
            };
            let canonical = Path::new(path)
                .canonicalize()
                .with_context(|| format!("failed to canonicalize --whisper-model-path '{path}'"))?;
            if !canonical.is_file() {
                bail!(
                    "--whisper-model-path '{}' is not a file",
                    canonical.display()
                );
            }
            self.whisper_model_path = Some(canonical.to_string_lossy().into_owned());
        }

        if self.whisper_beam_size > 10 {
            bail!(
                "--whisper-beam-size must be between 0 and 10, got {}",
                self.whisper_beam_size
            );
        }
        if !(0.0..=5.0).contains(&self.whisper_temperature) {
            bail!(
                "--whisper-temperature must be between 0.0 and 5.0, got {}",
                self.whisper_temperature
            );
        }

        let lang = self.lang.trim();
        if lang.is_empty() || lang.len() > 16 {
            bail!("--lang must be 1-16 characters, got '{}'", self.lang);
        }
        if !lang
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            bail!("--lang may only contain ASCII letters, digits, '-' or '_'");
        }
        self.lang = lang.to_string();

        Ok(())
    }
}

fn normalize_phrase(value: &str, flag: &str) -> Result<String> {
    let phrase = value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if phrase.is_empty() {
        bail!("{flag} cannot be empty");
    }
    if phrase.len() > 64 {
        bail!("{flag} must be at most 64 bytes");
    }
    Ok(phrase)
}

fn check_seconds(flag: &str, value: f64, allow_zero: bool) -> Result<()> {
    if !value.is_finite() || value < 0.0 || (!allow_zero && value == 0.0) {
        let bound = if allow_zero { ">= 0" } else { "> 0" };
        bail!("{flag} must be a finite number {bound}, got {value}");
    }
    Ok(())
}

fn check_positive(flag: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{flag} must be a positive number, got {value}");
    }
    Ok(())
}
