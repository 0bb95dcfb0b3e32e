//! Phrase boundary detection on top of a per-frame [`VadEngine`].
//!
//! The detector consumes chunks of any size, re-frames them into
//! `vad_frame_ms` frames and walks a small state machine:
//! idle → before phrase → in phrase ⇄ after phrase → phrase end, with a
//! recording ceiling that can cut any state short.

use super::pcm;
use super::vad::VadEngine;
use super::SAMPLE_WIDTH;
use crate::config::ListenerConfig;
use std::collections::VecDeque;

/// Classification of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceResultKind {
    Silence,
    Speech,
    Timeout,
    PhraseStart,
    PhraseEnd,
}

impl SilenceResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SilenceResultKind::Silence => "silence",
            SilenceResultKind::Speech => "speech",
            SilenceResultKind::Timeout => "timeout",
            SilenceResultKind::PhraseStart => "phrase_start",
            SilenceResultKind::PhraseEnd => "phrase_end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceResult {
    pub kind: SilenceResultKind,
    /// Debiased energy of the processed chunk.
    pub energy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    BeforePhrase,
    InPhrase,
    AfterPhrase,
}

/// Timing and energy options for [`VoiceActivityDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct VadSettings {
    pub sample_rate: u32,
    pub frame_ms: u64,
    pub skip_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: Option<f64>,
    pub speech_seconds: f64,
    pub silence_seconds: f64,
    pub before_seconds: f64,
    /// Fixed max energy for the ratio check; tracked dynamically when `None`.
    pub max_energy: Option<f64>,
    pub max_current_ratio_threshold: Option<f64>,
    pub current_energy_threshold: Option<f64>,
}

impl VadSettings {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frame_ms: config.vad_frame_ms,
            skip_seconds: config.skip_seconds,
            min_seconds: config.min_seconds,
            max_seconds: config.max_recording_seconds(),
            speech_seconds: config.speech_seconds,
            silence_seconds: config.silence_seconds,
            before_seconds: config.before_seconds,
            max_energy: config.vad_max_energy,
            max_current_ratio_threshold: config.vad_max_ratio,
            current_energy_threshold: config.vad_energy_threshold,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        ((u64::from(self.sample_rate) * self.frame_ms / 1000).max(1) as usize) * SAMPLE_WIDTH
    }

    pub fn seconds_per_frame(&self) -> f64 {
        (self.frame_bytes() / SAMPLE_WIDTH) as f64 / f64::from(self.sample_rate.max(1))
    }

    fn buffers_for(&self, seconds: f64) -> usize {
        (seconds / self.seconds_per_frame()).ceil().max(0.0) as usize
    }
}

/// Online speech/silence state machine that delimits one utterance.
pub struct VoiceActivityDetector {
    settings: VadSettings,
    engine: Box<dyn VadEngine>,
    frame_bytes: usize,
    seconds_per_frame: f64,
    speech_buffers: usize,
    before_buffers: usize,
    skip_buffers: usize,

    state: VadState,
    before_phrase_chunks: VecDeque<Vec<u8>>,
    phrase_buffer: Vec<u8>,
    current_chunk: Vec<u8>,
    max_buffers: Option<i64>,
    min_phrase_buffers: usize,
    speech_buffers_left: usize,
    skip_buffers_left: usize,
    silence_buffers: usize,
    current_seconds: f64,
    max_energy: Option<f64>,
}

impl VoiceActivityDetector {
    pub fn new(settings: VadSettings, engine: Box<dyn VadEngine>) -> Self {
        let frame_bytes = settings.frame_bytes();
        let seconds_per_frame = settings.seconds_per_frame();
        let speech_buffers = settings.buffers_for(settings.speech_seconds);
        let before_buffers = settings.buffers_for(settings.before_seconds);
        let skip_buffers = settings.buffers_for(settings.skip_seconds);
        let max_energy = settings.max_energy;
        Self {
            settings,
            engine,
            frame_bytes,
            seconds_per_frame,
            speech_buffers,
            before_buffers,
            skip_buffers,
            state: VadState::Idle,
            before_phrase_chunks: VecDeque::with_capacity(before_buffers),
            phrase_buffer: Vec::new(),
            current_chunk: Vec::new(),
            max_buffers: None,
            min_phrase_buffers: 0,
            speech_buffers_left: speech_buffers,
            skip_buffers_left: skip_buffers,
            silence_buffers: 0,
            current_seconds: 0.0,
            max_energy,
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(
            VadSettings::from_config(config),
            super::vad::create_vad_engine(config),
        )
    }

    pub fn settings(&self) -> &VadSettings {
        &self.settings
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Seconds of (non-skipped) audio processed since `start`.
    pub fn current_seconds(&self) -> f64 {
        self.current_seconds
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Begin a new utterance.
    pub fn start(&mut self) {
        self.before_phrase_chunks.clear();
        self.phrase_buffer.clear();
        self.current_chunk.clear();
        self.max_buffers = self
            .settings
            .max_seconds
            .map(|seconds| self.settings.buffers_for(seconds) as i64);
        self.min_phrase_buffers = self.settings.buffers_for(self.settings.min_seconds);
        self.speech_buffers_left = self.speech_buffers;
        self.skip_buffers_left = self.skip_buffers;
        self.silence_buffers = self.settings.buffers_for(self.settings.silence_seconds);
        self.current_seconds = 0.0;
        self.max_energy = self.settings.max_energy;
        self.engine.reset();
        self.state = VadState::BeforePhrase;
    }

    /// Push audio into the lookbehind ring without classifying it.
    pub fn prime_lookbehind<'a>(&mut self, chunks: impl IntoIterator<Item = &'a [u8]>) {
        if self.state == VadState::Idle {
            self.start();
        }
        for chunk in chunks {
            for frame in chunk.chunks_exact(self.frame_bytes) {
                self.push_before(frame.to_vec());
            }
        }
    }

    /// Return the lookbehind plus phrase audio and reset to idle.
    pub fn stop(&mut self) -> Vec<u8> {
        let before: usize = self.before_phrase_chunks.iter().map(Vec::len).sum();
        let mut audio = Vec::with_capacity(before + self.phrase_buffer.len());
        for chunk in self.before_phrase_chunks.drain(..) {
            audio.extend_from_slice(&chunk);
        }
        audio.append(&mut self.phrase_buffer);
        self.current_chunk.clear();
        self.state = VadState::Idle;
        audio
    }

    /// Process one chunk of audio of any length.
    pub fn process(&mut self, audio_chunk: &[u8]) -> SilenceResult {
        if self.state == VadState::Idle {
            self.start();
        }
        let energy = pcm::debiased_energy(audio_chunk);
        let mut result = None;
        let mut is_speech = false;

        self.current_chunk.extend_from_slice(audio_chunk);
        while self.current_chunk.len() >= self.frame_bytes {
            let rest = self.current_chunk.split_off(self.frame_bytes);
            let frame = std::mem::replace(&mut self.current_chunk, rest);
            if self.skip_buffers_left > 0 {
                self.skip_buffers_left -= 1;
                continue;
            }

            let in_phrase = matches!(self.state, VadState::InPhrase | VadState::AfterPhrase);
            let frame_energy = pcm::debiased_energy(&frame);
            is_speech = !self.is_silence(&frame, frame_energy);
            if in_phrase {
                self.phrase_buffer.extend_from_slice(&frame);
            } else {
                self.push_before(frame);
            }
            self.current_seconds += self.seconds_per_frame;

            if let Some(left) = self.max_buffers.as_mut() {
                *left -= 1;
                if *left <= 0 {
                    return SilenceResult {
                        kind: SilenceResultKind::Timeout,
                        energy,
                    };
                }
            }

            if is_speech && self.speech_buffers_left > 0 {
                self.speech_buffers_left -= 1;
            } else if is_speech && self.state == VadState::BeforePhrase {
                result = Some(SilenceResultKind::PhraseStart);
                self.state = VadState::InPhrase;
                self.min_phrase_buffers = self.settings.buffers_for(self.settings.min_seconds);
            } else if in_phrase && self.min_phrase_buffers > 0 {
                self.min_phrase_buffers -= 1;
            } else if !is_speech {
                match self.state {
                    VadState::BeforePhrase | VadState::Idle => {
                        self.speech_buffers_left = self.speech_buffers;
                    }
                    VadState::AfterPhrase if self.silence_buffers > 0 => {
                        self.silence_buffers -= 1;
                    }
                    VadState::AfterPhrase => {
                        return SilenceResult {
                            kind: SilenceResultKind::PhraseEnd,
                            energy,
                        };
                    }
                    VadState::InPhrase => {
                        self.state = VadState::AfterPhrase;
                        self.silence_buffers =
                            self.settings.buffers_for(self.settings.silence_seconds);
                    }
                }
            } else if self.state == VadState::AfterPhrase {
                // Speech resumed before the silence window ran out.
                self.state = VadState::InPhrase;
            }
        }

        let kind = result.unwrap_or(if is_speech {
            SilenceResultKind::Speech
        } else {
            SilenceResultKind::Silence
        });
        SilenceResult { kind, energy }
    }

    /// A frame is silent only when every enabled check agrees.
    pub fn is_silence(&mut self, frame: &[u8], energy: f64) -> bool {
        let samples: Vec<i16> = pcm::samples(frame).collect();
        let mut all_silence = self.engine.process_frame(&samples).is_silence();

        if let Some(threshold) = self.settings.max_current_ratio_threshold {
            if self.settings.max_energy.is_none() {
                self.max_energy = Some(self.max_energy.map_or(energy, |max| max.max(energy)));
            }
            let max_energy = self.max_energy.unwrap_or(energy);
            let ratio = if energy > 0.0 { max_energy / energy } else { 0.0 };
            all_silence = all_silence && ratio > threshold;
        }
        if let Some(threshold) = self.settings.current_energy_threshold {
            all_silence = all_silence && energy < threshold;
        }
        all_silence
    }

    fn push_before(&mut self, frame: Vec<u8>) {
        if self.before_buffers == 0 {
            return;
        }
        if self.before_phrase_chunks.len() == self.before_buffers {
            self.before_phrase_chunks.pop_front();
        }
        self.before_phrase_chunks.push_back(frame);
    }
}
