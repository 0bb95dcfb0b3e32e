//! Microphone capture, PCM helpers and voice activity detection.
//!
//! Audio is captured via a pluggable [`AudioBackend`] (CPAL in production),
//! normalized to mono 16-bit little-endian PCM at the configured rate and
//! handed out in fixed-size chunks by [`MutableAudioSource`].

/// Bytes per PCM sample (16-bit).
pub const SAMPLE_WIDTH: usize = 2;

/// Sample rate expected by the VAD engines and the default STT engine.
pub const TARGET_RATE: u32 = 16_000;

mod cpal_backend;
mod device;
mod dispatch;
pub mod pcm;
pub(crate) mod resample;
mod ring;
mod silence;
mod source;
mod vad;

pub use cpal_backend::{list_input_devices, CpalBackend};
pub use device::{
    ActiveStream, AudioBackend, ChunkSink, DeviceError, DeviceSelection, StreamFormat,
};
pub use ring::{RingAudioBuffer, RollingMean};
pub use silence::{
    SilenceResult, SilenceResultKind, VadSettings, VadState, VoiceActivityDetector,
};
pub use source::{ChunkStream, MuteFlag, MutableAudioSource, SourceSettings};
pub use vad::{create_vad_engine, SimpleThresholdVad, VadDecision, VadEngine};
