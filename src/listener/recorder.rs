//! Records one utterance after the wake word.

use super::messages::QueueMessage;
use super::state::RunState;
use crate::audio::{ChunkStream, DeviceError, SilenceResultKind, VoiceActivityDetector};
use crate::diagnostics::{LevelMeter, Watchdog};
use crossbeam_channel::Sender;
use std::time::Instant;

/// Chunks between energy snapshots while recording.
const METER_INTERVAL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEnd {
    PhraseEnd,
    Timeout,
    Stopped,
}

impl RecordEnd {
    pub fn label(self) -> &'static str {
        match self {
            RecordEnd::PhraseEnd => "phrase_end",
            RecordEnd::Timeout => "timeout",
            RecordEnd::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub audio: Vec<u8>,
    pub end: RecordEnd,
    pub chunks: usize,
}

/// Sends an utterance to the consumer while it is being recorded.
#[derive(Debug, Clone)]
pub struct StreamHandler {
    queue: Sender<QueueMessage>,
}

impl StreamHandler {
    pub fn new(queue: Sender<QueueMessage>) -> Self {
        Self { queue }
    }

    fn send(&self, message: QueueMessage) {
        if self.queue.send(message).is_err() {
            tracing::debug!("consumer gone; dropping stream message");
        }
    }

    pub fn stream_start(&self) {
        self.send(QueueMessage::StreamStart);
    }

    pub fn stream_chunk(&self, chunk: &[u8]) {
        self.send(QueueMessage::StreamChunk(chunk.to_vec()));
    }

    pub fn stream_stop(&self) {
        self.send(QueueMessage::StreamStop);
    }
}

pub struct UtteranceRecorder {
    vad: VoiceActivityDetector,
    meter: LevelMeter,
    watchdog: Watchdog,
}

impl UtteranceRecorder {
    pub fn new(vad: VoiceActivityDetector, meter: LevelMeter, watchdog: Watchdog) -> Self {
        Self {
            vad,
            meter,
            watchdog,
        }
    }

    pub fn vad(&self) -> &VoiceActivityDetector {
        &self.vad
    }

    /// Record until the phrase ends, the ceiling is hit or recording is
    /// stopped. `pre_roll` chunks seed the detector's lookbehind.
    pub fn record(
        &mut self,
        source: &mut dyn ChunkStream,
        state: &RunState,
        pre_roll: &[Vec<u8>],
        stream: Option<&StreamHandler>,
    ) -> Result<RecordOutcome, DeviceError> {
        self.vad.start();
        self.vad
            .prime_lookbehind(pre_roll.iter().map(Vec::as_slice));
        if let Some(stream) = stream {
            stream.stream_start();
        }

        let started = Instant::now();
        let recorded = self.record_chunks(source, state, stream);
        if let Some(stream) = stream {
            stream.stream_stop();
        }
        let audio = self.vad.stop();
        let (end, chunks) = recorded?;
        tracing::debug!(
            end = end.label(),
            chunks,
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recording finished"
        );
        Ok(RecordOutcome { audio, end, chunks })
    }

    fn record_chunks(
        &mut self,
        source: &mut dyn ChunkStream,
        state: &RunState,
        stream: Option<&StreamHandler>,
    ) -> Result<(RecordEnd, usize), DeviceError> {
        let mut num_chunks = 0;
        loop {
            if state.stop_recording_requested() || !state.is_running() {
                return Ok((RecordEnd::Stopped, num_chunks));
            }
            let chunk = source.next_chunk()?;
            let result = self.vad.process(&chunk);

            if matches!(
                result.kind,
                SilenceResultKind::Speech | SilenceResultKind::PhraseStart
            ) {
                if let Some(stream) = stream {
                    stream.stream_chunk(&chunk);
                }
            }
            match result.kind {
                SilenceResultKind::PhraseEnd => return Ok((RecordEnd::PhraseEnd, num_chunks + 1)),
                SilenceResultKind::Timeout => return Ok((RecordEnd::Timeout, num_chunks + 1)),
                _ => {}
            }
            if num_chunks % METER_INTERVAL == 0 {
                (self.watchdog)();
                let threshold = self.meter.snapshot().threshold;
                self.meter.record(result.energy, threshold, source.is_muted());
            }
            num_chunks += 1;
        }
    }
}
