//! Consumer thread: drains the audio queue and runs speech-to-text.

use super::events::{EventSink, ListenerEvent};
use super::messages::{QueueMessage, Utterance};
use super::state::RunState;
use crate::stt::{SpeechToText, SttError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Shortest utterance worth sending to STT.
pub const MIN_AUDIO_SECONDS: f64 = 0.5;
const QUEUE_POLL: Duration = Duration::from_millis(500);

pub struct AudioConsumer {
    state: Arc<RunState>,
    queue: Receiver<QueueMessage>,
    stt: Box<dyn SpeechToText>,
    events: Arc<dyn EventSink>,
    streamed: Option<Result<Option<String>, SttError>>,
}

impl AudioConsumer {
    pub fn new(
        state: Arc<RunState>,
        queue: Receiver<QueueMessage>,
        stt: Box<dyn SpeechToText>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state,
            queue,
            stt,
            events,
            streamed: None,
        }
    }

    pub fn run(mut self) {
        tracing::debug!("audio consumer running");
        while self.state.is_running() {
            if !self.read() {
                break;
            }
        }
        tracing::debug!("audio consumer stopping");
    }

    /// Handle at most one message. Returns `false` once the producer is gone.
    pub fn read(&mut self) -> bool {
        match self.queue.recv_timeout(QUEUE_POLL) {
            Ok(message) => {
                self.handle(message);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn handle(&mut self, message: QueueMessage) {
        match message {
            QueueMessage::AudioReady(utterance) => self.process(&utterance),
            QueueMessage::StreamStart => {
                self.streamed = None;
                if let Err(err) = self.stt.stream_start() {
                    tracing::warn!(error = %err, "stt stream start failed");
                }
            }
            QueueMessage::StreamChunk(chunk) => {
                if let Err(err) = self.stt.stream_data(&chunk) {
                    tracing::warn!(error = %err, "stt stream data failed");
                }
            }
            QueueMessage::StreamStop => {
                self.streamed = Some(self.stt.stream_stop());
            }
        }
    }

    fn process(&mut self, utterance: &Utterance) {
        let streamed = self.streamed.take();
        let duration = utterance.duration_seconds();
        if duration < MIN_AUDIO_SECONDS {
            tracing::warn!(duration, "audio too short to be processed");
            return;
        }
        let started = Instant::now();
        let result = match streamed {
            Some(result) => result,
            None => self.stt.execute(utterance),
        };
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "time to transcribe speech"
        );
        self.deliver(result);
    }

    fn deliver(&self, result: Result<Option<String>, SttError>) {
        match result {
            Ok(Some(text)) => {
                let text = text.trim().to_lowercase();
                if text.is_empty() {
                    tracing::info!("no words were transcribed");
                    self.events.emit(ListenerEvent::RecognitionUnknown);
                    return;
                }
                tracing::debug!(transcript = %text, "stt");
                if self.state.is_running() {
                    let ident = utterance_ident(&text);
                    self.events.emit(ListenerEvent::Utterance {
                        utterances: vec![text],
                        lang: self.stt.lang().to_string(),
                        ident: Some(ident),
                    });
                }
            }
            Ok(None) => {
                tracing::info!("no words were transcribed");
                self.events.emit(ListenerEvent::RecognitionUnknown);
            }
            Err(err) if err.is_network() => {
                tracing::error!(error = %err, "connection error");
                self.events.emit(ListenerEvent::NoInternet);
            }
            Err(err) => {
                tracing::error!(error = %err, "speech recognition could not understand audio");
                self.events.emit(ListenerEvent::RecognitionUnknown);
            }
        }
    }
}

/// Timestamp followed by a hash of the transcript.
fn utterance_ident(text: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{millis}{:x}", hasher.finish())
}
