//! Events published by the listener threads.
//!
//! Serialized as newline-delimited JSON with an `"event"` tag field.

use crate::lock::lock_or_recover;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum ListenerEvent {
    /// Wake phrase detected
    #[serde(rename = "wakeword")]
    WakeWord { hotword: String, engine: String },

    /// Stand-up phrase detected while sleeping
    #[serde(rename = "awoken")]
    Awoken,

    /// Utterance recording started
    #[serde(rename = "record_begin")]
    RecordBegin,

    /// Utterance recording finished
    #[serde(rename = "record_end")]
    RecordEnd,

    /// Transcription of one utterance
    #[serde(rename = "utterance")]
    Utterance {
        utterances: Vec<String>,
        lang: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ident: Option<String>,
    },

    /// Nothing usable was transcribed
    #[serde(rename = "speech.recognition.unknown")]
    RecognitionUnknown,

    /// The STT service could not be reached
    #[serde(rename = "no_internet")]
    NoInternet,

    /// Listener state snapshot
    #[serde(rename = "status")]
    Status {
        state: String,
        muted: bool,
        sleeping: bool,
        energy: f64,
        threshold: f64,
    },

    /// Device or engine failure
    #[serde(rename = "error")]
    Error { message: String, fatal: bool },
}

impl ListenerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ListenerEvent::WakeWord { .. } => "wakeword",
            ListenerEvent::Awoken => "awoken",
            ListenerEvent::RecordBegin => "record_begin",
            ListenerEvent::RecordEnd => "record_end",
            ListenerEvent::Utterance { .. } => "utterance",
            ListenerEvent::RecognitionUnknown => "speech.recognition.unknown",
            ListenerEvent::NoInternet => "no_internet",
            ListenerEvent::Status { .. } => "status",
            ListenerEvent::Error { .. } => "error",
        }
    }
}

/// Receives listener events. Called from the producer and consumer threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ListenerEvent);
}

/// Forwards events into a channel; a closed channel drops them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<ListenerEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<ListenerEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ListenerEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("event receiver gone; dropping event");
        }
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: ListenerEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, event = event.name(), "failed to serialize event");
                return;
            }
        };
        let mut writer = lock_or_recover(&self.writer, "event_writer");
        let _ = writeln!(writer, "{json}");
        let _ = writer.flush();
    }
}
