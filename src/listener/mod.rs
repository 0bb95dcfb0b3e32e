//! The always-on listen loop: a producer thread that waits for the wake word
//! and records, a consumer thread that transcribes, and the owner that wires
//! them together and reloads them when the configuration changes.

mod consumer;
mod control;
mod events;
mod messages;
mod producer;
mod recorder;
mod state;
#[cfg(test)]
mod tests;
mod waiter;

use crate::audio::DeviceError;
use crate::wake::WakeWordError;
use thiserror::Error;

pub use consumer::{AudioConsumer, MIN_AUDIO_SECONDS};
pub use control::{
    ControlRequest, ListenLoop, ListenerContext, ListenerHandle, ListenerStatus, SttFactory,
    CONFIG_POLL_INTERVAL,
};
pub use events::{ChannelSink, EventSink, JsonLinesSink, ListenerEvent};
pub use messages::{QueueMessage, Utterance};
pub use producer::AudioProducer;
pub use recorder::{RecordEnd, RecordOutcome, StreamHandler, UtteranceRecorder};
pub use state::{MuteControl, RunState};
pub use waiter::{
    WaiterSettings, WakeWordResult, WakeWordWaiter, AMBIENT_ADJUST_SECONDS, MIN_TEST_SECONDS,
    SEC_BETWEEN_WW_CHECKS, SILENCE_SEC, TRAILING_CHUNKS,
};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Engine(#[from] WakeWordError),
    #[error("invalid listener configuration: {0}")]
    Config(String),
    #[error("listener stopped: {0}")]
    Fatal(String),
}
