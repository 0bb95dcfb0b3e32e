//! Backend-neutral device contract between the capture callback and the source.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::lock::lock_or_recover;

/// Device faults surfaced by [`super::MutableAudioSource`] reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("failed to open input device: {0}")]
    Open(String),
    #[error("input stream error: {0}")]
    Stream(String),
    #[error("input overflowed ({dropped} chunks dropped)")]
    Overflow { dropped: usize },
    #[error("input device delivered no audio for {0} ms")]
    Stalled(u64),
    #[error("input stream disconnected")]
    Disconnected,
    #[error("read interrupted by shutdown")]
    Interrupted,
}

impl DeviceError {
    /// Faults that a restart of the device may clear.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DeviceError::Interrupted)
    }
}

/// PCM layout requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub frames_per_buffer: usize,
    pub sample_width: usize,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, frames_per_buffer: usize) -> Self {
        Self {
            sample_rate,
            frames_per_buffer,
            sample_width: super::SAMPLE_WIDTH,
        }
    }

    pub fn chunk_bytes(&self) -> usize {
        self.frames_per_buffer * self.sample_width
    }

    pub fn chunk_seconds(&self) -> f64 {
        self.frames_per_buffer as f64 / f64::from(self.sample_rate.max(1))
    }
}

/// Which input device to open. Index wins over name; neither means the
/// host default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub name: Option<String>,
    pub index: Option<usize>,
}

impl DeviceSelection {
    pub fn new(name: Option<String>, index: Option<usize>) -> Self {
        Self { name, index }
    }

    pub fn describe(&self) -> String {
        match (&self.index, &self.name) {
            (Some(index), _) => format!("input #{index}"),
            (None, Some(name)) => format!("input '{name}'"),
            (None, None) => "default input".to_string(),
        }
    }
}

/// Opens input streams. Implementations must be shareable across reloads;
/// the device is chosen per open so a reload can switch microphones.
pub trait AudioBackend: Send + Sync {
    /// Start a stream that pushes `format.chunk_bytes()` sized chunks into `sink`.
    fn open(
        &self,
        device: &DeviceSelection,
        format: &StreamFormat,
        sink: ChunkSink,
    ) -> Result<Box<dyn ActiveStream>, DeviceError>;

    fn describe(&self) -> String {
        "audio backend".to_string()
    }
}

/// A running input stream; dropping it closes the device.
pub trait ActiveStream {
    fn pause(&mut self) -> Result<(), DeviceError>;
    fn resume(&mut self) -> Result<(), DeviceError>;
}

#[derive(Debug, Default)]
pub(crate) struct SinkShared {
    dropped: AtomicUsize,
    delivered: AtomicU64,
    closed: AtomicBool,
    fault: Mutex<Option<DeviceError>>,
}

impl SinkShared {
    pub(crate) fn take_fault(&self) -> Option<DeviceError> {
        lock_or_recover(&self.fault, "sink_fault").take()
    }

    /// Mark the reader as gone; later deliveries are refused.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Producer half of the bounded chunk queue handed to a device callback.
///
/// When the queue is full the oldest chunk is discarded so the reader always
/// sees the freshest audio.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    sender: Sender<Vec<u8>>,
    evict: Receiver<Vec<u8>>,
    shared: Arc<SinkShared>,
}

impl ChunkSink {
    pub(crate) fn new(
        sender: Sender<Vec<u8>>,
        evict: Receiver<Vec<u8>>,
        shared: Arc<SinkShared>,
    ) -> Self {
        Self {
            sender,
            evict,
            shared,
        }
    }

    /// Queue a chunk. Returns `false` once the reader is gone.
    pub fn deliver(&self, chunk: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut pending = chunk;
        loop {
            match self.sender.try_send(pending) {
                Ok(()) => {
                    self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(TrySendError::Full(returned)) => {
                    if self.evict.try_recv().is_ok() {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = returned;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Latch a fault for the reader. The first fault wins until it is consumed.
    pub fn fail(&self, fault: DeviceError) {
        let mut slot = lock_or_recover(&self.shared.fault, "sink_fault");
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    pub fn is_full(&self) -> bool {
        self.sender.is_full()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
