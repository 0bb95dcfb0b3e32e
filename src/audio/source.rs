//! Mutable microphone source: fixed-size chunks that can be muted, restarted
//! and interrupted without tearing down the caller's state.

use super::device::{
    ActiveStream, AudioBackend, ChunkSink, DeviceError, DeviceSelection, SinkShared, StreamFormat,
};
use super::pcm;
use crate::config::ListenerConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Chunks buffered between the device callback and the reader.
pub const SOURCE_QUEUE_DEPTH: usize = 8;

/// Longest a blocked read waits before re-checking shutdown and faults.
const READ_STEP: Duration = Duration::from_millis(100);
const BACKOFF_STEP: Duration = Duration::from_millis(50);

/// Anything that yields fixed-size PCM chunks.
pub trait ChunkStream {
    fn next_chunk(&mut self) -> Result<Vec<u8>, DeviceError>;
    fn is_muted(&self) -> bool;
}

/// Shared mute switch; cheap to clone across threads.
#[derive(Debug, Clone, Default)]
pub struct MuteFlag(Arc<AtomicBool>);

impl MuteFlag {
    pub fn new(muted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(muted)))
    }

    pub fn set(&self, muted: bool) {
        self.0.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub device: DeviceSelection,
    pub format: StreamFormat,
    pub queue_depth: usize,
    pub stall_timeout: Duration,
    pub open_attempts: u32,
    pub open_backoff: Duration,
}

impl SourceSettings {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            device: DeviceSelection::new(config.input_device.clone(), config.device_index),
            format: StreamFormat::new(config.sample_rate, config.frames_per_buffer),
            queue_depth: SOURCE_QUEUE_DEPTH,
            stall_timeout: config.device_stall(),
            open_attempts: config.mic_open_attempts.max(1),
            open_backoff: config.mic_open_backoff(),
        }
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.format.chunk_seconds())
    }
}

struct OpenStream {
    stream: Box<dyn ActiveStream>,
    receiver: Receiver<Vec<u8>>,
    shared: Arc<SinkShared>,
    paused: bool,
    reported_drops: usize,
}

/// Microphone wrapper owned by the producer thread.
///
/// While muted, reads pause the device, discard queued audio and return
/// silence paced at the chunk rate.
pub struct MutableAudioSource {
    backend: Arc<dyn AudioBackend>,
    settings: SourceSettings,
    mute: MuteFlag,
    running: Arc<AtomicBool>,
    open: Option<OpenStream>,
    leftover: Vec<u8>,
}

impl MutableAudioSource {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        settings: SourceSettings,
        mute: MuteFlag,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            settings,
            mute,
            running,
            open: None,
            leftover: Vec::new(),
        }
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn mute(&self) {
        self.mute.set(true);
    }

    pub fn unmute(&self) {
        self.mute.set(false);
    }

    /// Chunks discarded because the reader fell behind, since the last open.
    pub fn dropped_chunks(&self) -> usize {
        self.open
            .as_ref()
            .map(|open| open.shared.dropped())
            .unwrap_or(0)
    }

    /// Open the device once. A no-op when already open.
    pub fn open(&mut self) -> Result<(), DeviceError> {
        if self.open.is_some() {
            return Ok(());
        }
        let (sender, receiver) = bounded(self.settings.queue_depth.max(1));
        let shared = Arc::new(SinkShared::default());
        let sink = ChunkSink::new(sender, receiver.clone(), shared.clone());
        let mut stream = match self
            .backend
            .open(&self.settings.device, &self.settings.format, sink)
        {
            Ok(stream) => stream,
            Err(err) => {
                shared.close();
                return Err(err);
            }
        };
        let mut paused = false;
        if self.mute.is_muted() {
            stream.pause()?;
            paused = true;
        }
        tracing::info!(
            backend = %self.backend.describe(),
            device = %self.settings.device.describe(),
            muted = paused,
            "input opened"
        );
        self.open = Some(OpenStream {
            stream,
            receiver,
            shared,
            paused,
            reported_drops: 0,
        });
        Ok(())
    }

    /// Open with fixed backoff between attempts; shutdown aborts the wait.
    pub fn open_with_retry(&mut self) -> Result<(), DeviceError> {
        let attempts = self.settings.open_attempts.max(1);
        let mut last_err = DeviceError::Open("no attempts made".into());
        for attempt in 1..=attempts {
            if !self.running.load(Ordering::Acquire) {
                return Err(DeviceError::Interrupted);
            }
            match self.open() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(attempt, attempts, error = %err, "can't start mic");
                    last_err = err;
                }
            }
            if attempt < attempts {
                self.sleep_interruptibly(self.settings.open_backoff)?;
            }
        }
        Err(last_err)
    }

    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            open.shared.close();
            drop(open.stream);
            tracing::debug!(dropped = open.shared.dropped(), "input closed");
        }
        self.leftover.clear();
    }

    /// Close and reopen the device; the mute flag and chunk size carry over.
    pub fn restart(&mut self) -> Result<(), DeviceError> {
        tracing::info!("restarting the microphone");
        self.close();
        self.open_with_retry()
    }

    /// Read exactly `n` bytes, blocking until they are available.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, DeviceError> {
        while self.leftover.len() < n {
            let chunk = self.next_chunk()?;
            self.leftover.extend_from_slice(&chunk);
        }
        let rest = self.leftover.split_off(n);
        Ok(std::mem::replace(&mut self.leftover, rest))
    }

    fn muted_chunk(&mut self) -> Result<Vec<u8>, DeviceError> {
        if let Some(open) = self.open.as_mut() {
            if !open.paused {
                if let Err(err) = open.stream.pause() {
                    tracing::warn!(error = %err, "failed to pause input while muted");
                }
                open.paused = true;
            }
            while open.receiver.try_recv().is_ok() {}
        }
        self.leftover.clear();
        thread::sleep(self.settings.chunk_duration());
        Ok(pcm::silence(self.settings.format.chunk_bytes()))
    }

    fn sleep_interruptibly(&self, total: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + total;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return Err(DeviceError::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(BACKOFF_STEP.min(deadline - now));
        }
    }
}

impl ChunkStream for MutableAudioSource {
    fn next_chunk(&mut self) -> Result<Vec<u8>, DeviceError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(DeviceError::Interrupted);
        }
        if self.mute.is_muted() {
            return self.muted_chunk();
        }
        let Some(open) = self.open.as_mut() else {
            return Err(DeviceError::Disconnected);
        };
        if open.paused {
            open.stream.resume()?;
            open.paused = false;
        }
        // A full queue's worth of lost audio means the reader can't keep up.
        let dropped = open.shared.dropped().saturating_sub(open.reported_drops);
        if dropped >= self.settings.queue_depth.max(1) {
            open.reported_drops += dropped;
            return Err(DeviceError::Overflow { dropped });
        }
        let receiver = open.receiver.clone();
        let shared = open.shared.clone();
        let stall = self.settings.stall_timeout;
        let started = Instant::now();
        loop {
            if let Some(fault) = shared.take_fault() {
                return Err(fault);
            }
            if !self.running.load(Ordering::Acquire) {
                return Err(DeviceError::Interrupted);
            }
            if self.mute.is_muted() {
                return self.muted_chunk();
            }
            match receiver.recv_timeout(READ_STEP) {
                Ok(chunk) => return Ok(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    if started.elapsed() >= stall {
                        return Err(DeviceError::Stalled(stall.as_millis() as u64));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::Disconnected),
            }
        }
    }

    fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }
}

impl Drop for MutableAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}
