//! State shared between the loop owner and the producer/consumer threads.

use crate::audio::MuteFlag;
use crate::lock::lock_or_recover;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Run flags for one listen loop. Lives across reloads; `start` and `stop`
/// reset the per-run signals.
#[derive(Debug, Default)]
pub struct RunState {
    running: Arc<AtomicBool>,
    sleeping: AtomicBool,
    stop_signaled: AtomicBool,
    stop_recording: AtomicBool,
    listen_triggered: AtomicBool,
    fatal: Mutex<Option<String>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag handed to blocking reads so they can bail out on shutdown.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark a new run as started and clear stop signals from the last one.
    pub fn begin_run(&self) {
        self.stop_signaled.store(false, Ordering::Release);
        self.stop_recording.store(false, Ordering::Release);
        *lock_or_recover(&self.fatal, "run_state_fatal") = None;
        self.running.store(true, Ordering::Release);
    }

    /// Cooperative shutdown: waits and recordings return at the next chunk.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop_signaled.store(true, Ordering::Release);
        self.stop_recording.store(true, Ordering::Release);
    }

    pub fn stop_signaled(&self) -> bool {
        self.stop_signaled.load(Ordering::Acquire)
    }

    pub fn stop_recording_requested(&self) -> bool {
        self.stop_recording.load(Ordering::Acquire)
    }

    /// End the current recording without stopping the loop.
    pub fn request_stop_recording(&self) {
        self.stop_recording.store(true, Ordering::Release);
    }

    pub fn clear_stop_recording(&self) {
        self.stop_recording.store(false, Ordering::Release);
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Acquire)
    }

    pub fn set_sleeping(&self, sleeping: bool) {
        self.sleeping.store(sleeping, Ordering::Release);
    }

    /// Skip the next wake word wait.
    pub fn trigger_listen(&self) {
        self.listen_triggered.store(true, Ordering::Release);
    }

    pub fn listen_triggered(&self) -> bool {
        self.listen_triggered.load(Ordering::Acquire)
    }

    /// Consume a pending listen trigger.
    pub fn take_listen_trigger(&self) -> bool {
        self.listen_triggered.swap(false, Ordering::AcqRel)
    }

    /// Record why the producer gave up and stop the run.
    pub fn fail(&self, message: impl Into<String>) {
        let mut slot = lock_or_recover(&self.fatal, "run_state_fatal");
        if slot.is_none() {
            *slot = Some(message.into());
        }
        drop(slot);
        self.running.store(false, Ordering::Release);
    }

    pub fn fatal_error(&self) -> Option<String> {
        lock_or_recover(&self.fatal, "run_state_fatal").clone()
    }
}

/// Reference-counted microphone mute.
///
/// The mic is muted while more `mute` than `unmute` calls have been made;
/// `force_unmute` clears every outstanding request.
#[derive(Debug, Default)]
pub struct MuteControl {
    calls: Mutex<u32>,
    flag: MuteFlag,
}

impl MuteControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mute(&self) {
        let mut calls = lock_or_recover(&self.calls, "mute_calls");
        *calls = calls.saturating_add(1);
        self.flag.set(true);
    }

    pub fn unmute(&self) {
        let mut calls = lock_or_recover(&self.calls, "mute_calls");
        *calls = calls.saturating_sub(1);
        if *calls == 0 {
            self.flag.set(false);
        }
    }

    pub fn force_unmute(&self) {
        let mut calls = lock_or_recover(&self.calls, "mute_calls");
        *calls = 0;
        self.flag.set(false);
    }

    pub fn is_muted(&self) -> bool {
        *lock_or_recover(&self.calls, "mute_calls") > 0
    }

    pub fn mute_calls(&self) -> u32 {
        *lock_or_recover(&self.calls, "mute_calls")
    }

    /// Flag consulted by the audio source on every read.
    pub fn flag(&self) -> MuteFlag {
        self.flag.clone()
    }
}
