//! Scripted devices, engines and sinks shared by unit tests.

use crate::audio::{
    ActiveStream, AudioBackend, ChunkSink, ChunkStream, DeviceError, DeviceSelection, MuteFlag,
    StreamFormat,
};
use crate::listener::{EventSink, ListenerEvent, Utterance};
use crate::lock::lock_or_recover;
use crate::stt::{SpeechToText, SttError};
use crate::wake::{expected_duration, WakeWordEngine};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const FEED_STEP: Duration = Duration::from_millis(1);

/// Square wave at `amplitude`: rms and debiased energy both equal it.
pub(crate) fn tone(amplitude: i16, samples: usize) -> Vec<u8> {
    (0..samples)
        .flat_map(|i| {
            let value = if i % 2 == 0 { amplitude } else { -amplitude };
            value.to_le_bytes()
        })
        .collect()
}

pub(crate) fn quiet(samples: usize) -> Vec<u8> {
    vec![0; samples * 2]
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Chunk(Vec<u8>),
    Fault(DeviceError),
}

/// What the device does once its script runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterScript {
    Silence,
    Stall,
}

/// Backend whose streams replay a shared script from a feeder thread.
///
/// Reopening continues where the previous stream stopped, so restarts can be
/// scripted as one sequence.
pub(crate) struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Step>>>,
    after: AfterScript,
    pace: Duration,
    opens: Arc<AtomicUsize>,
    failing_opens: AtomicUsize,
    paused: Arc<AtomicBool>,
    flooding: bool,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    devices: Mutex<Vec<DeviceSelection>>,
}

impl ScriptedBackend {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>, after: AfterScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            after,
            pace: FEED_STEP,
            opens: Arc::new(AtomicUsize::new(0)),
            failing_opens: AtomicUsize::new(0),
            paused: Arc::new(AtomicBool::new(false)),
            flooding: false,
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Keep delivering into a full queue, like a device whose reader lags.
    pub(crate) fn flooding(mut self) -> Self {
        self.flooding = true;
        self
    }

    /// Replay chunks at the rate a real device would.
    pub(crate) fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub(crate) fn failing_first_opens(self, count: usize) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn push(&self, step: Step) {
        lock_or_recover(&self.script, "scripted_backend").push_back(step);
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet dropped.
    pub(crate) fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most streams ever open at the same time.
    pub(crate) fn max_live_streams(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Device selection passed to every successful open, in order.
    pub(crate) fn devices(&self) -> Vec<DeviceSelection> {
        lock_or_recover(&self.devices, "scripted_backend").clone()
    }
}

struct ScriptedStream {
    paused: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ActiveStream for ScriptedStream {
    fn pause(&mut self) -> Result<(), DeviceError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl AudioBackend for ScriptedBackend {
    fn open(
        &self,
        device: &DeviceSelection,
        format: &StreamFormat,
        sink: ChunkSink,
    ) -> Result<Box<dyn ActiveStream>, DeviceError> {
        let failing = self.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(DeviceError::Open("scripted open failure".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        lock_or_recover(&self.devices, "scripted_backend").push(device.clone());
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let script = self.script.clone();
        let paused = self.paused.clone();
        let after = self.after;
        let pace = self.pace;
        let flooding = self.flooding;
        let chunk_bytes = format.chunk_bytes();
        thread::spawn(move || {
            let mut faulted = false;
            while !sink.is_closed() {
                if faulted || paused.load(Ordering::SeqCst) || (!flooding && sink.is_full()) {
                    thread::sleep(FEED_STEP);
                    continue;
                }
                let step = lock_or_recover(&script, "scripted_backend").pop_front();
                match step {
                    Some(Step::Chunk(chunk)) => {
                        sink.deliver(chunk);
                    }
                    Some(Step::Fault(fault)) => {
                        // Keep the sink alive so the reader sees the fault
                        // rather than a disconnect.
                        sink.fail(fault);
                        faulted = true;
                    }
                    None if after == AfterScript::Silence => {
                        sink.deliver(vec![0; chunk_bytes]);
                    }
                    None => {
                        thread::sleep(FEED_STEP);
                        continue;
                    }
                }
                thread::sleep(pace);
            }
        });
        Ok(Box::new(ScriptedStream {
            paused: self.paused.clone(),
            live: self.live.clone(),
        }))
    }

    fn describe(&self) -> String {
        "scripted backend".to_string()
    }
}

type ReadHook = Box<dyn FnMut()>;

/// In-memory chunk stream; runs hooks before chosen reads.
pub(crate) struct ScriptedChunks {
    chunks: VecDeque<Result<Vec<u8>, DeviceError>>,
    mute: MuteFlag,
    reads: usize,
    hooks: Vec<(usize, ReadHook)>,
}

impl ScriptedChunks {
    pub(crate) fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Ok).collect(),
            mute: MuteFlag::default(),
            reads: 0,
            hooks: Vec::new(),
        }
    }

    pub(crate) fn with_fault(mut self, fault: DeviceError) -> Self {
        self.chunks.push_back(Err(fault));
        self
    }

    pub(crate) fn with_mute(mut self, mute: MuteFlag) -> Self {
        self.mute = mute;
        self
    }

    /// Run `hook` right before read number `read` (1-based) returns.
    pub(crate) fn at_read(mut self, read: usize, hook: impl FnMut() + 'static) -> Self {
        self.hooks.push((read, Box::new(hook)));
        self
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads
    }

    pub(crate) fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl ChunkStream for ScriptedChunks {
    fn next_chunk(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.reads += 1;
        let reads = self.reads;
        for (_, hook) in self.hooks.iter_mut().filter(|(at, _)| *at == reads) {
            hook();
        }
        self.chunks
            .pop_front()
            .unwrap_or(Err(DeviceError::Disconnected))
    }

    fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }
}

/// Wake engine that reports one detection once it has seen `fire_after`
/// chunks.
pub(crate) struct ScriptedWakeEngine {
    phrase: String,
    fire_after: Option<usize>,
    updates: Arc<AtomicUsize>,
    pending: usize,
    fired: bool,
    stopped: Arc<AtomicBool>,
}

impl ScriptedWakeEngine {
    pub(crate) fn new(phrase: &str, fire_after: Option<usize>) -> Self {
        Self {
            phrase: phrase.to_string(),
            fire_after,
            updates: Arc::new(AtomicUsize::new(0)),
            pending: 0,
            fired: false,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn updates(&self) -> Arc<AtomicUsize> {
        self.updates.clone()
    }

    pub(crate) fn stopped(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }
}

impl WakeWordEngine for ScriptedWakeEngine {
    fn key_phrase(&self) -> &str {
        &self.phrase
    }

    fn expected_duration(&self) -> Duration {
        expected_duration(&self.phrase, Duration::from_millis(120))
    }

    fn update(&mut self, _chunk: &[u8]) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.pending += 1;
    }

    fn found_wake_word(&mut self, _frame_data: &[u8]) -> bool {
        match self.fire_after {
            Some(limit) if !self.fired && self.pending >= limit => {
                self.fired = true;
                true
            }
            _ => false,
        }
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// STT double that replays canned results and records what it was given.
pub(crate) struct RecordingStt {
    results: VecDeque<Result<Option<String>, SttError>>,
    executed: Arc<Mutex<Vec<usize>>>,
    stream_text: Option<String>,
    streamed_bytes: Arc<Mutex<usize>>,
}

impl RecordingStt {
    pub(crate) fn new(results: Vec<Result<Option<String>, SttError>>) -> Self {
        Self {
            results: results.into(),
            executed: Arc::new(Mutex::new(Vec::new())),
            stream_text: None,
            streamed_bytes: Arc::new(Mutex::new(0)),
        }
    }

    /// Accept streamed audio and answer `text` when the stream stops.
    pub(crate) fn streaming(mut self, text: &str) -> Self {
        self.stream_text = Some(text.to_string());
        self
    }

    pub(crate) fn with_log(mut self, executed: Arc<Mutex<Vec<usize>>>) -> Self {
        self.executed = executed;
        self
    }

    /// Byte lengths of every utterance passed to `execute`.
    pub(crate) fn executed(&self) -> Arc<Mutex<Vec<usize>>> {
        self.executed.clone()
    }

    pub(crate) fn streamed_bytes(&self) -> Arc<Mutex<usize>> {
        self.streamed_bytes.clone()
    }
}

impl SpeechToText for RecordingStt {
    fn lang(&self) -> &str {
        "en-US"
    }

    fn can_stream(&self) -> bool {
        self.stream_text.is_some()
    }

    fn execute(&mut self, utterance: &Utterance) -> Result<Option<String>, SttError> {
        lock_or_recover(&self.executed, "recording_stt").push(utterance.pcm_bytes.len());
        self.results.pop_front().unwrap_or(Ok(None))
    }

    fn stream_start(&mut self) -> Result<(), SttError> {
        *lock_or_recover(&self.streamed_bytes, "recording_stt") = 0;
        Ok(())
    }

    fn stream_data(&mut self, chunk: &[u8]) -> Result<(), SttError> {
        *lock_or_recover(&self.streamed_bytes, "recording_stt") += chunk.len();
        Ok(())
    }

    fn stream_stop(&mut self) -> Result<Option<String>, SttError> {
        Ok(self.stream_text.clone())
    }
}

#[derive(Debug, Default)]
pub(crate) struct CollectingSink {
    events: Mutex<Vec<ListenerEvent>>,
}

impl CollectingSink {
    pub(crate) fn events(&self) -> Vec<ListenerEvent> {
        lock_or_recover(&self.events, "collecting_sink").clone()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ListenerEvent::name).collect()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }

    /// Poll until `count(name) >= at_least` or the timeout passes.
    pub(crate) fn wait_for(&self, name: &str, at_least: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count(name) >= at_least {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: ListenerEvent) {
        lock_or_recover(&self.events, "collecting_sink").push(event);
    }
}
