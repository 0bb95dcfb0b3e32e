//! The listen loop: builds the pipeline, runs both threads and applies
//! control requests and configuration reloads.

use super::consumer::AudioConsumer;
use super::events::{EventSink, ListenerEvent};
use super::messages::QueueMessage;
use super::producer::AudioProducer;
use super::recorder::UtteranceRecorder;
use super::state::{MuteControl, RunState};
use super::waiter::{WaiterSettings, WakeWordWaiter};
use super::ListenerError;
use crate::audio::{AudioBackend, SourceSettings, VoiceActivityDetector};
use crate::config::{config_hash, ConfigSource, ListenerConfig};
use crate::diagnostics::{noop_watchdog, LevelMeter, LevelSnapshot, Watchdog};
use crate::lock::lock_or_recover;
use crate::stt::{create_stt, SpeechToText};
use crate::wake::{WakeWordRegistry, WakeWordSpec};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long `run` waits for a control request before polling the config.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub type SttFactory =
    Arc<dyn Fn(&ListenerConfig) -> anyhow::Result<Box<dyn SpeechToText>> + Send + Sync>;

/// Collaborators shared by every generation of the loop.
#[derive(Clone)]
pub struct ListenerContext {
    pub backend: Arc<dyn AudioBackend>,
    pub registry: WakeWordRegistry,
    pub stt_factory: SttFactory,
    pub events: Arc<dyn EventSink>,
    pub watchdog: Watchdog,
}

impl ListenerContext {
    pub fn new(backend: Arc<dyn AudioBackend>, events: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            registry: WakeWordRegistry::with_builtins(),
            stt_factory: Arc::new(create_stt),
            events,
            watchdog: noop_watchdog(),
        }
    }

    pub fn with_registry(mut self, registry: WakeWordRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_stt_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ListenerConfig) -> anyhow::Result<Box<dyn SpeechToText>> + Send + Sync + 'static,
    {
        self.stt_factory = Arc::new(factory);
        self
    }

    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = watchdog;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    Stopped,
    Running,
    Sleeping,
    Failed(String),
}

impl ListenerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ListenerStatus::Stopped => "stopped",
            ListenerStatus::Running => "running",
            ListenerStatus::Sleeping => "sleeping",
            ListenerStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Reload,
    Stop,
    /// Sent by the producer when it exits on a fatal fault.
    ProducerFailed,
}

#[derive(Debug, Default)]
struct Shared {
    state: Arc<RunState>,
    mute: MuteControl,
    meter: Mutex<LevelMeter>,
    mute_during_output: AtomicBool,
    output_muted: AtomicBool,
    started: AtomicBool,
}

impl Shared {
    fn status(&self) -> ListenerStatus {
        if let Some(message) = self.state.fatal_error() {
            return ListenerStatus::Failed(message);
        }
        if !self.started.load(Ordering::Acquire) || !self.state.is_running() {
            return ListenerStatus::Stopped;
        }
        if self.state.is_sleeping() {
            ListenerStatus::Sleeping
        } else {
            ListenerStatus::Running
        }
    }
}

/// Cloneable control surface for other threads.
#[derive(Clone)]
pub struct ListenerHandle {
    shared: Arc<Shared>,
    control: Sender<ControlRequest>,
}

impl ListenerHandle {
    pub fn mute(&self) {
        self.shared.mute.mute();
    }

    pub fn unmute(&self) {
        self.shared.mute.unmute();
    }

    pub fn force_unmute(&self) {
        self.shared.mute.force_unmute();
        self.shared.output_muted.store(false, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.mute.is_muted()
    }

    pub fn sleep(&self) {
        self.shared.state.set_sleeping(true);
    }

    pub fn awaken(&self) {
        self.shared.state.set_sleeping(false);
    }

    pub fn is_sleeping(&self) -> bool {
        self.shared.state.is_sleeping()
    }

    /// Start recording without waiting for the wake word.
    pub fn trigger_listen(&self) {
        self.shared.state.trigger_listen();
    }

    /// End the current recording early.
    pub fn stop_recording(&self) {
        self.shared.state.request_stop_recording();
    }

    pub fn request_reload(&self) {
        let _ = self.control.send(ControlRequest::Reload);
    }

    pub fn request_stop(&self) {
        let _ = self.control.send(ControlRequest::Stop);
    }

    /// Audio playback started; mutes when `mute_during_output` is set.
    pub fn audio_output_started(&self) {
        if self.shared.mute_during_output.load(Ordering::Acquire)
            && !self.shared.output_muted.swap(true, Ordering::AcqRel)
        {
            self.shared.mute.mute();
        }
    }

    pub fn audio_output_ended(&self) {
        if self.shared.output_muted.swap(false, Ordering::AcqRel) {
            self.shared.mute.unmute();
        }
    }

    pub fn status(&self) -> ListenerStatus {
        self.shared.status()
    }

    pub fn level(&self) -> LevelSnapshot {
        lock_or_recover(&self.shared.meter, "level_meter").snapshot()
    }
}

/// Everything one generation of the loop needs, built before any thread
/// is touched so a bad configuration leaves the running loop alone.
struct Components {
    waiter: WakeWordWaiter,
    recorder: UtteranceRecorder,
    stt: Box<dyn SpeechToText>,
    source_settings: SourceSettings,
    meter: LevelMeter,
    reload_requested: bool,
}

struct Workers {
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Owns the producer and consumer threads.
pub struct ListenLoop {
    ctx: ListenerContext,
    config_source: Arc<dyn ConfigSource>,
    config: ListenerConfig,
    config_hash: u64,
    rejected_hash: Option<u64>,
    shared: Arc<Shared>,
    workers: Option<Workers>,
    control_tx: Sender<ControlRequest>,
    control_rx: Receiver<ControlRequest>,
    pending_reload: bool,
    generation: u64,
}

impl ListenLoop {
    pub fn new(ctx: ListenerContext, config_source: Arc<dyn ConfigSource>) -> Result<Self, ListenerError> {
        let config = config_source
            .load()
            .map_err(|err| ListenerError::Config(format!("{err:#}")))?;
        let (control_tx, control_rx) = unbounded();
        let shared = Arc::new(Shared::default());
        shared
            .mute_during_output
            .store(config.mute_during_output, Ordering::Release);
        Ok(Self {
            ctx,
            config_source,
            config_hash: config_hash(&config),
            config,
            rejected_hash: None,
            shared,
            workers: None,
            control_tx,
            control_rx,
            pending_reload: false,
            generation: 0,
        })
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            shared: self.shared.clone(),
            control: self.control_tx.clone(),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Number of times the threads have been (re)started.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some() && self.shared.state.is_running()
    }

    pub fn status(&self) -> ListenerStatus {
        self.shared.status()
    }

    pub fn start(&mut self) -> Result<(), ListenerError> {
        if self.workers.is_some() {
            return Ok(());
        }
        let components = self.build_components(&self.config)?;
        self.spawn(components)
    }

    /// Stop both threads and wait for them to exit.
    pub fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        tracing::debug!(generation = self.generation, "stopping listener threads");
        self.shared.state.signal_stop();
        if workers.producer.join().is_err() {
            tracing::error!("producer thread panicked");
        }
        if workers.consumer.join().is_err() {
            tracing::error!("consumer thread panicked");
        }
        self.shared.started.store(false, Ordering::Release);
    }

    /// Reload from the configuration source.
    pub fn reload(&mut self) -> Result<(), ListenerError> {
        let config = self
            .config_source
            .load()
            .map_err(|err| ListenerError::Config(format!("{err:#}")))?;
        self.reload_with(config)
    }

    /// Rebuild the pipeline with `config`. If construction fails the old
    /// threads keep running.
    pub fn reload_with(&mut self, config: ListenerConfig) -> Result<(), ListenerError> {
        let was_started = self.workers.is_some();
        let components = if was_started {
            Some(self.build_components(&config)?)
        } else {
            None
        };
        tracing::info!(generation = self.generation, "reloading listener");
        self.stop();
        self.config_hash = config_hash(&config);
        self.rejected_hash = None;
        self.config = config;
        match components {
            Some(components) => self.spawn(components),
            None => Ok(()),
        }
    }

    /// Start the loop and block until stopped. Returns the fatal error if the
    /// producer gave up.
    pub fn run(&mut self) -> Result<(), ListenerError> {
        self.start()?;
        loop {
            if let Some(message) = self.shared.state.fatal_error() {
                self.stop();
                return Err(ListenerError::Fatal(message));
            }
            if std::mem::take(&mut self.pending_reload) {
                self.reload_or_report();
            }
            match self.control_rx.recv_timeout(CONFIG_POLL_INTERVAL) {
                Ok(ControlRequest::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    self.stop();
                    return Ok(());
                }
                Ok(ControlRequest::Reload) => self.reload_or_report(),
                Ok(ControlRequest::ProducerFailed) => continue,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.poll_config();
        }
    }

    /// Reload when the configuration source reports a different hash.
    pub fn poll_config(&mut self) {
        let config = match self.config_source.load() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "config poll failed");
                return;
            }
        };
        let hash = config_hash(&config);
        if hash == self.config_hash || Some(hash) == self.rejected_hash {
            return;
        }
        tracing::info!("configuration changed; reloading listener");
        if let Err(err) = self.reload_with(config) {
            self.rejected_hash = Some(hash);
            self.report_reload_error(&err);
        }
    }

    fn reload_or_report(&mut self) {
        if let Err(err) = self.reload() {
            self.report_reload_error(&err);
        }
    }

    fn report_reload_error(&self, err: &ListenerError) {
        tracing::warn!(error = %err, "reload failed; keeping previous listener");
        self.ctx.events.emit(ListenerEvent::Error {
            message: err.to_string(),
            fatal: false,
        });
    }

    fn build_components(&self, config: &ListenerConfig) -> Result<Components, ListenerError> {
        let meter = LevelMeter::new(config.mic_level_file.clone());
        let selection = self.ctx.registry.create(&WakeWordSpec::wake_word(config))?;
        let mut reload_requested = selection.reload_requested;
        let mut waiter = WakeWordWaiter::new(
            WaiterSettings::from_config(config),
            selection.engine,
            selection.module,
            meter.clone(),
            self.ctx.watchdog.clone(),
        );
        if let Some(spec) = WakeWordSpec::stand_up_word(config) {
            let stand_up = self.ctx.registry.create(&spec)?;
            reload_requested |= stand_up.reload_requested;
            waiter = waiter.with_stand_up(stand_up.engine);
        }
        let recorder = UtteranceRecorder::new(
            VoiceActivityDetector::from_config(config),
            meter.clone(),
            self.ctx.watchdog.clone(),
        );
        let stt = (self.ctx.stt_factory)(config)
            .map_err(|err| ListenerError::Config(format!("{err:#}")))?;
        Ok(Components {
            waiter,
            recorder,
            stt,
            source_settings: SourceSettings::from_config(config),
            meter,
            reload_requested,
        })
    }

    fn spawn(&mut self, components: Components) -> Result<(), ListenerError> {
        let Components {
            waiter,
            recorder,
            stt,
            source_settings,
            meter,
            reload_requested,
        } = components;
        *lock_or_recover(&self.shared.meter, "level_meter") = meter;
        self.shared
            .mute_during_output
            .store(self.config.mute_during_output, Ordering::Release);
        self.pending_reload |= reload_requested;

        let (queue_tx, queue_rx) = unbounded::<QueueMessage>();
        let producer = AudioProducer {
            backend: self.ctx.backend.clone(),
            source_settings,
            mute: self.shared.mute.flag(),
            waiter,
            recorder,
            state: self.shared.state.clone(),
            queue: queue_tx,
            events: self.ctx.events.clone(),
            max_restarts: self.config.max_mic_restarts,
            stream_utterances: stt.can_stream(),
        };
        let consumer = AudioConsumer::new(
            self.shared.state.clone(),
            queue_rx,
            stt,
            self.ctx.events.clone(),
        );

        self.shared.state.begin_run();
        self.shared.started.store(true, Ordering::Release);
        let control = self.control_tx.clone();
        let producer = thread::Builder::new()
            .name("voxlisten-producer".into())
            .spawn(move || {
                if let Err(err) = producer.run() {
                    tracing::error!(error = %err, "audio producer stopped");
                    let _ = control.send(ControlRequest::ProducerFailed);
                }
            })
            .map_err(|err| self.abort_spawn(format!("failed to spawn producer: {err}")))?;
        let consumer = match thread::Builder::new()
            .name("voxlisten-consumer".into())
            .spawn(move || consumer.run())
        {
            Ok(consumer) => consumer,
            Err(err) => {
                let error = self.abort_spawn(format!("failed to spawn consumer: {err}"));
                let _ = producer.join();
                return Err(error);
            }
        };
        self.generation += 1;
        self.workers = Some(Workers { producer, consumer });
        tracing::info!(generation = self.generation, "listener started");
        Ok(())
    }

    fn abort_spawn(&self, message: String) -> ListenerError {
        self.shared.state.signal_stop();
        self.shared.started.store(false, Ordering::Release);
        ListenerError::Config(message)
    }
}

impl Drop for ListenLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
