//! Producer thread: owns the microphone, waits for the wake word and records.

use super::events::{EventSink, ListenerEvent};
use super::messages::{QueueMessage, Utterance};
use super::recorder::{RecordEnd, StreamHandler, UtteranceRecorder};
use super::state::RunState;
use super::waiter::{WakeWordWaiter, AMBIENT_ADJUST_SECONDS};
use super::ListenerError;
use crate::audio::{AudioBackend, DeviceError, MuteFlag, MutableAudioSource, SourceSettings};
use crossbeam_channel::Sender;
use std::sync::Arc;

pub struct AudioProducer {
    pub(crate) backend: Arc<dyn AudioBackend>,
    pub(crate) source_settings: SourceSettings,
    pub(crate) mute: MuteFlag,
    pub(crate) waiter: WakeWordWaiter,
    pub(crate) recorder: UtteranceRecorder,
    pub(crate) state: Arc<RunState>,
    pub(crate) queue: Sender<QueueMessage>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) max_restarts: u32,
    pub(crate) stream_utterances: bool,
}

impl AudioProducer {
    /// Run until the loop stops or device faults exceed the restart bound.
    ///
    /// The source is built here so the device stream never leaves this thread.
    pub fn run(mut self) -> Result<(), ListenerError> {
        let mut source = MutableAudioSource::new(
            self.backend.clone(),
            self.source_settings.clone(),
            self.mute.clone(),
            self.state.running_flag(),
        );
        let result = self.run_with(&mut source);
        self.waiter.stop();
        source.close();
        tracing::debug!(ok = result.is_ok(), "producer stopped");
        result
    }

    fn run_with(&mut self, source: &mut MutableAudioSource) -> Result<(), ListenerError> {
        match source.open_with_retry() {
            Ok(()) => {}
            Err(DeviceError::Interrupted) => return Ok(()),
            Err(err) => return Err(self.fail(err)),
        }

        let mut restart_attempts: u32 = 0;
        while self.state.is_running() {
            match self.listen(source) {
                Ok(utterance) => {
                    restart_attempts = 0;
                    if let Some(utterance) = utterance {
                        if self.queue.send(QueueMessage::AudioReady(utterance)).is_err() {
                            tracing::warn!("consumer gone; dropping utterance");
                        }
                    }
                }
                Err(err) if !err.is_recoverable() => break,
                Err(err) if restart_attempts < self.max_restarts => {
                    restart_attempts += 1;
                    tracing::warn!(
                        error = %err,
                        attempt = restart_attempts,
                        max = self.max_restarts,
                        "audio fault; restarting the microphone"
                    );
                    match source.restart() {
                        Ok(()) => tracing::info!("microphone restarted"),
                        Err(DeviceError::Interrupted) => break,
                        Err(err) => tracing::warn!(error = %err, "microphone restart failed"),
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "restarting the mic doesn't seem to work; stopping");
                    return Err(self.fail(err));
                }
            }
        }
        Ok(())
    }

    /// One wake word wait plus recording. `None` when nothing should be queued.
    fn listen(&mut self, source: &mut MutableAudioSource) -> Result<Option<Utterance>, DeviceError> {
        self.state.clear_stop_recording();
        self.waiter
            .adjust_for_ambient_noise(source, AMBIENT_ADJUST_SECONDS)?;

        tracing::debug!("waiting for wake word");
        let wake = self.waiter.wait(source, &self.state, self.events.as_ref())?;
        if wake.stopped {
            return Ok(None);
        }
        let pre_roll = if wake.found {
            self.events.emit(ListenerEvent::WakeWord {
                hotword: self.waiter.key_phrase().to_string(),
                engine: self.waiter.engine_module().to_string(),
            });
            wake.trailing_chunks
        } else {
            Vec::new()
        };

        self.events.emit(ListenerEvent::RecordBegin);
        let stream = self
            .stream_utterances
            .then(|| StreamHandler::new(self.queue.clone()));
        let recorded = self
            .recorder
            .record(source, &self.state, &pre_roll, stream.as_ref());
        self.events.emit(ListenerEvent::RecordEnd);
        let outcome = recorded?;

        if outcome.end == RecordEnd::Stopped && !self.state.is_running() {
            return Ok(None);
        }
        if outcome.audio.is_empty() {
            tracing::warn!("audio contains no data");
            return Ok(None);
        }
        Ok(Some(Utterance::new(
            outcome.audio,
            self.source_settings.format.sample_rate,
        )))
    }

    fn fail(&self, err: DeviceError) -> ListenerError {
        let message = err.to_string();
        self.events.emit(ListenerEvent::Error {
            message: message.clone(),
            fatal: true,
        });
        self.state.fail(message);
        ListenerError::Device(err)
    }
}
