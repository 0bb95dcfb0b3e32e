//! VoxListen entrypoint: an always-on wake word listener.
//!
//! Listener events are printed to stdout as JSON lines and control commands
//! are read from stdin the same way.
//!
//! # Architecture
//!
//! - Producer thread: reads the microphone, waits for the wake word, records
//! - Consumer thread: transcribes utterances and emits events
//! - Command thread: applies stdin commands through a listener handle
//! - Main thread: owns the `ListenLoop` and hot-reloads its configuration

mod cli_utils;
mod control;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use voxlisten::audio::CpalBackend;
use voxlisten::config::{ConfigSource, JsonFileConfig, ListenerConfig, StaticConfig};
use voxlisten::listener::{
    EventSink, JsonLinesSink, ListenLoop, ListenerContext, ListenerError, ListenerEvent,
};
use voxlisten::logging::{init_logging, trace_log_path};

fn main() -> Result<()> {
    let mut config = ListenerConfig::parse();

    if config.list_input_devices {
        cli_utils::list_input_devices()?;
        return Ok(());
    }

    config.validate()?;
    init_logging(&config);
    tracing::info!(
        wake_word = %config.wake_word,
        module = %config.wake_word_module,
        stt = %config.stt_module,
        log = %trace_log_path().display(),
        "voxlisten starting"
    );

    let config_source: Arc<dyn ConfigSource> = match config.config_file.clone() {
        Some(path) => Arc::new(JsonFileConfig::new(config.clone(), path)),
        None => Arc::new(StaticConfig::new(config.clone())),
    };
    let events: Arc<dyn EventSink> = Arc::new(JsonLinesSink::stdout());
    let backend = Arc::new(CpalBackend::new());
    let ctx = ListenerContext::new(backend, events.clone());

    let mut listen = match ListenLoop::new(ctx, config_source) {
        Ok(listen) => listen,
        Err(err) => return Err(report_fatal(events.as_ref(), err)),
    };
    if let Err(err) = control::spawn_command_reader(listen.handle(), events.clone()) {
        tracing::warn!(error = %err, "failed to start command reader");
    }

    if let Err(err) = listen.run() {
        tracing::error!(error = %err, "listener stopped");
        // The loop already emitted its own fatal event.
        if !matches!(err, ListenerError::Fatal(_)) {
            return Err(report_fatal(events.as_ref(), err));
        }
        return Err(err.into());
    }
    tracing::info!("voxlisten stopped");
    Ok(())
}

fn report_fatal(events: &dyn EventSink, err: ListenerError) -> anyhow::Error {
    events.emit(ListenerEvent::Error {
        message: err.to_string(),
        fatal: true,
    });
    err.into()
}
