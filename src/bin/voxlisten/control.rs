//! Line-delimited JSON commands read from stdin.
//!
//! Each line is an object such as `{"cmd": "mute"}`. Blank lines are ignored;
//! malformed lines are reported as non-fatal error events.

use serde::Deserialize;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use voxlisten::listener::{EventSink, ListenerEvent, ListenerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub(crate) enum Command {
    Mute,
    Unmute,
    ForceUnmute,
    Listen,
    StopRecording,
    Sleep,
    Wake,
    Reload,
    GetStatus,
    AudioOutputStart,
    AudioOutputEnd,
    Stop,
}

pub(crate) fn parse_command(line: &str) -> Result<Option<Command>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Apply one command. Returns `false` once the listener was asked to stop.
pub(crate) fn apply(command: Command, handle: &ListenerHandle, events: &dyn EventSink) -> bool {
    tracing::debug!(?command, "control command");
    match command {
        Command::Mute => handle.mute(),
        Command::Unmute => handle.unmute(),
        Command::ForceUnmute => handle.force_unmute(),
        Command::Listen => handle.trigger_listen(),
        Command::StopRecording => handle.stop_recording(),
        Command::Sleep => handle.sleep(),
        Command::Wake => handle.awaken(),
        Command::Reload => handle.request_reload(),
        Command::GetStatus => events.emit(status_event(handle)),
        Command::AudioOutputStart => handle.audio_output_started(),
        Command::AudioOutputEnd => handle.audio_output_ended(),
        Command::Stop => {
            handle.request_stop();
            return false;
        }
    }
    true
}

pub(crate) fn status_event(handle: &ListenerHandle) -> ListenerEvent {
    let level = handle.level();
    ListenerEvent::Status {
        state: handle.status().label().to_string(),
        muted: handle.is_muted(),
        sleeping: handle.is_sleeping(),
        energy: level.energy,
        threshold: level.threshold,
    }
}

/// Dispatch commands until EOF, a read error or a stop command.
pub(crate) fn run_commands<R: BufRead>(
    reader: R,
    handle: &ListenerHandle,
    events: &dyn EventSink,
) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "stdin read failed; ignoring further commands");
                return;
            }
        };
        match parse_command(&line) {
            Ok(Some(command)) => {
                if !apply(command, handle, events) {
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => events.emit(ListenerEvent::Error {
                message: format!("invalid command: {err}"),
                fatal: false,
            }),
        }
    }
    // EOF only ends command input; the listener keeps running.
    tracing::debug!("stdin closed");
}

pub(crate) fn spawn_command_reader(
    handle: ListenerHandle,
    events: Arc<dyn EventSink>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("voxlisten-commands".into())
        .spawn(move || run_commands(io::stdin().lock(), &handle, events.as_ref()))
}
