//! System microphone capture via CPAL.
//!
//! Handles device selection, sample format conversion and rate normalization.
//! Every stream is delivered as mono 16-bit PCM chunks at the requested rate.

use super::device::{
    ActiveStream, AudioBackend, ChunkSink, DeviceError, DeviceSelection, StreamFormat,
};
use super::dispatch::FrameDispatcher;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::{Arc, Mutex};

/// List microphone names so the CLI can expose a human-friendly selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Opens the default host's input devices, pinned by name or index per open.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn resolve_device(selection: &DeviceSelection) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    if selection.name.is_none() && selection.index.is_none() {
        return host
            .default_input_device()
            .ok_or_else(|| DeviceError::Open("no default input device available".into()));
    }
    let devices = host
        .input_devices()
        .map_err(|err| DeviceError::Open(format!("no input devices available: {err}")))?;
    let mut devices = devices.enumerate();
    if let Some(index) = selection.index {
        return devices
            .find(|(position, _)| *position == index)
            .map(|(_, device)| device)
            .ok_or_else(|| DeviceError::Open(format!("input device #{index} not found")));
    }
    let name = selection.name.as_deref().unwrap_or_default();
    devices
        .find(|(_, device)| device.name().map(|n| n == name).unwrap_or(false))
        .map(|(_, device)| device)
        .ok_or_else(|| DeviceError::Open(format!("input device '{name}' not found")))
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        selection: &DeviceSelection,
        format: &StreamFormat,
        sink: ChunkSink,
    ) -> Result<Box<dyn ActiveStream>, DeviceError> {
        let device = resolve_device(selection)?;
        let default_config = device
            .default_input_config()
            .map_err(|err| DeviceError::Open(format!("{err}; {}", mic_permission_hint())))?;
        let sample_format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        tracing::debug!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            ?sample_format,
            device_rate,
            channels,
            target_rate = format.sample_rate,
            "opening input stream"
        );

        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            device_rate,
            format.sample_rate,
            format.frames_per_buffer,
            sink.clone(),
        )));
        let err_sink = sink.clone();
        let err_fn = move |err: cpal::StreamError| {
            tracing::warn!(error = %err, "audio stream error");
            let fault = match err {
                cpal::StreamError::DeviceNotAvailable => DeviceError::Disconnected,
                other => DeviceError::Stream(other.to_string()),
            };
            err_sink.fail(fault);
        };

        let build_err = |err: cpal::BuildStreamError| DeviceError::Open(err.to_string());
        let stream = match sample_format {
            SampleFormat::F32 => {
                let dispatcher = dispatcher.clone();
                device
                    .build_input_stream(
                        &device_config,
                        move |data: &[f32], _| {
                            if let Ok(mut pump) = dispatcher.try_lock() {
                                pump.push(data, channels, |sample| sample);
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(build_err)?
            }
            SampleFormat::I16 => {
                let dispatcher = dispatcher.clone();
                device
                    .build_input_stream(
                        &device_config,
                        move |data: &[i16], _| {
                            if let Ok(mut pump) = dispatcher.try_lock() {
                                pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(build_err)?
            }
            SampleFormat::U16 => {
                let dispatcher = dispatcher.clone();
                device
                    .build_input_stream(
                        &device_config,
                        move |data: &[u16], _| {
                            if let Ok(mut pump) = dispatcher.try_lock() {
                                pump.push(data, channels, |sample| {
                                    (sample as f32 - 32_768.0) / 32_768.0
                                });
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(build_err)?
            }
            other => {
                return Err(DeviceError::Open(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|err| DeviceError::Open(format!("failed to start stream: {err}")))?;
        Ok(Box::new(CpalStream { stream }))
    }

    fn describe(&self) -> String {
        "cpal".to_string()
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl ActiveStream for CpalStream {
    fn pause(&mut self) -> Result<(), DeviceError> {
        self.stream
            .pause()
            .map_err(|err| DeviceError::Stream(format!("failed to pause stream: {err}")))
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.stream
            .play()
            .map_err(|err| DeviceError::Stream(format!("failed to resume stream: {err}")))
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
