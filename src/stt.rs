//! Speech-to-text engines used by the consumer thread.
//!
//! Whisper wraps `whisper_rs`; the model is loaded once and reused across
//! utterances to avoid repeated initialization overhead.

use crate::config::ListenerConfig;
use crate::listener::Utterance;
use anyhow::{bail, Result};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SttError {
    #[error("speech service unreachable: {0}")]
    Network(String),
    #[error("speech recognition timed out: {0}")]
    Timeout(String),
    #[error("speech recognition request failed: {0}")]
    Request(String),
    #[error("speech engine error: {0}")]
    Engine(String),
}

impl SttError {
    /// Network faults are reported separately from "didn't understand".
    pub fn is_network(&self) -> bool {
        matches!(self, SttError::Network(_))
    }
}

/// Turns one utterance into text.
///
/// `Ok(None)` means the engine ran but heard nothing it could transcribe.
pub trait SpeechToText: Send {
    fn lang(&self) -> &str;

    fn can_stream(&self) -> bool {
        false
    }

    fn execute(&mut self, utterance: &Utterance) -> Result<Option<String>, SttError>;

    fn stream_start(&mut self) -> Result<(), SttError> {
        Ok(())
    }

    fn stream_data(&mut self, _chunk: &[u8]) -> Result<(), SttError> {
        Ok(())
    }

    fn stream_stop(&mut self) -> Result<Option<String>, SttError> {
        Ok(None)
    }
}

/// Engine for setups that only need the recorded audio; never transcribes.
#[derive(Debug, Clone)]
pub struct NullStt {
    lang: String,
}

impl NullStt {
    pub fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
        }
    }
}

impl SpeechToText for NullStt {
    fn lang(&self) -> &str {
        &self.lang
    }

    fn execute(&mut self, _utterance: &Utterance) -> Result<Option<String>, SttError> {
        Ok(None)
    }
}

/// Build the engine named by `--stt`.
pub fn create_stt(config: &ListenerConfig) -> Result<Box<dyn SpeechToText>> {
    match config.stt_module.as_str() {
        "none" => Ok(Box::new(NullStt::new(&config.lang))),
        "whisper" => create_whisper(config),
        other => bail!("unknown speech-to-text module '{other}'"),
    }
}

#[cfg(feature = "whisper")]
fn create_whisper(config: &ListenerConfig) -> Result<Box<dyn SpeechToText>> {
    use anyhow::Context;
    let Some(path) = config.whisper_model_path.as_deref() else {
        bail!("--whisper-model-path is required when --stt whisper is selected");
    };
    let stt = WhisperStt::new(path, config).context("failed to initialize whisper")?;
    Ok(Box::new(stt))
}

#[cfg(not(feature = "whisper"))]
fn create_whisper(_config: &ListenerConfig) -> Result<Box<dyn SpeechToText>> {
    bail!("whisper support is not compiled in (enable the `whisper` feature)")
}

/// Whisper language code for a BCP-47 tag ("en-US" -> "en").
pub fn whisper_language(lang: &str) -> Option<String> {
    if lang.eq_ignore_ascii_case("auto") {
        return None;
    }
    lang.split(|ch| ch == '-' || ch == '_')
        .next()
        .filter(|code| !code.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Strip non-speech markers and collapse whitespace.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .ok()
    });
    let without_markers = match re {
        Some(re) => re.replace_all(trimmed, " ").into_owned(),
        None => trimmed.to_string(),
    };
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(all(unix, feature = "whisper"))]
mod platform {
    use super::{sanitize_transcript, whisper_language, SpeechToText, SttError};
    use crate::audio::resample::resample_between;
    use crate::audio::{pcm, TARGET_RATE};
    use crate::config::ListenerConfig;
    use crate::listener::Utterance;
    use anyhow::{anyhow, Context, Result};
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Whisper model context for speech-to-text transcription.
    ///
    /// Holds the loaded GGML model in memory. Create once and reuse for all
    /// utterances.
    pub struct WhisperStt {
        ctx: WhisperContext,
        lang: String,
        language: Option<String>,
        beam_size: u32,
        temperature: f32,
    }

    impl WhisperStt {
        /// Loads the Whisper model from disk.
        ///
        /// Temporarily redirects stderr to `/dev/null` during loading because
        /// whisper.cpp emits verbose initialization messages.
        pub fn new(model_path: &str, config: &ListenerConfig) -> Result<Self> {
            install_whisper_log_silencer();

            let null = std::fs::OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?;
            let null_fd = null.as_raw_fd();

            // SAFETY: dup(2) duplicates the stderr descriptor; it is restored
            // and closed before returning on every path.
            let orig_stderr = unsafe { libc::dup(2) };
            if orig_stderr < 0 {
                return Err(anyhow!(
                    "failed to dup stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let dup_result = unsafe { libc::dup2(null_fd, 2) };
            if dup_result < 0 {
                unsafe {
                    libc::close(orig_stderr);
                }
                return Err(anyhow!(
                    "failed to redirect stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx_result =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default());

            let restore_result = unsafe { libc::dup2(orig_stderr, 2) };
            unsafe {
                libc::close(orig_stderr);
            }
            if restore_result < 0 {
                return Err(anyhow!(
                    "failed to restore stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx = ctx_result.context("failed to load whisper model")?;
            tracing::info!(model = model_path, "whisper model loaded");
            Ok(Self {
                ctx,
                lang: config.lang.clone(),
                language: whisper_language(&config.lang),
                beam_size: config.whisper_beam_size,
                temperature: config.whisper_temperature,
            })
        }

        /// Run transcription and return the concatenated segment text.
        pub fn transcribe(&self, samples: &[f32]) -> Result<String> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;
            let mut params = if self.beam_size > 1 {
                FullParams::new(SamplingStrategy::BeamSearch {
                    beam_size: self.beam_size as i32,
                    patience: -1.0,
                })
            } else {
                FullParams::new(SamplingStrategy::Greedy { best_of: 1 })
            };
            match self.language.as_deref() {
                Some(language) => {
                    params.set_language(Some(language));
                    params.set_detect_language(false);
                }
                None => {
                    params.set_language(None);
                    params.set_detect_language(true);
                }
            }
            params.set_temperature(self.temperature);
            // Limit CPU usage so laptops don't max out all cores.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            state.full(params, samples)?;
            let mut transcript = String::new();
            let num_segments = match state.full_n_segments() {
                Ok(count) => count,
                Err(err) => {
                    tracing::debug!(error = %err, "whisper failed to read segment count");
                    return Ok(transcript);
                }
            };
            for i in 0..num_segments.max(0) {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => transcript.push_str(&text),
                    Err(err) => tracing::debug!(segment = i, error = %err, "failed to read whisper segment"),
                }
            }
            Ok(transcript)
        }
    }

    impl SpeechToText for WhisperStt {
        fn lang(&self) -> &str {
            &self.lang
        }

        fn execute(&mut self, utterance: &Utterance) -> Result<Option<String>, SttError> {
            let mut samples = pcm::to_f32(&utterance.pcm_bytes);
            if utterance.sample_rate != TARGET_RATE {
                samples = resample_between(&samples, utterance.sample_rate, TARGET_RATE);
            }
            let raw = self
                .transcribe(&samples)
                .map_err(|err| SttError::Engine(format!("{err:#}")))?;
            let cleaned = sanitize_transcript(&raw);
            Ok((!cleaned.is_empty()).then_some(cleaned))
        }
    }

    fn install_whisper_log_silencer() {
        static INSTALL_LOG_CALLBACK: Once = Once::new();
        INSTALL_LOG_CALLBACK.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
        });
    }

    unsafe extern "C" fn whisper_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // Keep whisper.cpp quiet; stdout carries the event stream.
    }
}

#[cfg(all(not(unix), feature = "whisper"))]
mod platform {
    use super::{SpeechToText, SttError};
    use crate::config::ListenerConfig;
    use crate::listener::Utterance;
    use anyhow::{anyhow, Result};

    /// Stub for targets without the stderr redirection the loader relies on.
    pub struct WhisperStt {
        lang: String,
    }

    impl WhisperStt {
        pub fn new(_model_path: &str, _config: &ListenerConfig) -> Result<Self> {
            Err(anyhow!(
                "Whisper transcription is currently supported only on Unix-like platforms"
            ))
        }
    }

    impl SpeechToText for WhisperStt {
        fn lang(&self) -> &str {
            &self.lang
        }

        fn execute(&mut self, _utterance: &Utterance) -> Result<Option<String>, SttError> {
            Err(SttError::Engine("whisper unsupported on this platform".into()))
        }
    }
}

#[cfg(feature = "whisper")]
pub use platform::WhisperStt;
