//! Wake word engines and the registry that builds them by module name.

mod energy;

pub use energy::EnergyPhraseEngine;

use crate::config::ListenerConfig;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Longest an engine may take to initialize before the registry gives up.
pub const ENGINE_INIT_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENERGY_MODULE: &str = "energy";
pub const LISTEN_ONLY_MODULE: &str = "listen_only";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WakeWordError {
    #[error("unknown wake word module '{0}'")]
    UnknownModule(String),
    #[error("wake word engine unavailable: {0}")]
    Unavailable(String),
    #[error("wake word engine asked for a listener reload")]
    ReloadRequested,
    #[error("wake word module '{0}' did not initialize in time")]
    InitTimeout(String),
}

/// Detects one key phrase in a stream of PCM chunks.
///
/// `update` is fed every chunk; `found_wake_word` is polled a few times per
/// second with the most recent window of audio and must reset the engine's
/// trigger state when it returns `true`.
pub trait WakeWordEngine: Send {
    fn key_phrase(&self) -> &str;

    /// Rough spoken length of the key phrase.
    fn expected_duration(&self) -> Duration;

    fn update(&mut self, chunk: &[u8]);

    fn found_wake_word(&mut self, frame_data: &[u8]) -> bool;

    fn stop(&mut self) {}
}

/// Everything a factory needs to build an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordSpec {
    pub key_phrase: String,
    pub module: String,
    pub phoneme_duration: Duration,
    pub sample_rate: u32,
    pub lang: String,
}

impl WakeWordSpec {
    pub fn new(key_phrase: &str, module: &str, config: &ListenerConfig) -> Self {
        Self {
            key_phrase: key_phrase.to_lowercase(),
            module: module.to_string(),
            phoneme_duration: config.phoneme_duration(),
            sample_rate: config.sample_rate,
            lang: config.lang.to_lowercase(),
        }
    }

    /// The configured wake phrase.
    pub fn wake_word(config: &ListenerConfig) -> Self {
        Self::new(&config.wake_word, &config.wake_word_module, config)
    }

    /// The stand-up phrase, when one is configured.
    pub fn stand_up_word(config: &ListenerConfig) -> Option<Self> {
        config
            .stand_up_word
            .as_deref()
            .map(|phrase| Self::new(phrase, &config.wake_word_module, config))
    }

    pub fn expected_duration(&self) -> Duration {
        expected_duration(&self.key_phrase, self.phoneme_duration)
    }
}

/// Roughly one phoneme per two characters, plus one.
pub fn expected_duration(key_phrase: &str, phoneme_duration: Duration) -> Duration {
    let phonemes = key_phrase.chars().count() as f64 / 2.0 + 1.0;
    phoneme_duration.mul_f64(phonemes)
}

pub type WakeWordFactory =
    Arc<dyn Fn(&WakeWordSpec) -> Result<Box<dyn WakeWordEngine>, WakeWordError> + Send + Sync>;

/// Engine picked by the registry.
pub struct WakeWordSelection {
    pub engine: Box<dyn WakeWordEngine>,
    pub module: String,
    /// The requested module asked for a reload; the engine is the fallback.
    pub reload_requested: bool,
}

impl std::fmt::Debug for WakeWordSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeWordSelection")
            .field("module", &self.module)
            .field("key_phrase", &self.engine.key_phrase())
            .field("reload_requested", &self.reload_requested)
            .finish()
    }
}

/// Maps module names to engine factories.
#[derive(Clone)]
pub struct WakeWordRegistry {
    factories: BTreeMap<String, WakeWordFactory>,
    default_module: String,
    init_timeout: Duration,
}

impl WakeWordRegistry {
    pub fn empty(default_module: &str) -> Self {
        Self {
            factories: BTreeMap::new(),
            default_module: default_module.to_string(),
            init_timeout: ENGINE_INIT_TIMEOUT,
        }
    }

    /// Registry with the `energy` and `listen_only` engines, defaulting to `energy`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty(ENERGY_MODULE);
        registry.register(ENERGY_MODULE, |spec: &WakeWordSpec| {
            Ok(Box::new(EnergyPhraseEngine::new(spec)) as Box<dyn WakeWordEngine>)
        });
        registry.register(LISTEN_ONLY_MODULE, |spec: &WakeWordSpec| {
            Ok(Box::new(ListenOnlyEngine::new(spec)) as Box<dyn WakeWordEngine>)
        });
        registry
    }

    pub fn register<F>(&mut self, module: &str, factory: F)
    where
        F: Fn(&WakeWordSpec) -> Result<Box<dyn WakeWordEngine>, WakeWordError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(module.to_lowercase(), Arc::new(factory));
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn default_module(&self) -> &str {
        &self.default_module
    }

    pub fn modules(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, module: &str) -> bool {
        self.factories.contains_key(&module.to_lowercase())
    }

    /// Build the engine for `spec.module`, falling back to the default module
    /// when the requested one fails.
    pub fn create(&self, spec: &WakeWordSpec) -> Result<WakeWordSelection, WakeWordError> {
        tracing::info!(
            phrase = %spec.key_phrase,
            module = %spec.module,
            "loading wake word"
        );
        let mut reload_requested = false;
        match self.load_module(&spec.module, spec) {
            Ok(engine) => {
                return Ok(WakeWordSelection {
                    engine,
                    module: spec.module.clone(),
                    reload_requested,
                })
            }
            Err(WakeWordError::ReloadRequested) => {
                tracing::info!(module = %spec.module, "wake word engine requested a reload");
                reload_requested = true;
            }
            Err(err) => {
                if spec.module == self.default_module {
                    return Err(err);
                }
                tracing::warn!(
                    error = %err,
                    fallback = %self.default_module,
                    "could not create wake word engine; falling back to default"
                );
            }
        }
        let engine = self.load_module(&self.default_module, spec)?;
        Ok(WakeWordSelection {
            engine,
            module: self.default_module.clone(),
            reload_requested,
        })
    }

    fn load_module(
        &self,
        module: &str,
        spec: &WakeWordSpec,
    ) -> Result<Box<dyn WakeWordEngine>, WakeWordError> {
        let factory = self
            .factories
            .get(&module.to_lowercase())
            .cloned()
            .ok_or_else(|| WakeWordError::UnknownModule(module.to_string()))?;
        let spec = WakeWordSpec {
            module: module.to_string(),
            ..spec.clone()
        };
        let (tx, rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name(format!("wake-init-{module}"))
            .spawn(move || {
                let _ = tx.send(factory(&spec));
            });
        if let Err(err) = spawned {
            return Err(WakeWordError::Unavailable(format!(
                "failed to spawn init thread: {err}"
            )));
        }
        match rx.recv_timeout(self.init_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(module, "wake word engine is taking too long to load");
                Err(WakeWordError::InitTimeout(module.to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(WakeWordError::Unavailable(format!(
                "{module} init thread exited without a result"
            ))),
        }
    }
}

impl Default for WakeWordRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Never detects anything; recordings start only via `trigger_listen`.
#[derive(Debug, Clone)]
pub struct ListenOnlyEngine {
    key_phrase: String,
    expected: Duration,
}

impl ListenOnlyEngine {
    pub fn new(spec: &WakeWordSpec) -> Self {
        Self {
            key_phrase: spec.key_phrase.clone(),
            expected: spec.expected_duration(),
        }
    }
}

impl WakeWordEngine for ListenOnlyEngine {
    fn key_phrase(&self) -> &str {
        &self.key_phrase
    }

    fn expected_duration(&self) -> Duration {
        self.expected
    }

    fn update(&mut self, _chunk: &[u8]) {}

    fn found_wake_word(&mut self, _frame_data: &[u8]) -> bool {
        false
    }
}
