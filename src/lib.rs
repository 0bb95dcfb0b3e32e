pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod listener;
mod lock;
pub mod logging;
pub mod stt;
#[cfg(test)]
mod test_support;
#[cfg(feature = "vad_earshot")]
pub mod vad_earshot;
pub mod wake;

pub use config::ListenerConfig;
pub use listener::{ListenLoop, ListenerContext, ListenerError, ListenerEvent, ListenerHandle};
pub use logging::init_logging;
