//! Energy/threshold snapshots and the producer watchdog.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Called by the producer to prove it is still making progress.
pub type Watchdog = Arc<dyn Fn() + Send + Sync>;

pub fn noop_watchdog() -> Watchdog {
    Arc::new(|| {})
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSnapshot {
    pub energy: f64,
    pub threshold: f64,
    pub muted: bool,
}

#[derive(Debug)]
struct LevelState {
    energy_bits: AtomicU64,
    threshold_bits: AtomicU64,
    muted: AtomicBool,
    file: Option<PathBuf>,
}

/// Last energy/threshold pair seen by the producer, optionally mirrored to
/// a `mic_level` file.
#[derive(Clone, Debug)]
pub struct LevelMeter {
    state: Arc<LevelState>,
}

impl LevelMeter {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            state: Arc::new(LevelState {
                energy_bits: AtomicU64::new(0f64.to_bits()),
                threshold_bits: AtomicU64::new(0f64.to_bits()),
                muted: AtomicBool::new(false),
                file,
            }),
        }
    }

    pub fn record(&self, energy: f64, threshold: f64, muted: bool) {
        self.state
            .energy_bits
            .store(energy.to_bits(), Ordering::Relaxed);
        self.state
            .threshold_bits
            .store(threshold.to_bits(), Ordering::Relaxed);
        self.state.muted.store(muted, Ordering::Relaxed);
        if let Some(path) = self.state.file.as_deref() {
            if let Err(err) = write_level_file(path, energy, threshold, muted) {
                tracing::debug!(error = %err, path = %path.display(), "mic level write failed");
            }
        }
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            energy: f64::from_bits(self.state.energy_bits.load(Ordering::Relaxed)),
            threshold: f64::from_bits(self.state.threshold_bits.load(Ordering::Relaxed)),
            muted: self.state.muted.load(Ordering::Relaxed),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.state.file.as_deref()
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(None)
    }
}

pub fn format_level_line(energy: f64, threshold: f64, muted: bool) -> String {
    format!(
        "Energy:  cur={} thresh={:.3} muted={}",
        energy,
        threshold,
        u8::from(muted)
    )
}

fn write_level_file(path: &Path, energy: f64, threshold: f64, muted: bool) -> std::io::Result<()> {
    fs::write(path, format_level_line(energy, threshold, muted))
}
