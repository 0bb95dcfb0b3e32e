//! Fixed-capacity byte ring and rolling energy average used by the wake-word waiter.

use std::collections::VecDeque;

/// Byte ring that keeps the most recent `capacity` bytes of audio.
///
/// Appending past capacity discards the oldest bytes, so the retained window
/// always ends with the newest chunk.
#[derive(Debug, Clone)]
pub struct RingAudioBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl RingAudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if chunk.len() >= self.capacity {
            self.data.clear();
            self.data
                .extend(chunk[chunk.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        self.data.drain(..overflow);
        self.data.extend(chunk.iter().copied());
    }

    /// Most recent `n` bytes, front-padded with silence when fewer are held.
    pub fn get_last(&self, n: usize) -> Vec<u8> {
        let available = self.data.len().min(n);
        let mut out = Vec::with_capacity(n);
        out.resize(n - available, 0);
        out.extend(self.data.range(self.data.len() - available..));
        out
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Moving average over the last `window` samples.
#[derive(Debug, Clone)]
pub struct RollingMean {
    samples: VecDeque<f64>,
    window: usize,
    sum: f64,
}

impl RollingMean {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
        }
    }

    pub fn append_sample(&mut self, sample: f64) {
        self.samples.push_back(sample);
        self.sum += sample;
        if self.samples.len() > self.window {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
    }

    /// Current mean; 0.0 before the first sample.
    pub fn value(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
