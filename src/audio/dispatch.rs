use super::device::ChunkSink;
use super::pcm;
use super::resample::convert_frame_to_target;

/// Downmix multi-channel input to mono while applying the provided converter so
/// detectors receive a single channel regardless of the microphone layout.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Re-chunks callback buffers into fixed-size PCM chunks at the target rate.
///
/// Each `device_block` of mono device samples maps to exactly one chunk of
/// `frames_per_buffer` samples after resampling.
pub(super) struct FrameDispatcher {
    device_rate: u32,
    target_rate: u32,
    device_block: usize,
    frames_per_buffer: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sink: ChunkSink,
}

impl FrameDispatcher {
    pub(super) fn new(
        device_rate: u32,
        target_rate: u32,
        frames_per_buffer: usize,
        sink: ChunkSink,
    ) -> Self {
        let frames_per_buffer = frames_per_buffer.max(1);
        let device_block = ((frames_per_buffer as u64 * u64::from(device_rate))
            / u64::from(target_rate.max(1)))
        .max(1) as usize;
        Self {
            device_rate,
            target_rate,
            device_block,
            frames_per_buffer,
            pending: Vec::with_capacity(device_block),
            scratch: Vec::new(),
            sink,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.scratch.clear();
        append_downmixed_samples(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.device_block {
            let block: Vec<f32> = self.pending.drain(..self.device_block).collect();
            let converted = convert_frame_to_target(
                block,
                self.device_rate,
                self.target_rate,
                self.frames_per_buffer,
            );
            let mut chunk = Vec::with_capacity(self.frames_per_buffer * super::SAMPLE_WIDTH);
            pcm::extend_from_f32(&mut chunk, &converted);
            if !self.sink.deliver(chunk) {
                break;
            }
        }
    }
}
