//! 16-bit little-endian PCM helpers shared by the capture and detection stages.

use super::SAMPLE_WIDTH;

/// Iterate the samples of a 16-bit LE PCM buffer. A trailing odd byte is ignored.
pub fn samples(chunk: &[u8]) -> impl Iterator<Item = i16> + '_ {
    chunk
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Root-mean-square of the chunk in raw sample units (0..=32768).
pub fn rms(chunk: &[u8]) -> f64 {
    let mut count = 0usize;
    let mut sum = 0.0f64;
    for sample in samples(chunk) {
        let value = f64::from(sample);
        sum += value * value;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt()
}

/// RMS of the chunk after subtracting its own RMS from every sample.
///
/// Mirrors the classic `audioop` debiasing trick: the offset is applied with
/// saturating 16-bit arithmetic, so clipped samples stay clipped.
pub fn debiased_energy(chunk: &[u8]) -> f64 {
    let bias = rms(chunk) as i32;
    let mut count = 0usize;
    let mut sum = 0.0f64;
    for sample in samples(chunk) {
        let shifted = (i32::from(sample) - bias).clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        let value = f64::from(shifted);
        sum += value * value;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt()
}

/// Level of the chunk in dBFS, floored at -120 dB for digital silence.
pub fn rms_db(chunk: &[u8]) -> f32 {
    let normalized = (rms(chunk) / 32_768.0).max(1e-6);
    (20.0 * normalized.log10()) as f32
}

/// Decode a PCM buffer into `[-1.0, 1.0]` floats for engines that want them.
pub fn to_f32(chunk: &[u8]) -> Vec<f32> {
    samples(chunk)
        .map(|sample| f32::from(sample) / 32_768.0)
        .collect()
}

/// Append `[-1.0, 1.0]` floats as 16-bit LE PCM.
pub fn extend_from_f32(buf: &mut Vec<u8>, data: &[f32]) {
    buf.reserve(data.len() * SAMPLE_WIDTH);
    for sample in data {
        let scaled = (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16;
        buf.extend_from_slice(&scaled.to_le_bytes());
    }
}

/// A buffer of digital silence.
pub fn silence(num_bytes: usize) -> Vec<u8> {
    vec![0u8; num_bytes]
}
