use crate::audio::SAMPLE_WIDTH;

/// One recorded utterance as raw PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub pcm_bytes: Vec<u8>,
    pub sample_rate: u32,
    pub sample_width: usize,
}

impl Utterance {
    pub fn new(pcm_bytes: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            pcm_bytes,
            sample_rate,
            sample_width: SAMPLE_WIDTH,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        let bytes_per_second = f64::from(self.sample_rate) * self.sample_width as f64;
        if bytes_per_second <= 0.0 {
            return 0.0;
        }
        self.pcm_bytes.len() as f64 / bytes_per_second
    }

    pub fn is_empty(&self) -> bool {
        self.pcm_bytes.is_empty()
    }
}

/// Producer to consumer handoff, strictly ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    AudioReady(Utterance),
    StreamStart,
    StreamChunk(Vec<u8>),
    StreamStop,
}

impl QueueMessage {
    pub fn label(&self) -> &'static str {
        match self {
            QueueMessage::AudioReady(_) => "audio_ready",
            QueueMessage::StreamStart => "stream_start",
            QueueMessage::StreamChunk(_) => "stream_chunk",
            QueueMessage::StreamStop => "stream_stop",
        }
    }
}
