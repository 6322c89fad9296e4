use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per interleaved S16LE stereo sample pair
pub const BYTES_PER_SAMPLE_PAIR: usize = 4;

/// One block of interleaved S16LE stereo audio as produced by the sample source
///
/// The payload is reference counted so the same frame can sit in every
/// client's queue without being copied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleFrame {
    /// Production order, starting at 0
    pub sequence: u64,
    data: Bytes,
}

impl SampleFrame {
    pub fn new(sequence: u64, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First 16-bit sample of the frame, if any
    pub fn first_sample(&self) -> Option<i16> {
        self.data.get(..2).map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    /// Last complete 16-bit sample of the frame, if any
    pub fn last_sample(&self) -> Option<i16> {
        let end = self.data.len() - self.data.len() % 2;
        if end < 2 {
            return None;
        }
        let b = &self.data[end - 2..end];
        Some(i16::from_le_bytes([b[0], b[1]]))
    }

    /// Cheap silence heuristic: both the first and the last sample are exactly zero.
    ///
    /// This misses silence with a DC offset and can flag real audio that happens
    /// to cross zero at both ends; it is only meant to drive renderer control.
    pub fn looks_silent(&self) -> bool {
        matches!((self.first_sample(), self.last_sample()), (Some(0), Some(0)) | (None, None))
    }
}

/// Wire format requested by a streaming client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Raw interleaved S16LE samples
    Pcm,
    /// Canonical 44-byte WAV header followed by raw samples
    Wav,
}

impl StreamFormat {
    /// Request path serving this format
    pub fn path(&self) -> &'static str {
        match self {
            StreamFormat::Pcm => "/stream.pcm",
            StreamFormat::Wav => "/stream.wav",
        }
    }

    pub fn content_type(&self, sample_rate: u32, channels: u16) -> String {
        match self {
            StreamFormat::Pcm => format!("audio/L16;rate={};channels={}", sample_rate, channels),
            StreamFormat::Wav => "audio/wav".to_string(),
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::Pcm => write!(f, "PCM"),
            StreamFormat::Wav => write!(f, "WAV"),
        }
    }
}
