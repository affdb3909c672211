//! Audio capture: the backend boundary and the thread that drains it.

mod raw;
mod source;
mod synthetic;

use serde::{Deserialize, Serialize};

use crate::{AudioConfig, Result, RingBuffer};

pub use raw::RawPcmBackend;
pub use source::SampleSource;
pub use synthetic::{PulseTrain, SyntheticBackend};

/// A single mono amplitude reading.
pub type Sample = i16;

/// Byte layout the backend is asked to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl StreamFormat {
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    /// Decodes interleaved little-endian frames, keeping the first channel.
    ///
    /// Returns the number of samples written to `out`.
    pub fn decode(&self, bytes: &[u8], out: &mut [Sample]) -> usize {
        let frame = self.bytes_per_frame();
        if frame == 0 {
            return 0;
        }

        let mut written = 0;
        for (chunk, slot) in bytes.chunks_exact(frame).zip(out.iter_mut()) {
            *slot = match self.bits_per_sample {
                8 => (i16::from(chunk[0]) - 128) << 8,
                16 => i16::from_le_bytes([chunk[0], chunk[1]]),
                24 => i16::from_le_bytes([chunk[1], chunk[2]]),
                32 => i16::from_le_bytes([chunk[2], chunk[3]]),
                _ => 0,
            };
            written += 1;
        }
        written
    }
}

impl From<&AudioConfig> for StreamFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bits_per_sample: config.bits_per_sample,
        }
    }
}

/// Converts a sample to a float in `[-1, 1)`.
pub fn sample_to_f32(sample: Sample) -> f32 {
    f32::from(sample) / 32_768.0
}

/// Converts a float in `[-1, 1]` to a sample, clamping out-of-range input.
pub fn f32_to_sample(value: f32) -> Sample {
    (value.clamp(-1.0, 1.0) * 32_767.0).round() as Sample
}

/// Device-specific audio input.
pub trait AudioBackend: Send {
    /// Opens a capture stream delivering `format`. Dropping the stream closes it.
    fn open(&mut self, format: &StreamFormat) -> Result<Box<dyn CaptureStream>>;
}

/// An open capture stream.
pub trait CaptureStream: Send {
    /// Fills `buffer` with up to `frames` interleaved frames and returns how
    /// many were read. `Ok(0)` signals the end of the stream.
    fn read_frames(&mut self, buffer: &mut [u8], frames: usize) -> Result<usize>;
}

/// Liveness of the capture thread as seen by the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// The capture thread has not opened the backend yet.
    Pending,
    Streaming,
    /// The backend reported the end of its stream.
    Ended,
    /// Capture was cut short by a shutdown request.
    Stopped,
    /// Opening or reading the backend failed.
    Failed,
}

impl SourceStatus {
    /// Whether the capture thread has stopped producing for good.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Ended | Self::Stopped | Self::Failed)
    }
}

/// State shared between the capture and analysis threads.
#[derive(Debug)]
pub struct CaptureState {
    pub samples: RingBuffer<Sample>,
    pub status: SourceStatus,
}

impl CaptureState {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            samples: RingBuffer::new(capacity)?,
            status: SourceStatus::Pending,
        })
    }
}
