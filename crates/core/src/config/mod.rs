use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{BeatMatrixError, Result};

/// Top-level configuration structure for the tempo tracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every field the pipeline relies on before any thread is spawned.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.analysis.validate(self.audio.sample_rate)?;

        if self.audio.ring_capacity < self.analysis.hop_size {
            return Err(BeatMatrixError::config(format!(
                "ring capacity {} cannot hold one hop of {} samples",
                self.audio.ring_capacity, self.analysis.hop_size
            )));
        }

        Ok(())
    }
}

/// Configuration specific to the capture side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Frames requested from the backend per read.
    pub frames_per_read: usize,
    /// Capacity of the raw sample ring, in samples.
    pub ring_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bits_per_sample: 16,
            frames_per_read: 256,
            ring_capacity: 524_288,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(BeatMatrixError::config("sample rate must be positive"));
        }
        if self.channels == 0 {
            return Err(BeatMatrixError::config("at least one channel is required"));
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(BeatMatrixError::config(format!(
                "unsupported sample width of {} bits",
                self.bits_per_sample
            )));
        }
        if self.frames_per_read == 0 {
            return Err(BeatMatrixError::config("frames per read must be positive"));
        }
        if self.ring_capacity == 0 {
            return Err(BeatMatrixError::config("ring capacity must be positive"));
        }
        Ok(())
    }
}

/// Wavelet family used by the tempo estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wavelet {
    Haar,
    Daubechies4,
}

/// Configuration of the analysis thread and the tempo estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// New samples required before the next analysis cycle runs.
    pub hop_size: usize,
    /// Envelope samples handed to the estimator per cycle.
    pub window_size: usize,
    /// Wavelet decomposition depth.
    pub levels: u32,
    pub wavelet: Wavelet,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Span of the median smoother.
    pub median_window_ms: u64,
    /// Windows whose mean normalised magnitude falls below this are silent.
    pub silence_threshold: f32,
    /// Keep silent windows out of the median instead of feeding the sentinel.
    pub discard_silence: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            hop_size: 22_050,
            window_size: 131_072,
            levels: 4,
            wavelet: Wavelet::Daubechies4,
            min_bpm: 40.0,
            max_bpm: 220.0,
            median_window_ms: 10_000,
            silence_threshold: 1e-4,
            discard_silence: false,
        }
    }
}

impl AnalysisConfig {
    pub fn median_window(&self) -> Duration {
        Duration::from_millis(self.median_window_ms)
    }

    /// Length of the summed band envelope the autocorrelation runs on.
    pub fn envelope_len(&self) -> usize {
        self.window_size >> self.levels
    }

    /// Lag range (in envelope samples) covering `[min_bpm, max_bpm]`.
    pub fn lag_range(&self, sample_rate: u32) -> (usize, usize) {
        let envelope_rate = sample_rate as f32 / (1u64 << self.levels) as f32;
        let min_lag = (60.0 * envelope_rate / self.max_bpm).floor() as usize;
        let max_lag = (60.0 * envelope_rate / self.min_bpm).ceil() as usize;
        (min_lag, max_lag)
    }

    fn validate(&self, sample_rate: u32) -> Result<()> {
        if self.hop_size == 0 {
            return Err(BeatMatrixError::config("hop size must be positive"));
        }
        if !(1..=16).contains(&self.levels) {
            return Err(BeatMatrixError::config(format!(
                "wavelet levels must be within 1..=16, got {}",
                self.levels
            )));
        }
        if self.window_size == 0 || self.window_size % (1usize << self.levels) != 0 {
            return Err(BeatMatrixError::config(format!(
                "window size {} is not a multiple of 2^{}",
                self.window_size, self.levels
            )));
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return Err(BeatMatrixError::config(format!(
                "bpm range {}..{} is empty",
                self.min_bpm, self.max_bpm
            )));
        }

        let (min_lag, max_lag) = self.lag_range(sample_rate);
        if min_lag < 2 {
            return Err(BeatMatrixError::config(format!(
                "{} bpm is too fast to resolve at {} levels",
                self.max_bpm, self.levels
            )));
        }
        if max_lag + 1 >= self.envelope_len() {
            return Err(BeatMatrixError::config(format!(
                "window of {} samples is too short for {} bpm",
                self.window_size, self.min_bpm
            )));
        }
        Ok(())
    }
}
