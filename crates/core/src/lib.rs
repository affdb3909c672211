//! Core library for the beatmatrix tempo tracker.
//!
//! A capture thread pulls PCM from an [`audio::AudioBackend`] into a shared
//! ring of raw samples. An analysis thread wakes once per hop, keeps a
//! rectified amplitude envelope, runs a wavelet onset detector with an
//! autocorrelation peak search over the freshest window, and publishes the
//! median of recent estimates through a [`BpmHandle`].

pub mod analysis;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sync;

pub use analysis::{AmplitudeEnvelope, TempoEstimator, TimeWindowedMedian, NO_DETECTION_BPM};
pub use audio::{
    AudioBackend, PulseTrain, RawPcmBackend, Sample, SampleSource, SourceStatus, StreamFormat,
    SyntheticBackend,
};
pub use buffer::{ReadSpan, RingBuffer};
pub use config::{AnalysisConfig, AppConfig, AudioConfig, Wavelet};
pub use error::{BeatMatrixError, Result};
pub use pipeline::{BeatPipeline, BpmHandle, PipelineState, TempoSnapshot, TempoUpdate};
pub use sync::{ShutdownToken, SyncPoint};
