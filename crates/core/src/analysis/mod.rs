//! Per-window signal processing run by the analysis thread.

mod envelope;
mod median;
mod wavelet;

pub use envelope::{rectify, AmplitudeEnvelope};
pub use median::TimeWindowedMedian;
pub use wavelet::{TempoEstimator, NO_DETECTION_BPM};
