use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{AnalysisConfig, BeatMatrixError, Result, Wavelet};

/// Reported for windows that carry no usable rhythm.
pub const NO_DETECTION_BPM: f32 = 0.0;

const LOW_PASS_GAIN: f32 = 0.01;
const LOW_PASS_FEEDBACK: f32 = 0.99;

/// Wavelet tempo estimator.
///
/// Each window is split into octave bands with a discrete wavelet transform.
/// Every band is smoothed, brought down to the rate of the coarsest band,
/// rectified and centred, and the bands are summed into one onset envelope.
/// The strongest autocorrelation peak of that envelope inside the configured
/// tempo range gives the beat period.
///
/// All buffers and FFT plans are allocated up front; estimating a window does
/// not allocate and carries no state over from earlier windows.
pub struct TempoEstimator {
    window_size: usize,
    levels: u32,
    envelope_rate: f32,
    min_lag: usize,
    max_lag: usize,
    silence_threshold: f32,
    filters: FilterBank,
    approx: Vec<f32>,
    next: Vec<f32>,
    detail: Vec<f32>,
    band: Vec<f32>,
    summed: Vec<f32>,
    fft: FftResources,
}

impl TempoEstimator {
    pub fn new(config: &AnalysisConfig, sample_rate: u32) -> Result<Self> {
        let window_size = config.window_size;
        let envelope_len = config.envelope_len();
        let (min_lag, max_lag) = config.lag_range(sample_rate);
        if envelope_len == 0 || min_lag < 2 || max_lag + 1 >= envelope_len {
            return Err(BeatMatrixError::config(format!(
                "window of {window_size} samples cannot resolve {}..{} bpm at {} levels",
                config.min_bpm, config.max_bpm, config.levels
            )));
        }

        Ok(Self {
            window_size,
            levels: config.levels,
            envelope_rate: sample_rate as f32 / (1u64 << config.levels) as f32,
            min_lag,
            max_lag,
            silence_threshold: config.silence_threshold,
            filters: FilterBank::new(config.wavelet),
            approx: vec![0.0; window_size],
            next: vec![0.0; window_size / 2],
            detail: vec![0.0; window_size / 2],
            band: Vec::with_capacity(envelope_len),
            summed: vec![0.0; envelope_len],
            fft: FftResources::new((2 * envelope_len).next_power_of_two()),
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Estimates the tempo of one window of rectified magnitudes.
    ///
    /// Returns [`NO_DETECTION_BPM`] for silent or structureless windows.
    pub fn compute_window_bpm(&mut self, window: &[f32]) -> Result<f32> {
        if window.len() != self.window_size {
            return Err(format!(
                "tempo estimator expects {} samples, got {}",
                self.window_size,
                window.len()
            )
            .into());
        }

        let mean = window.iter().map(|v| v.abs()).sum::<f32>() / window.len() as f32;
        if mean.is_nan() || mean < self.silence_threshold {
            return Ok(NO_DETECTION_BPM);
        }

        self.build_onset_envelope(window);
        if self.summed.iter().all(|v| v.abs() <= f32::EPSILON) {
            return Ok(NO_DETECTION_BPM);
        }

        self.fft.autocorrelate(&self.summed)?;
        let correlation = self.fft.correlation(self.max_lag + 2);
        if correlation[0] <= f32::EPSILON {
            return Ok(NO_DETECTION_BPM);
        }

        let Some(peak) = strongest_peak(correlation, self.min_lag, self.max_lag) else {
            return Ok(NO_DETECTION_BPM);
        };

        let lag = refine_peak(correlation, peak);
        Ok(60.0 * self.envelope_rate / lag)
    }

    fn build_onset_envelope(&mut self, window: &[f32]) {
        self.summed.fill(0.0);
        self.approx.copy_from_slice(window);

        let mut len = window.len();
        for level in 0..self.levels {
            let half = len / 2;
            self.filters.decompose(
                &self.approx[..len],
                &mut self.next[..half],
                &mut self.detail[..half],
            );
            let stride = 1usize << (self.levels - level - 1);
            accumulate_band(&self.detail[..half], stride, &mut self.band, &mut self.summed);

            self.approx[..half].copy_from_slice(&self.next[..half]);
            len = half;
        }

        accumulate_band(&self.approx[..len], 1, &mut self.band, &mut self.summed);
    }
}

impl fmt::Debug for TempoEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempoEstimator")
            .field("window_size", &self.window_size)
            .field("levels", &self.levels)
            .field("envelope_rate", &self.envelope_rate)
            .field("lags", &(self.min_lag..=self.max_lag))
            .field("fft", &self.fft)
            .finish()
    }
}

/// Analysis filter pair of an orthogonal wavelet.
#[derive(Debug, Clone)]
struct FilterBank {
    low: Vec<f32>,
    high: Vec<f32>,
}

impl FilterBank {
    fn new(wavelet: Wavelet) -> Self {
        let low = match wavelet {
            Wavelet::Haar => vec![std::f32::consts::FRAC_1_SQRT_2; 2],
            Wavelet::Daubechies4 => {
                let sqrt3 = 3f32.sqrt();
                let norm = 4.0 * std::f32::consts::SQRT_2;
                vec![
                    (1.0 + sqrt3) / norm,
                    (3.0 + sqrt3) / norm,
                    (3.0 - sqrt3) / norm,
                    (1.0 - sqrt3) / norm,
                ]
            }
        };
        // Quadrature mirror: g[k] = (-1)^k h[N-1-k]
        let high = low
            .iter()
            .rev()
            .enumerate()
            .map(|(k, h)| if k % 2 == 0 { *h } else { -*h })
            .collect();
        Self { low, high }
    }

    /// One periodic DWT step: `input` splits into half-length approximation
    /// and detail coefficients.
    fn decompose(&self, input: &[f32], approx: &mut [f32], detail: &mut [f32]) {
        let n = input.len();
        for (i, (a, d)) in approx.iter_mut().zip(detail.iter_mut()).enumerate() {
            let mut low = 0.0;
            let mut high = 0.0;
            for (k, (h, g)) in self.low.iter().zip(&self.high).enumerate() {
                let x = input[(2 * i + k) % n];
                low += h * x;
                high += g * x;
            }
            *a = low;
            *d = high;
        }
    }
}

/// Low-passes `coefficients`, keeps every `stride`-th value, rectifies,
/// removes the mean and adds the result onto `summed`.
fn accumulate_band(coefficients: &[f32], stride: usize, band: &mut Vec<f32>, summed: &mut [f32]) {
    band.clear();
    let mut state = 0.0f32;
    for (i, x) in coefficients.iter().enumerate() {
        state = LOW_PASS_GAIN * x + LOW_PASS_FEEDBACK * state;
        if i % stride == 0 {
            band.push(state.abs());
        }
    }

    if band.is_empty() {
        return;
    }
    let mean = band.iter().sum::<f32>() / band.len() as f32;
    for (total, value) in summed.iter_mut().zip(band.iter()) {
        *total += value - mean;
    }
}

/// Index of the largest positive value in `correlation[min_lag..=max_lag]`.
fn strongest_peak(correlation: &[f32], min_lag: usize, max_lag: usize) -> Option<usize> {
    let upper = max_lag.min(correlation.len().saturating_sub(1));
    (min_lag..=upper)
        .filter(|lag| correlation[*lag] > 0.0)
        .max_by(|a, b| correlation[*a].total_cmp(&correlation[*b]))
}

/// Sub-sample peak position from a parabola through the peak and its neighbours.
fn refine_peak(correlation: &[f32], peak: usize) -> f32 {
    if peak == 0 || peak + 1 >= correlation.len() {
        return peak as f32;
    }

    let (left, centre, right) = (correlation[peak - 1], correlation[peak], correlation[peak + 1]);
    let curvature = left - 2.0 * centre + right;
    if curvature >= 0.0 {
        return peak as f32;
    }
    let offset = 0.5 * (left - right) / curvature;
    peak as f32 + offset.clamp(-0.5, 0.5)
}

/// FFT plans and scratch space for linear autocorrelation.
struct FftResources {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
    output: Vec<f32>,
}

impl FftResources {
    fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            size,
            input: forward.make_input_vec(),
            spectrum: forward.make_output_vec(),
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            output: inverse.make_output_vec(),
            forward,
            inverse,
        }
    }

    /// Autocorrelates `signal` (zero-padded, so no circular wrap) into `output`.
    fn autocorrelate(&mut self, signal: &[f32]) -> Result<()> {
        self.input.fill(0.0);
        self.input[..signal.len()].copy_from_slice(signal);

        self.forward.process_with_scratch(
            &mut self.input,
            &mut self.spectrum,
            &mut self.forward_scratch,
        )?;
        for bin in self.spectrum.iter_mut() {
            *bin = Complex32::new(bin.norm_sqr(), 0.0);
        }
        self.inverse.process_with_scratch(
            &mut self.spectrum,
            &mut self.output,
            &mut self.inverse_scratch,
        )?;

        let scale = 1.0 / self.size as f32;
        self.output.iter_mut().for_each(|value| *value *= scale);
        Ok(())
    }

    /// Correlation values for lags `0..lags`.
    fn correlation(&self, lags: usize) -> &[f32] {
        &self.output[..lags.min(self.size / 2)]
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}
