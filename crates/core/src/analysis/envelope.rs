use crate::{audio::sample_to_f32, Result, RingBuffer, Sample};

/// Writes `|sample|`, normalised to `[0, 1]`, for each input into `out`.
///
/// Returns the number of values written, the shorter of the two lengths.
pub fn rectify(samples: &[Sample], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (sample, slot) in samples.iter().zip(out.iter_mut()) {
        *slot = sample_to_f32(*sample).abs();
        written += 1;
    }
    written
}

/// Rolling history of rectified magnitudes, sized to one analysis window.
#[derive(Debug)]
pub struct AmplitudeEnvelope {
    history: RingBuffer<f32>,
    rectified: Vec<f32>,
}

impl AmplitudeEnvelope {
    /// `window_size` is the span later extracted by [`AmplitudeEnvelope::window`];
    /// `batch_size` is the largest batch rectified in one go.
    pub fn new(window_size: usize, batch_size: usize) -> Result<Self> {
        Ok(Self {
            history: RingBuffer::new(window_size)?,
            rectified: vec![0.0; batch_size.max(1)],
        })
    }

    pub fn push(&mut self, samples: &[Sample]) {
        for chunk in samples.chunks(self.rectified.len()) {
            let count = rectify(chunk, &mut self.rectified);
            self.history.write(&self.rectified[..count]);
        }
    }

    /// Copies the freshest `dest.len()` magnitudes and returns how many were available.
    pub fn window(&self, dest: &mut [f32]) -> usize {
        self.history.read(dest)
    }

    /// Whether a full window has accumulated.
    pub fn is_primed(&self) -> bool {
        self.history.latest() >= self.history.capacity() as u64
    }

    pub fn latest(&self) -> u64 {
        self.history.latest()
    }
}
