use std::{
    f64::consts::PI,
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use super::{f32_to_sample, AudioBackend, CaptureStream, Sample, StreamFormat};
use crate::Result;

/// Decaying tone bursts at a fixed tempo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseTrain {
    pub bpm: f64,
    /// Length of each click.
    pub click_ms: f64,
    /// Pitch of the tone inside each click.
    pub tone_hz: f64,
    pub amplitude: f32,
}

impl PulseTrain {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            click_ms: 60.0,
            tone_hz: 180.0,
            amplitude: 0.8,
        }
    }

    /// Value of the train at frame `index`.
    pub fn value_at(&self, index: u64, sample_rate: u32) -> f32 {
        let rate = f64::from(sample_rate);
        let period = 60.0 * rate / self.bpm;
        let offset = (index as f64) % period;
        let click = self.click_ms * rate / 1000.0;
        if offset >= click {
            return 0.0;
        }

        let t = offset / rate;
        let decay = (-offset / (click / 4.0)).exp();
        (f64::from(self.amplitude) * decay * (2.0 * PI * self.tone_hz * t).sin()) as f32
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Silence,
    Pulses(PulseTrain),
}

#[derive(Debug, Clone, Copy)]
enum Length {
    Frames(u64),
    Seconds(f64),
}

/// Backend that generates audio instead of reading a device.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    signal: Signal,
    length: Length,
    realtime: bool,
}

impl SyntheticBackend {
    /// `frames` frames of digital silence.
    pub fn silence(frames: u64) -> Self {
        Self {
            signal: Signal::Silence,
            length: Length::Frames(frames),
            realtime: false,
        }
    }

    /// A pulse train lasting `seconds`.
    pub fn pulses(train: PulseTrain, seconds: f64) -> Self {
        Self {
            signal: Signal::Pulses(train),
            length: Length::Seconds(seconds),
            realtime: false,
        }
    }

    /// Paces reads to the sample rate, as a capture device would.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl AudioBackend for SyntheticBackend {
    fn open(&mut self, format: &StreamFormat) -> Result<Box<dyn CaptureStream>> {
        let total = match self.length {
            Length::Frames(frames) => frames,
            Length::Seconds(seconds) => (seconds * f64::from(format.sample_rate)) as u64,
        };

        Ok(Box::new(SyntheticStream {
            signal: self.signal,
            format: *format,
            position: 0,
            total,
            started: self.realtime.then(Instant::now),
        }))
    }
}

struct SyntheticStream {
    signal: Signal,
    format: StreamFormat,
    position: u64,
    total: u64,
    started: Option<Instant>,
}

impl SyntheticStream {
    fn sample_at(&self, index: u64) -> Sample {
        match self.signal {
            Signal::Silence => 0,
            Signal::Pulses(train) => f32_to_sample(train.value_at(index, self.format.sample_rate)),
        }
    }

    fn pace(&self) {
        if let Some(started) = self.started {
            let due = Duration::from_secs_f64(
                self.position as f64 / f64::from(self.format.sample_rate),
            );
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
    }
}

impl CaptureStream for SyntheticStream {
    fn read_frames(&mut self, buffer: &mut [u8], frames: usize) -> Result<usize> {
        let frame_bytes = self.format.bytes_per_frame();
        let remaining = self.total.saturating_sub(self.position);
        let count = (frames as u64)
            .min(remaining)
            .min((buffer.len() / frame_bytes.max(1)) as u64) as usize;

        for (offset, frame) in buffer.chunks_exact_mut(frame_bytes).take(count).enumerate() {
            let sample = self.sample_at(self.position + offset as u64);
            for slot in frame.chunks_exact_mut(self.format.bytes_per_sample()) {
                encode(sample, self.format.bits_per_sample, slot);
            }
        }

        self.position += count as u64;
        self.pace();
        Ok(count)
    }
}

fn encode(sample: Sample, bits: u16, slot: &mut [u8]) {
    let [lo, hi] = sample.to_le_bytes();
    match bits {
        8 => slot[0] = ((sample >> 8) + 128) as u8,
        16 => slot.copy_from_slice(&[lo, hi]),
        24 => slot.copy_from_slice(&[0, lo, hi]),
        32 => slot.copy_from_slice(&[0, 0, lo, hi]),
        _ => slot.fill(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_ends_after_the_requested_frames() {
        let mut backend = SyntheticBackend::silence(10);
        let mut stream = backend.open(&StreamFormat::mono16(8_000)).unwrap();
        let mut buffer = [0xAAu8; 16];

        assert_eq!(stream.read_frames(&mut buffer, 8).unwrap(), 8);
        assert!(buffer.iter().all(|b| *b == 0));
        assert_eq!(stream.read_frames(&mut buffer, 8).unwrap(), 2);
        assert_eq!(stream.read_frames(&mut buffer, 8).unwrap(), 0);
    }

    #[test]
    fn pulses_repeat_at_the_beat_period() {
        let train = PulseTrain::new(120.0);
        let rate = 44_100;
        // 120 bpm at 44.1 kHz is one click every 22050 frames.
        for index in [10u64, 200, 1_000] {
            let first = train.value_at(index, rate);
            let next = train.value_at(index + 22_050, rate);
            assert!((first - next).abs() < 1e-3);
        }
        assert_eq!(train.value_at(10_000, rate), 0.0);
        assert!(train.value_at(20, rate).abs() > 0.0);
    }

    #[test]
    fn round_trips_every_supported_width() {
        let train = PulseTrain::new(100.0);
        for bits in [8u16, 16, 24, 32] {
            let format = StreamFormat {
                sample_rate: 8_000,
                channels: 2,
                bits_per_sample: bits,
            };
            let mut backend = SyntheticBackend::pulses(train, 1.0);
            let mut stream = backend.open(&format).unwrap();
            let mut bytes = vec![0u8; 32 * format.bytes_per_frame()];
            let frames = stream.read_frames(&mut bytes, 32).unwrap();

            let mut decoded = [0i16; 32];
            assert_eq!(format.decode(&bytes, &mut decoded), frames);

            for (index, value) in decoded.iter().enumerate() {
                let expected = f32_to_sample(train.value_at(index as u64, 8_000));
                let tolerance = if bits == 8 { 256 } else { 0 };
                assert!(
                    (i32::from(*value) - i32::from(expected)).abs() <= tolerance,
                    "{bits} bits at {index}: {value} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn realtime_stream_is_paced() {
        let mut backend = SyntheticBackend::silence(400).realtime(true);
        let mut stream = backend.open(&StreamFormat::mono16(8_000)).unwrap();
        let mut buffer = [0u8; 800];

        let started = Instant::now();
        stream.read_frames(&mut buffer, 400).unwrap();
        // 400 frames at 8 kHz is 50 ms.
        assert!(started.elapsed() >= Duration::from_millis(45));
    }
}
