use std::{
    io::{self, Read},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use approx::assert_abs_diff_eq;
use beatmatrix_core::{
    audio::{f32_to_sample, CaptureStream},
    AppConfig, AudioBackend, BeatMatrixError, BeatPipeline, PipelineState, PulseTrain,
    RawPcmBackend, SourceStatus, StreamFormat, SyntheticBackend, TempoUpdate,
};

const DEADLINE: Duration = Duration::from_secs(60);

/// Runs `work` on another thread and fails the test if it overruns `limit`.
fn within<T: Send + 'static>(limit: Duration, work: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(work());
    });
    match rx.recv_timeout(limit) {
        Ok(value) => value,
        Err(_) => panic!("did not finish within {limit:?}"),
    }
}

fn collect_updates(updates: mpsc::Receiver<TempoUpdate>) -> Vec<TempoUpdate> {
    let started = Instant::now();
    let mut collected = Vec::new();
    loop {
        let left = DEADLINE.saturating_sub(started.elapsed());
        match updates.recv_timeout(left) {
            Ok(update) => collected.push(update),
            Err(RecvTimeoutError::Disconnected) => return collected,
            Err(RecvTimeoutError::Timeout) => panic!("analysis thread never finished"),
        }
    }
}

#[test]
fn converges_on_a_120_bpm_pulse_train() {
    let mut config = AppConfig::default();
    // Room for the whole clip, so an unpaced source never overruns the analysis side.
    config.audio.ring_capacity = 1 << 20;

    let backend = SyntheticBackend::pulses(PulseTrain::new(120.0), 20.0);
    let mut pipeline = BeatPipeline::new(config, Box::new(backend)).unwrap();
    let updates = pipeline.subscribe().unwrap();
    let handle = pipeline.handle();
    assert_eq!(handle.current_bpm(), 0.0);

    pipeline.start().unwrap();
    let updates = collect_updates(updates);
    pipeline.join().unwrap();

    // 882000 samples in hops of 22050; the first six hops only fill the window.
    assert_eq!(updates.len(), 35);
    for update in &updates {
        assert!(
            (update.bpm - 120.0).abs() <= 6.0,
            "window ending at {} smoothed to {} bpm",
            update.stream_position,
            update.bpm
        );
    }

    let settled: Vec<f32> = updates.iter().skip(3).map(|u| u.bpm).collect();
    let mean = settled.iter().sum::<f32>() / settled.len() as f32;
    let variance =
        settled.iter().map(|bpm| (bpm - mean).powi(2)).sum::<f32>() / settled.len() as f32;
    assert_abs_diff_eq!(mean, 120.0, epsilon = 3.0);
    assert!(variance < 1.0, "smoothed tempo wandered, variance {variance}");

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, PipelineState::Stopped);
    assert_eq!(snapshot.source, SourceStatus::Ended);
    assert_eq!(snapshot.samples_dropped, 0);
    assert_eq!(snapshot.samples_captured, 882_000);
    assert_eq!(snapshot.windows_analysed, 35);
    // The last value stays readable after the pipeline has stopped.
    assert_abs_diff_eq!(handle.current_bpm(), 120.0, epsilon = 6.0);
}

#[test]
fn stop_wakes_a_waiting_analysis_thread() {
    let mut config = AppConfig::default();
    config.analysis.hop_size = 500_000;

    // Paced silence that would run for a day: analysis waits on a hop that never arrives.
    let backend = SyntheticBackend::silence(44_100 * 86_400).realtime(true);
    let mut pipeline = BeatPipeline::new(config, Box::new(backend)).unwrap();
    let handle = pipeline.handle();
    pipeline.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.snapshot().samples_captured == 0 {
        assert!(Instant::now() < deadline, "capture never started");
        thread::sleep(Duration::from_millis(5));
    }

    let pipeline = within(Duration::from_secs(5), move || {
        pipeline.stop().unwrap();
        pipeline
    });
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(handle.current_bpm(), 0.0);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.windows_analysed, 0);
    // A capture cut short by stop() is told apart from a stream that ran out.
    assert_eq!(snapshot.source, SourceStatus::Stopped);
}

#[test]
fn dropping_a_running_pipeline_joins_its_threads() {
    let backend = SyntheticBackend::silence(u64::MAX).realtime(true);
    let mut pipeline = BeatPipeline::new(AppConfig::default(), Box::new(backend)).unwrap();
    let handle = pipeline.handle();
    pipeline.start().unwrap();

    within(Duration::from_secs(5), move || drop(pipeline));
    assert_eq!(handle.snapshot().state, PipelineState::Stopped);
}

struct UnpluggedDevice;

impl Read for UnpluggedDevice {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
    }
}

#[test]
fn failing_source_degrades_without_crashing() {
    let mut pipeline =
        BeatPipeline::new(AppConfig::default(), Box::new(RawPcmBackend::new(UnpluggedDevice)))
            .unwrap();
    let handle = pipeline.handle();
    pipeline.start().unwrap();

    let mut pipeline = within(DEADLINE, move || {
        pipeline.join().unwrap();
        pipeline
    });

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.source, SourceStatus::Failed);
    assert_eq!(snapshot.samples_captured, 0);
    assert_eq!(snapshot.bpm, 0.0);
    assert!(!snapshot.is_live());
    assert!(pipeline.stop().is_ok());
}

#[test]
fn lifecycle_is_one_way() {
    let mut pipeline =
        BeatPipeline::new(AppConfig::default(), Box::new(SyntheticBackend::silence(1_000)))
            .unwrap();
    pipeline.start().unwrap();

    let err = pipeline.start().unwrap_err();
    assert!(matches!(err, BeatMatrixError::InvalidState { .. }));
    assert_eq!(err.to_string(), "cannot start a pipeline that is running");

    let mut pipeline = within(DEADLINE, move || {
        pipeline.stop().unwrap();
        pipeline
    });
    assert!(pipeline.start().is_err());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn falling_behind_drops_samples_but_keeps_publishing() {
    let mut config = AppConfig::default();
    config.audio.sample_rate = 8_000;
    // Every read is half again the ring, so each write overruns the analysis cursor.
    config.audio.frames_per_read = 6_000;
    config.audio.ring_capacity = 4_000;
    config.analysis.hop_size = 2_000;
    config.analysis.window_size = 16_384;
    config.analysis.levels = 3;
    config.analysis.min_bpm = 60.0;
    config.analysis.max_bpm = 200.0;

    let backend = SyntheticBackend::pulses(PulseTrain::new(120.0), 8.0).realtime(true);
    let mut pipeline = BeatPipeline::new(config, Box::new(backend)).unwrap();
    let updates = pipeline.subscribe().unwrap();
    let handle = pipeline.handle();

    pipeline.start().unwrap();
    let updates = collect_updates(updates);
    pipeline.join().unwrap();

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.samples_captured, 64_000);
    assert!(snapshot.samples_dropped >= 2_000);
    assert!(snapshot.samples_dropped < snapshot.samples_captured);
    assert!(!updates.is_empty(), "no window was analysed after the overruns");
    assert_eq!(snapshot.windows_analysed, updates.len() as u64);

    // Positions keep advancing past the gaps.
    assert!(updates
        .windows(2)
        .all(|pair| pair[1].stream_position > pair[0].stream_position));
    assert_eq!(updates.last().map(|u| u.stream_position), Some(64_000));
}

/// Clicks for `pulse_frames` frames, then digital silence, as mono 16-bit.
struct PulsesThenSilence {
    train: PulseTrain,
    pulse_frames: u64,
    total_frames: u64,
}

struct PulsesThenSilenceStream {
    train: PulseTrain,
    sample_rate: u32,
    pulse_frames: u64,
    total_frames: u64,
    position: u64,
}

impl AudioBackend for PulsesThenSilence {
    fn open(&mut self, format: &StreamFormat) -> beatmatrix_core::Result<Box<dyn CaptureStream>> {
        Ok(Box::new(PulsesThenSilenceStream {
            train: self.train,
            sample_rate: format.sample_rate,
            pulse_frames: self.pulse_frames,
            total_frames: self.total_frames,
            position: 0,
        }))
    }
}

impl CaptureStream for PulsesThenSilenceStream {
    fn read_frames(&mut self, buffer: &mut [u8], frames: usize) -> beatmatrix_core::Result<usize> {
        let remaining = self.total_frames.saturating_sub(self.position);
        let count = (frames as u64).min(remaining).min(buffer.len() as u64 / 2) as usize;

        for (offset, frame) in buffer.chunks_exact_mut(2).take(count).enumerate() {
            let index = self.position + offset as u64;
            let sample = if index < self.pulse_frames {
                f32_to_sample(self.train.value_at(index, self.sample_rate))
            } else {
                0
            };
            frame.copy_from_slice(&sample.to_le_bytes());
        }

        self.position += count as u64;
        Ok(count)
    }
}

#[test]
fn discarding_silence_keeps_the_last_tempo() {
    let mut config = AppConfig::default();
    config.audio.ring_capacity = 1 << 21;
    config.analysis.discard_silence = true;
    // Keep every estimate of this run inside the median window.
    config.analysis.median_window_ms = 600_000;

    // 10 s of clicks, then 20 s of silence: most windows end up silent.
    let backend = PulsesThenSilence {
        train: PulseTrain::new(120.0),
        pulse_frames: 441_000,
        total_frames: 1_323_000,
    };
    let mut pipeline = BeatPipeline::new(config, Box::new(backend)).unwrap();
    let updates = pipeline.subscribe().unwrap();
    let handle = pipeline.handle();

    pipeline.start().unwrap();
    let updates = collect_updates(updates);
    pipeline.join().unwrap();

    let silent: Vec<&TempoUpdate> = updates.iter().filter(|u| u.raw_bpm == 0.0).collect();
    assert!(
        silent.len() > updates.len() / 2,
        "expected mostly silent windows, got {} of {}",
        silent.len(),
        updates.len()
    );

    let last = updates.last().copied().unwrap();
    assert_eq!(last.raw_bpm, 0.0);
    assert_abs_diff_eq!(last.bpm, 120.0, epsilon = 6.0);
    for update in silent {
        assert_abs_diff_eq!(update.bpm, 120.0, epsilon = 6.0);
    }
    assert_abs_diff_eq!(handle.current_bpm(), 120.0, epsilon = 6.0);
    assert_eq!(handle.raw_bpm(), 0.0);
}
