//! Capture and analysis threads wired into one tempo service.

mod analysis;

use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
};

use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioBackend, CaptureState, SampleSource, SourceStatus, StreamFormat},
    AppConfig, BeatMatrixError, Result, ShutdownToken, SyncPoint,
};

use analysis::AnalysisWorker;

/// Lifecycle of a [`BeatPipeline`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
    Stopped,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// One analysed window, as delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoUpdate {
    /// Estimator output for this window.
    pub raw_bpm: f32,
    /// Median-smoothed tempo published after this window.
    pub bpm: f32,
    /// Sample position at the end of the window.
    pub stream_position: u64,
}

/// Point-in-time view of the pipeline for consumers and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoSnapshot {
    pub bpm: f32,
    pub raw_bpm: f32,
    pub windows_analysed: u64,
    /// Samples lost because the analysis thread fell more than a ring behind.
    pub samples_dropped: u64,
    /// Write cursor of the raw sample ring; a cursor that stops moving means no input.
    pub samples_captured: u64,
    pub source: SourceStatus,
    pub state: PipelineState,
}

impl TempoSnapshot {
    /// Whether the capture side is still delivering audio.
    pub fn is_live(&self) -> bool {
        self.source == SourceStatus::Streaming && self.state == PipelineState::Running
    }
}

/// Values written by the analysis thread and read by anyone.
#[derive(Debug, Default)]
pub(crate) struct Published {
    bpm: AtomicU32,
    raw_bpm: AtomicU32,
    windows: AtomicU64,
    dropped: AtomicU64,
    state: AtomicU8,
}

impl Published {
    pub(crate) fn publish(&self, raw_bpm: f32, bpm: f32) {
        self.raw_bpm.store(raw_bpm.to_bits(), Ordering::Relaxed);
        self.bpm.store(bpm.to_bits(), Ordering::Release);
        self.windows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, samples: u64) {
        self.dropped.fetch_add(samples, Ordering::Relaxed);
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Read-only view of the published tempo. Cheap to clone and share.
#[derive(Clone)]
pub struct BpmHandle {
    published: Arc<Published>,
    sync: Arc<SyncPoint<CaptureState>>,
}

impl BpmHandle {
    /// Latest smoothed tempo; `0.0` until the first full window is analysed.
    pub fn current_bpm(&self) -> f32 {
        f32::from_bits(self.published.bpm.load(Ordering::Acquire))
    }

    /// Latest unsmoothed estimate.
    pub fn raw_bpm(&self) -> f32 {
        f32::from_bits(self.published.raw_bpm.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> TempoSnapshot {
        let (source, samples_captured) = self
            .sync
            .inspect(|state| (state.status, state.samples.latest()))
            .unwrap_or((SourceStatus::Failed, 0));

        TempoSnapshot {
            bpm: self.current_bpm(),
            raw_bpm: self.raw_bpm(),
            windows_analysed: self.published.windows.load(Ordering::Relaxed),
            samples_dropped: self.published.dropped.load(Ordering::Relaxed),
            samples_captured,
            source,
            state: PipelineState::from_u8(self.published.state.load(Ordering::Acquire)),
        }
    }
}

impl std::fmt::Debug for BpmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpmHandle")
            .field("bpm", &self.current_bpm())
            .finish()
    }
}

/// Continuously running tempo estimation service.
///
/// `start` spawns a capture thread feeding the raw sample ring and an analysis
/// thread that wakes once per hop, rectifies the new samples, estimates the
/// tempo of the freshest window and publishes the median-smoothed result.
pub struct BeatPipeline {
    config: AppConfig,
    state: PipelineState,
    shutdown: ShutdownToken,
    sync: Arc<SyncPoint<CaptureState>>,
    published: Arc<Published>,
    backend: Option<Box<dyn AudioBackend>>,
    subscriber: Option<mpsc::Sender<TempoUpdate>>,
    capture: Option<JoinHandle<SourceStatus>>,
    analysis: Option<JoinHandle<()>>,
}

impl BeatPipeline {
    /// Validates `config` and allocates the raw sample ring.
    pub fn new(config: AppConfig, backend: Box<dyn AudioBackend>) -> Result<Self> {
        config.validate()?;

        let shutdown = ShutdownToken::new();
        let state = CaptureState::new(config.audio.ring_capacity)?;
        let sync = Arc::new(SyncPoint::new(state, shutdown.clone()));

        Ok(Self {
            config,
            state: PipelineState::Idle,
            shutdown,
            sync,
            published: Arc::new(Published::default()),
            backend: Some(backend),
            subscriber: None,
            capture: None,
            analysis: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn handle(&self) -> BpmHandle {
        BpmHandle {
            published: self.published.clone(),
            sync: self.sync.clone(),
        }
    }

    pub fn current_bpm(&self) -> f32 {
        self.handle().current_bpm()
    }

    /// Returns a channel receiving one [`TempoUpdate`] per analysed window.
    /// Must be called before [`BeatPipeline::start`].
    pub fn subscribe(&mut self) -> Result<mpsc::Receiver<TempoUpdate>> {
        self.expect_state(PipelineState::Idle, "subscribe to")?;
        let (tx, rx) = mpsc::channel();
        self.subscriber = Some(tx);
        Ok(rx)
    }

    /// Spawns the analysis and capture threads.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(PipelineState::Idle, "start")?;
        let backend = self
            .backend
            .take()
            .ok_or("pipeline has no audio backend")?;

        let worker = AnalysisWorker::new(
            &self.config,
            self.sync.clone(),
            self.shutdown.clone(),
            self.published.clone(),
            self.subscriber.take(),
        )?;
        let source = SampleSource::new(
            backend,
            StreamFormat::from(&self.config.audio),
            self.config.audio.frames_per_read,
            self.sync.clone(),
            self.shutdown.clone(),
        );

        let analysis = thread::Builder::new()
            .name("tempo-analysis".to_string())
            .spawn(move || worker.run())?;
        self.analysis = Some(analysis);

        match source.spawn() {
            Ok(capture) => self.capture = Some(capture),
            Err(err) => {
                self.sync.shutdown();
                if let Err(join_err) = self.join_threads() {
                    tracing::warn!(%join_err, "analysis thread did not stop cleanly");
                }
                self.set_state(PipelineState::Stopped);
                return Err(err);
            }
        }

        self.set_state(PipelineState::Running);
        tracing::info!(
            sample_rate = self.config.audio.sample_rate,
            hop = self.config.analysis.hop_size,
            window = self.config.analysis.window_size,
            "beat pipeline started"
        );
        Ok(())
    }

    /// Requests shutdown, wakes the analysis thread and joins both threads.
    ///
    /// Stopping an idle pipeline moves it straight to `Stopped`; stopping a
    /// stopped pipeline does nothing.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Ok(());
        }

        self.sync.shutdown();
        let result = self.join_threads();
        self.set_state(PipelineState::Stopped);
        tracing::info!(bpm = self.current_bpm(), "beat pipeline stopped");
        result
    }

    /// Waits for the source to run out and the analysis thread to finish the
    /// remaining full hops. Blocks indefinitely on a source that never ends.
    pub fn join(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Stopped => Ok(()),
            PipelineState::Idle => Err(BeatMatrixError::InvalidState {
                operation: "join",
                state: self.state.as_str(),
            }),
            PipelineState::Running => {
                let result = self.join_threads();
                self.set_state(PipelineState::Stopped);
                tracing::info!(bpm = self.current_bpm(), "beat pipeline finished");
                result
            }
        }
    }

    fn join_threads(&mut self) -> Result<()> {
        let mut outcome = Ok(());

        if let Some(capture) = self.capture.take() {
            match capture.join() {
                Ok(status) => tracing::debug!(?status, "capture thread joined"),
                Err(_) => outcome = Err("audio capture thread panicked".into()),
            }
        }
        if let Some(analysis) = self.analysis.take() {
            if analysis.join().is_err() {
                outcome = Err("tempo analysis thread panicked".into());
            }
        }

        outcome
    }

    fn expect_state(&self, expected: PipelineState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BeatMatrixError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.published.set_state(state);
    }
}

impl Drop for BeatPipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            if let Err(err) = self.stop() {
                tracing::warn!(%err, "beat pipeline did not stop cleanly");
            }
        }
    }
}

impl std::fmt::Debug for BeatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeatPipeline")
            .field("state", &self.state)
            .field("bpm", &self.current_bpm())
            .finish()
    }
}
