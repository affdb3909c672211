use std::{
    sync::{mpsc, Arc},
    time::Instant,
};

use super::{Published, TempoUpdate};
use crate::{
    analysis::{AmplitudeEnvelope, TempoEstimator, TimeWindowedMedian, NO_DETECTION_BPM},
    audio::{CaptureState, SourceStatus},
    AppConfig, Result, Sample, ShutdownToken, SyncPoint,
};

/// What the critical step took out of the shared ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Hop { dropped: u64, next: u64 },
    /// The source is done and less than a full hop remains.
    Finished(SourceStatus),
}

/// Body of the analysis thread: one hop of raw samples per cycle.
pub(super) struct AnalysisWorker {
    sync: Arc<SyncPoint<CaptureState>>,
    shutdown: ShutdownToken,
    hop: usize,
    position: u64,
    batch: Vec<Sample>,
    analyzer: WindowAnalyzer,
}

impl AnalysisWorker {
    pub(super) fn new(
        config: &AppConfig,
        sync: Arc<SyncPoint<CaptureState>>,
        shutdown: ShutdownToken,
        published: Arc<Published>,
        subscriber: Option<mpsc::Sender<TempoUpdate>>,
    ) -> Result<Self> {
        let analysis = &config.analysis;
        let estimator = TempoEstimator::new(analysis, config.audio.sample_rate)?;

        Ok(Self {
            sync,
            shutdown,
            hop: analysis.hop_size,
            position: 0,
            batch: vec![0; analysis.hop_size],
            analyzer: WindowAnalyzer {
                envelope: AmplitudeEnvelope::new(analysis.window_size, analysis.hop_size)?,
                window: vec![0.0; estimator.window_size()],
                estimator,
                median: TimeWindowedMedian::new(analysis.median_window()),
                discard_silence: analysis.discard_silence,
                published,
                subscriber,
            },
        })
    }

    pub(super) fn run(mut self) {
        tracing::debug!(hop = self.hop, "tempo analysis started");

        while !self.shutdown.is_requested() {
            match self.cycle() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    tracing::error!(%err, "tempo analysis stopped");
                    break;
                }
            }
        }

        tracing::debug!(position = self.position, "tempo analysis finished");
    }

    /// Waits for a hop, copies it out under the lock and analyses it after
    /// the lock is released. Returns `false` once there is nothing left to do.
    fn cycle(&mut self) -> Result<bool> {
        let hop = self.hop;
        let from = self.position;
        let mut batch = std::mem::take(&mut self.batch);
        let analyzer = &mut self.analyzer;

        let outcome = self.sync.consume(
            |state| {
                state.status.is_finished()
                    || state.samples.latest().saturating_sub(from) >= hop as u64
            },
            move |state| {
                let cycle = take_hop(state, from, &mut batch);
                (cycle, batch)
            },
            |(cycle, batch)| {
                let progress = cycle.and_then(|cycle| analyzer.process(cycle, &batch));
                (progress, batch)
            },
        )?;

        let Some((progress, batch)) = outcome else {
            return Ok(false);
        };
        self.batch = batch;

        match progress? {
            Cycle::Hop { next, .. } => {
                self.position = next;
                Ok(true)
            }
            Cycle::Finished(status) => {
                tracing::debug!(?status, "audio source finished");
                Ok(false)
            }
        }
    }
}

/// Critical step: overrun bookkeeping and a copy of the next hop.
fn take_hop(state: &CaptureState, from: u64, batch: &mut [Sample]) -> Result<Cycle> {
    let oldest = state.samples.oldest();
    let (start, dropped) = if from < oldest {
        (oldest, oldest - from)
    } else {
        (from, 0)
    };

    if state.samples.latest().saturating_sub(start) < batch.len() as u64 {
        return Ok(Cycle::Finished(state.status));
    }

    let span = state.samples.read_at(start, batch)?;
    Ok(Cycle::Hop {
        dropped,
        next: span.next,
    })
}

struct WindowAnalyzer {
    envelope: AmplitudeEnvelope,
    estimator: TempoEstimator,
    median: TimeWindowedMedian<f32>,
    window: Vec<f32>,
    discard_silence: bool,
    published: Arc<Published>,
    subscriber: Option<mpsc::Sender<TempoUpdate>>,
}

impl WindowAnalyzer {
    fn process(&mut self, cycle: Cycle, batch: &[Sample]) -> Result<Cycle> {
        let Cycle::Hop { dropped, next } = cycle else {
            return Ok(cycle);
        };

        if dropped > 0 {
            self.published.record_dropped(dropped);
            tracing::warn!(dropped, position = next, "analysis fell behind, samples skipped");
        }

        self.envelope.push(batch);
        if !self.envelope.is_primed() {
            return Ok(cycle);
        }

        self.envelope.window(&mut self.window);
        let raw_bpm = self.estimator.compute_window_bpm(&self.window)?;
        let bpm = if self.discard_silence && raw_bpm == NO_DETECTION_BPM {
            self.median.median().unwrap_or(NO_DETECTION_BPM)
        } else {
            self.median.offer(raw_bpm, Instant::now())
        };

        self.published.publish(raw_bpm, bpm);
        tracing::debug!(raw_bpm, bpm, position = next, "window analysed");

        if let Some(subscriber) = &self.subscriber {
            let update = TempoUpdate {
                raw_bpm,
                bpm,
                stream_position: next,
            };
            if subscriber.send(update).is_err() {
                tracing::debug!("tempo subscriber went away");
                self.subscriber = None;
            }
        }

        Ok(cycle)
    }
}
