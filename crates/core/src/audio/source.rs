use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use super::{AudioBackend, CaptureState, Sample, SourceStatus, StreamFormat};
use crate::{Result, ShutdownToken, SyncPoint};

/// Pulls fixed-size reads from a backend into the shared sample ring.
///
/// Runs on its own thread. Backend failures end this thread only; the final
/// [`SourceStatus`] is published through the sync point so the analysis side
/// can tell a stalled source from a slow one.
pub struct SampleSource {
    backend: Box<dyn AudioBackend>,
    format: StreamFormat,
    frames_per_read: usize,
    sync: Arc<SyncPoint<CaptureState>>,
    shutdown: ShutdownToken,
}

impl SampleSource {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        format: StreamFormat,
        frames_per_read: usize,
        sync: Arc<SyncPoint<CaptureState>>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            backend,
            format,
            frames_per_read,
            sync,
            shutdown,
        }
    }

    /// Spawns the capture thread.
    pub fn spawn(self) -> Result<JoinHandle<SourceStatus>> {
        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Captures until the stream ends, fails, or shutdown is requested.
    pub fn run(mut self) -> SourceStatus {
        let status = match self.capture() {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(%err, "audio capture stopped");
                SourceStatus::Failed
            }
        };

        if let Err(err) = self.sync.produce(|state| state.status = status) {
            tracing::error!(%err, "could not publish source status");
        }
        status
    }

    fn capture(&mut self) -> Result<SourceStatus> {
        let mut stream = self.backend.open(&self.format)?;
        tracing::info!(
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            bits = self.format.bits_per_sample,
            frames = self.frames_per_read,
            "audio source opened"
        );
        self.sync
            .produce(|state| state.status = SourceStatus::Streaming)?;

        let frame_bytes = self.format.bytes_per_frame();
        let mut bytes = vec![0u8; self.frames_per_read * frame_bytes];
        let mut samples: Vec<Sample> = vec![0; self.frames_per_read];

        while !self.shutdown.is_requested() {
            let frames = stream
                .read_frames(&mut bytes, self.frames_per_read)?
                .min(self.frames_per_read);
            if frames == 0 {
                tracing::info!("audio source reached end of stream");
                return Ok(SourceStatus::Ended);
            }

            let count = self.format.decode(&bytes[..frames * frame_bytes], &mut samples);
            self.sync
                .produce(|state| state.samples.write(&samples[..count]))?;
        }

        tracing::info!("audio source stopped on request");
        Ok(SourceStatus::Stopped)
    }
}

impl std::fmt::Debug for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleSource")
            .field("format", &self.format)
            .field("frames_per_read", &self.frames_per_read)
            .finish()
    }
}
