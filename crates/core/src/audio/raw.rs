use std::io::{ErrorKind, Read};

use super::{AudioBackend, CaptureStream, StreamFormat};
use crate::{BeatMatrixError, Result};

/// Reads headerless interleaved PCM from any reader, e.g. stdin fed by
/// `arecord -t raw -f S16_LE -c 1 -r 44100`.
///
/// The reader is handed to the first stream that is opened.
pub struct RawPcmBackend<R> {
    reader: Option<R>,
}

impl<R: Read + Send + 'static> RawPcmBackend<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }
}

impl<R: Read + Send + 'static> AudioBackend for RawPcmBackend<R> {
    fn open(&mut self, format: &StreamFormat) -> Result<Box<dyn CaptureStream>> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| BeatMatrixError::backend("raw PCM input was already opened"))?;

        Ok(Box::new(RawPcmStream {
            reader,
            frame_bytes: format.bytes_per_frame(),
        }))
    }
}

struct RawPcmStream<R> {
    reader: R,
    frame_bytes: usize,
}

impl<R: Read + Send> CaptureStream for RawPcmStream<R> {
    fn read_frames(&mut self, buffer: &mut [u8], frames: usize) -> Result<usize> {
        let wanted = (frames * self.frame_bytes).min(buffer.len());
        let mut filled = 0;

        while filled < wanted {
            match self.reader.read(&mut buffer[filled..wanted]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(BeatMatrixError::backend(format!("read failed: {err}"))),
            }
        }

        Ok(filled / self.frame_bytes.max(1))
    }
}
