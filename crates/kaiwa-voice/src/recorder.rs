//! Capture recorder
//!
//! Buffers the audio chunks that arrive between utterance-start and
//! utterance-end, and seals them into one immutable blob in arrival order.
//! Captures below the minimum byte threshold are discarded as clipped or
//! false-positive triggers.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

/// One finished utterance: the sealed blob plus capture metadata.
#[derive(Debug, Clone)]
pub struct CapturedUtterance {
    /// Chunk bytes concatenated in arrival order.
    pub bytes: Vec<u8>,

    /// How many chunks made up the blob.
    pub chunk_count: usize,

    /// Wall time between begin and end of capture.
    pub duration: Duration,

    /// When the capture was sealed.
    pub captured_at: DateTime<Utc>,
}

/// Outcome of sealing a capture buffer.
#[derive(Debug)]
pub enum FinalizedCapture {
    /// The blob met the minimum size and is ready for transcription.
    Utterance(CapturedUtterance),

    /// Too small to be meaningful speech; discard, do not transcribe.
    TooShort { bytes: usize },
}

struct CaptureBuffer {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
    opened_at: Instant,
}

/// Owns start/stop of raw audio buffering for the current utterance window.
pub struct CaptureRecorder {
    buffer: Option<CaptureBuffer>,
    min_capture_bytes: usize,
}

impl CaptureRecorder {
    pub fn new(min_capture_bytes: usize) -> Self {
        Self {
            buffer: None,
            min_capture_bytes,
        }
    }

    /// Open a new capture buffer. No-op (returns false) when a capture is
    /// already open; the controller additionally refuses to call this while
    /// the processing lock is held.
    pub fn begin_capture(&mut self) -> bool {
        if self.buffer.is_some() {
            debug!("begin_capture ignored: capture already open");
            return false;
        }
        self.buffer = Some(CaptureBuffer {
            chunks: Vec::new(),
            total_bytes: 0,
            opened_at: Instant::now(),
        });
        true
    }

    /// Append one chunk to the open buffer. Ignored when no capture is open.
    pub fn append_chunk(&mut self, bytes: &[u8]) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.total_bytes += bytes.len();
            buffer.chunks.push(bytes.to_vec());
        }
    }

    /// Seal the open buffer into one immutable blob. Returns `None` when no
    /// capture is open. Completion of the downstream handoff is signalled
    /// asynchronously by the controller; callers must not assume the blob is
    /// transcribed by the time this returns.
    pub fn end_capture(&mut self) -> Option<FinalizedCapture> {
        let buffer = self.buffer.take()?;
        let duration = buffer.opened_at.elapsed();

        if buffer.total_bytes < self.min_capture_bytes {
            debug!(
                "Capture too short ({} bytes < {} minimum), discarding",
                buffer.total_bytes, self.min_capture_bytes
            );
            return Some(FinalizedCapture::TooShort {
                bytes: buffer.total_bytes,
            });
        }

        let mut bytes = Vec::with_capacity(buffer.total_bytes);
        let chunk_count = buffer.chunks.len();
        for chunk in &buffer.chunks {
            bytes.extend_from_slice(chunk);
        }

        Some(FinalizedCapture::Utterance(CapturedUtterance {
            bytes,
            chunk_count,
            duration,
            captured_at: Utc::now(),
        }))
    }

    /// Discard the open buffer unconditionally (forced interrupt, teardown).
    /// Returns the number of bytes dropped, if a capture was open.
    pub fn abort(&mut self) -> Option<usize> {
        self.buffer.take().map(|b| b.total_bytes)
    }

    /// Whether a capture buffer is currently open.
    pub fn is_capturing(&self) -> bool {
        self.buffer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_capture_is_idempotent() {
        let mut recorder = CaptureRecorder::new(0);
        assert!(recorder.begin_capture());
        recorder.append_chunk(&[1, 2, 3]);

        // A second begin must not create a second buffer.
        assert!(!recorder.begin_capture());
        recorder.append_chunk(&[4]);

        match recorder.end_capture() {
            Some(FinalizedCapture::Utterance(utt)) => {
                assert_eq!(utt.bytes, vec![1, 2, 3, 4]);
                assert_eq!(utt.chunk_count, 2);
            }
            other => panic!("expected utterance, got {:?}", other),
        }
    }

    #[test]
    fn chunks_concatenate_in_arrival_order() {
        let mut recorder = CaptureRecorder::new(4);
        assert!(recorder.begin_capture());
        recorder.append_chunk(&[10, 11]);
        recorder.append_chunk(&[]);
        recorder.append_chunk(&[12]);
        recorder.append_chunk(&[13, 14]);

        match recorder.end_capture() {
            Some(FinalizedCapture::Utterance(utt)) => {
                assert_eq!(utt.bytes, vec![10, 11, 12, 13, 14]);
                assert_eq!(utt.chunk_count, 4);
            }
            other => panic!("expected utterance, got {:?}", other),
        }
        assert!(!recorder.is_capturing());
    }

    #[test]
    fn short_captures_are_discarded() {
        let mut recorder = CaptureRecorder::new(1000);
        assert!(recorder.begin_capture());
        recorder.append_chunk(&[0u8; 800]);

        match recorder.end_capture() {
            Some(FinalizedCapture::TooShort { bytes }) => assert_eq!(bytes, 800),
            other => panic!("expected too-short, got {:?}", other),
        }
    }

    #[test]
    fn end_without_begin_is_a_noop() {
        let mut recorder = CaptureRecorder::new(0);
        assert!(recorder.end_capture().is_none());
    }

    #[test]
    fn chunks_outside_a_window_are_ignored() {
        let mut recorder = CaptureRecorder::new(0);
        recorder.append_chunk(&[1, 2, 3]);
        assert!(recorder.begin_capture());
        recorder.append_chunk(&[4]);

        match recorder.end_capture() {
            Some(FinalizedCapture::Utterance(utt)) => assert_eq!(utt.bytes, vec![4]),
            other => panic!("expected utterance, got {:?}", other),
        }
    }

    #[test]
    fn abort_discards_the_buffer() {
        let mut recorder = CaptureRecorder::new(0);
        assert!(recorder.begin_capture());
        recorder.append_chunk(&[1, 2, 3]);

        assert_eq!(recorder.abort(), Some(3));
        assert!(!recorder.is_capturing());
        assert!(recorder.end_capture().is_none());
        assert_eq!(recorder.abort(), None);
    }
}
