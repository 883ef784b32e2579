use crate::error::RecordingError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Lifecycle of a single recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingStatus {
    Idle,
    Recording,
    Stopped,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Idle => "idle",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Stopped => "stopped",
        }
    }
}

/// The materialized recording handed to the upload engine
#[derive(Debug, Clone)]
pub struct RecordingPayload {
    pub data: Bytes,
    pub content_type: String,
    pub segment_count: usize,
    pub elapsed_seconds: u64,
}

impl RecordingPayload {
    pub fn empty(content_type: &str) -> Self {
        Self {
            data: Bytes::new(),
            content_type: content_type.to_string(),
            segment_count: 0,
            elapsed_seconds: 0,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Ordered segment store for one recording session
pub struct RecordingBuffer {
    status: RecordingStatus,
    segments: Vec<Bytes>,
    total_bytes: usize,
    elapsed_seconds: u64,
    content_type: String,
}

impl RecordingBuffer {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            status: RecordingStatus::Idle,
            segments: Vec::new(),
            total_bytes: 0,
            elapsed_seconds: 0,
            content_type: content_type.into(),
        }
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    /// Begin recording, discarding any residual segments
    pub fn start(&mut self) -> Result<(), RecordingError> {
        self.expect(RecordingStatus::Idle)?;

        self.segments.clear();
        self.total_bytes = 0;
        self.elapsed_seconds = 0;
        self.status = RecordingStatus::Recording;

        info!("Recording buffer started ({})", self.content_type);
        Ok(())
    }

    /// Append a segment in arrival order
    pub fn append(&mut self, segment: Bytes) -> Result<(), RecordingError> {
        self.expect(RecordingStatus::Recording)?;

        trace!(
            "Appending segment {} ({} bytes)",
            self.segments.len(),
            segment.len()
        );
        self.total_bytes += segment.len();
        self.segments.push(segment);
        Ok(())
    }

    pub fn set_elapsed_seconds(&mut self, elapsed_seconds: u64) {
        if self.status == RecordingStatus::Recording {
            self.elapsed_seconds = elapsed_seconds;
        }
    }

    /// Stop recording and concatenate the segments into one payload.
    ///
    /// Stopping a buffer that never started yields an empty payload and leaves
    /// the buffer idle.
    pub fn stop(&mut self) -> Result<RecordingPayload, RecordingError> {
        match self.status {
            RecordingStatus::Idle => {
                debug!("Stop requested on idle recording buffer, nothing recorded");
                return Ok(RecordingPayload::empty(&self.content_type));
            }
            RecordingStatus::Stopped => {
                return Err(RecordingError::InvalidState {
                    expected: RecordingStatus::Recording.as_str(),
                    actual: self.status.as_str(),
                });
            }
            RecordingStatus::Recording => {}
        }

        self.status = RecordingStatus::Stopped;

        let segments = std::mem::take(&mut self.segments);
        let segment_count = segments.len();
        let mut data = BytesMut::with_capacity(self.total_bytes);
        for segment in segments {
            data.extend_from_slice(&segment);
        }

        info!(
            "Recording buffer stopped: {} segments, {} bytes, {}s",
            segment_count, self.total_bytes, self.elapsed_seconds
        );

        Ok(RecordingPayload {
            data: data.freeze(),
            content_type: self.content_type.clone(),
            segment_count,
            elapsed_seconds: self.elapsed_seconds,
        })
    }

    fn expect(&self, expected: RecordingStatus) -> Result<(), RecordingError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(RecordingError::InvalidState {
                expected: expected.as_str(),
                actual: self.status.as_str(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_concatenate_in_order() {
        let mut buffer = RecordingBuffer::new("video/webm");
        buffer.start().unwrap();
        buffer.append(Bytes::from_static(b"head-")).unwrap();
        buffer.append(Bytes::from_static(b"body-")).unwrap();
        buffer.append(Bytes::from_static(b"tail")).unwrap();
        buffer.set_elapsed_seconds(3);

        let payload = buffer.stop().unwrap();
        assert_eq!(payload.data, Bytes::from_static(b"head-body-tail"));
        assert_eq!(payload.size_bytes(), 14);
        assert_eq!(payload.segment_count, 3);
        assert_eq!(payload.elapsed_seconds, 3);
        assert_eq!(payload.content_type, "video/webm");
        assert_eq!(buffer.status(), RecordingStatus::Stopped);
        assert_eq!(buffer.segment_count(), 0);
    }

    #[test]
    fn test_stop_on_idle_buffer_is_noop() {
        let mut buffer = RecordingBuffer::new("video/webm");
        let payload = buffer.stop().unwrap();
        assert!(payload.is_empty());
        assert_eq!(payload.segment_count, 0);
        assert_eq!(buffer.status(), RecordingStatus::Idle);

        // Still startable afterwards
        assert!(buffer.start().is_ok());
    }

    #[test]
    fn test_stop_with_zero_segments_yields_empty_payload() {
        let mut buffer = RecordingBuffer::new("video/webm");
        buffer.start().unwrap();
        let payload = buffer.stop().unwrap();
        assert!(payload.is_empty());
        assert_eq!(buffer.status(), RecordingStatus::Stopped);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut buffer = RecordingBuffer::new("video/webm");
        assert_eq!(
            buffer.append(Bytes::from_static(b"x")),
            Err(RecordingError::InvalidState {
                expected: "recording",
                actual: "idle",
            })
        );

        buffer.start().unwrap();
        assert!(buffer.start().is_err());

        buffer.stop().unwrap();
        assert!(buffer.append(Bytes::from_static(b"late")).is_err());
        assert!(buffer.stop().is_err());
        assert!(buffer.start().is_err());
    }
}
