//! Synthetic capture devices for headless runs and tests.

use super::device::{
    CaptureDevice, CaptureHandle, CaptureKind, MediaTrack, SegmentSource, TrackKind,
};
use crate::error::CaptureError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::debug;

/// Camera that yields a single preview video track
pub struct SyntheticCamera {
    resolution: (u32, u32),
    failure: Option<CaptureError>,
    unanswered: bool,
}

impl SyntheticCamera {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            resolution,
            failure: None,
            unanswered: false,
        }
    }

    /// Make every acquisition fail with the given error
    pub fn failing(error: CaptureError) -> Self {
        Self {
            resolution: (0, 0),
            failure: Some(error),
            unanswered: false,
        }
    }

    /// Permission prompt nobody answers: acquisition never completes
    pub fn unanswered() -> Self {
        Self {
            resolution: (0, 0),
            failure: None,
            unanswered: true,
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCamera {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Camera
    }

    async fn open(&self) -> Result<CaptureHandle, CaptureError> {
        if self.unanswered {
            std::future::pending::<()>().await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let (width, height) = self.resolution;
        debug!("Opening synthetic camera at {}x{}", width, height);
        Ok(CaptureHandle::new(
            CaptureKind::Camera,
            vec![MediaTrack::new(
                TrackKind::Video,
                format!("synthetic-camera-{}x{}", width, height),
            )],
        ))
    }
}

/// Screen that encodes a deterministic byte pattern at a fixed rate
pub struct SyntheticScreen {
    bytes_per_second: usize,
    with_audio: bool,
    failure: Option<CaptureError>,
}

impl SyntheticScreen {
    pub fn new(bytes_per_second: usize, with_audio: bool) -> Self {
        Self {
            bytes_per_second,
            with_audio,
            failure: None,
        }
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            bytes_per_second: 0,
            with_audio: false,
            failure: Some(error),
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticScreen {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Screen
    }

    async fn open(&self) -> Result<CaptureHandle, CaptureError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let video = MediaTrack::new(TrackKind::Video, "synthetic-screen");
        let mut tracks = vec![video.clone()];
        if self.with_audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "synthetic-system-audio"));
        }

        let source = SyntheticSource::new(self.bytes_per_second, video);
        Ok(CaptureHandle::new(CaptureKind::Screen, tracks).with_source(Box::new(source)))
    }
}

/// Produces `bytes_per_second` bytes per elapsed second while its video track
/// is live
pub struct SyntheticSource {
    bytes_per_second: usize,
    video: MediaTrack,
    last_drain: Instant,
    produced: u64,
}

impl SyntheticSource {
    pub fn new(bytes_per_second: usize, video: MediaTrack) -> Self {
        Self {
            bytes_per_second,
            video,
            last_drain: Instant::now(),
            produced: 0,
        }
    }
}

impl SegmentSource for SyntheticSource {
    fn take_encoded(&mut self) -> Bytes {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_drain);
        self.last_drain = now;

        if !self.video.is_live() {
            return Bytes::new();
        }

        let len = (self.bytes_per_second as u128 * elapsed.as_millis() / 1000) as usize;
        let mut data = BytesMut::with_capacity(len);
        for offset in 0..len as u64 {
            data.extend_from_slice(&[((self.produced + offset) % 251) as u8]);
        }
        self.produced += len as u64;
        data.freeze()
    }
}
