use crate::error::CaptureError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// The two device streams an exam uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Preview-only, never recorded
    Camera,
    /// Screen video plus optional audio, recorded
    Screen,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Camera => write!(f, "camera"),
            CaptureKind::Screen => write!(f, "screen"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A live media track. Clones share the same liveness flag so the producing
/// device observes when the consumer stops it.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop the track, returning whether it was still live
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

/// Opaque identifier of the surface a camera preview is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewTarget(pub String);

/// Encoder output of a live screen stream
pub trait SegmentSource: Send {
    /// Drain whatever the encoder produced since the previous call
    fn take_encoded(&mut self) -> Bytes;
}

/// An acquired device stream
pub struct CaptureHandle {
    kind: CaptureKind,
    tracks: Vec<MediaTrack>,
    preview: Option<PreviewTarget>,
    source: Option<Box<dyn SegmentSource>>,
    acquired_at: SystemTime,
}

impl CaptureHandle {
    pub fn new(kind: CaptureKind, tracks: Vec<MediaTrack>) -> Self {
        Self {
            kind,
            tracks,
            preview: None,
            source: None,
            acquired_at: SystemTime::now(),
        }
    }

    /// Attach the encoder output for a recordable stream
    pub fn with_source(mut self, source: Box<dyn SegmentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|track| track.kind() == kind)
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.is_live()).count()
    }

    pub fn attach_preview(&mut self, target: PreviewTarget) {
        self.preview = Some(target);
    }

    pub fn preview(&self) -> Option<&PreviewTarget> {
        self.preview.as_ref()
    }

    pub(crate) fn take_source(&mut self) -> Option<Box<dyn SegmentSource>> {
        self.source.take()
    }

    /// Stop every track and detach the preview; returns how many tracks were live
    pub(crate) fn stop_tracks(&mut self) -> usize {
        self.preview = None;
        self.tracks.iter().filter(|track| track.stop()).count()
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("kind", &self.kind)
            .field("tracks", &self.tracks)
            .field("preview", &self.preview)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

/// A capturable device (camera or screen)
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    fn kind(&self) -> CaptureKind;

    /// Open the device and return its live stream
    async fn open(&self) -> Result<CaptureHandle, CaptureError>;
}
