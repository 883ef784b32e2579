use super::device::{
    CaptureDevice, CaptureHandle, CaptureKind, PreviewTarget, SegmentSource, TrackKind,
};
use crate::error::CaptureError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of a freshly acquired stream
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureInfo {
    pub kind: CaptureKind,
    pub video_tracks: usize,
    pub audio_tracks: usize,
}

enum Slot {
    Acquiring,
    Live(CaptureHandle),
}

/// Exclusive owner of the camera and screen capture handles
pub struct MediaCaptureAdapter {
    camera: Arc<dyn CaptureDevice>,
    screen: Arc<dyn CaptureDevice>,
    preview_target: Option<PreviewTarget>,
    slots: Mutex<HashMap<CaptureKind, Slot>>,
    release_count: AtomicU64,
}

impl MediaCaptureAdapter {
    pub fn new(camera: Arc<dyn CaptureDevice>, screen: Arc<dyn CaptureDevice>) -> Self {
        Self {
            camera,
            screen,
            preview_target: None,
            slots: Mutex::new(HashMap::new()),
            release_count: AtomicU64::new(0),
        }
    }

    /// Surface the camera preview is attached to once acquired
    pub fn with_preview_target(mut self, target: PreviewTarget) -> Self {
        self.preview_target = Some(target);
        self
    }

    fn device(&self, kind: CaptureKind) -> &Arc<dyn CaptureDevice> {
        match kind {
            CaptureKind::Camera => &self.camera,
            CaptureKind::Screen => &self.screen,
        }
    }

    /// Acquire a device stream. A kind cannot be acquired twice without an
    /// intervening release.
    pub async fn acquire(&self, kind: CaptureKind) -> Result<CaptureInfo, CaptureError> {
        self.acquire_until(kind, &CancellationToken::new()).await
    }

    /// Acquire a device stream, giving up if `cancel` fires before the
    /// device answers. A cancelled acquisition leaves the slot free.
    pub async fn acquire_until(
        &self,
        kind: CaptureKind,
        cancel: &CancellationToken,
    ) -> Result<CaptureInfo, CaptureError> {
        let device = self.device(kind);
        if device.kind() != kind {
            warn!("{} slot holds a {} device", kind, device.kind());
            return Err(CaptureError::KindMismatch {
                kind,
                actual: device.kind(),
            });
        }

        {
            let mut slots = self.slots.lock();
            if slots.contains_key(&kind) {
                warn!("Refusing to acquire {} twice", kind);
                return Err(CaptureError::AlreadyAcquired { kind });
            }
            slots.insert(kind, Slot::Acquiring);
        }

        info!("Acquiring {} stream", kind);
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.slots.lock().remove(&kind);
                info!("Gave up waiting for {} stream", kind);
                return Err(CaptureError::Cancelled { kind });
            }
            opened = device.open() => opened,
        };

        let mut slots = self.slots.lock();
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                slots.remove(&kind);
                warn!("Failed to acquire {} stream: {}", kind, e);
                return Err(e);
            }
        };

        if !handle.has_track(TrackKind::Video) {
            slots.remove(&kind);
            handle.stop_tracks();
            return Err(CaptureError::NoVideoTrack { kind });
        }

        if kind == CaptureKind::Screen && !handle.has_track(TrackKind::Audio) {
            info!("Screen stream has no audio track, recording video only");
        }

        if kind == CaptureKind::Camera {
            if let Some(target) = &self.preview_target {
                handle.attach_preview(target.clone());
            }
        }

        let info = CaptureInfo {
            kind,
            video_tracks: count_tracks(&handle, TrackKind::Video),
            audio_tracks: count_tracks(&handle, TrackKind::Audio),
        };
        slots.insert(kind, Slot::Live(handle));

        info!(
            "{} stream acquired ({} video, {} audio tracks)",
            kind, info.video_tracks, info.audio_tracks
        );
        Ok(info)
    }

    /// Hand the screen encoder output to the recorder. Camera streams are
    /// preview-only and never provide a source.
    pub fn take_recording_source(&self) -> Option<Box<dyn SegmentSource>> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&CaptureKind::Screen) {
            Some(Slot::Live(handle)) => handle.take_source(),
            _ => None,
        }
    }

    /// Release a stream: stop its tracks and drop the handle.
    /// Returns false when nothing of that kind was live.
    pub fn release(&self, kind: CaptureKind) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            match slots.get(&kind) {
                Some(Slot::Live(_)) => slots.remove(&kind),
                _ => None,
            }
        };

        match removed {
            Some(Slot::Live(mut handle)) => {
                let stopped = handle.stop_tracks();
                self.release_count.fetch_add(1, Ordering::Relaxed);
                info!("Released {} stream ({} tracks stopped)", kind, stopped);
                true
            }
            _ => {
                debug!("No live {} stream to release", kind);
                false
            }
        }
    }

    /// Release both streams, returning how many were live
    pub fn release_all(&self) -> usize {
        [CaptureKind::Camera, CaptureKind::Screen]
            .into_iter()
            .filter(|kind| self.release(*kind))
            .count()
    }

    pub fn is_active(&self, kind: CaptureKind) -> bool {
        matches!(self.slots.lock().get(&kind), Some(Slot::Live(_)))
    }

    pub fn live_track_count(&self, kind: CaptureKind) -> usize {
        match self.slots.lock().get(&kind) {
            Some(Slot::Live(handle)) => handle.live_track_count(),
            _ => 0,
        }
    }

    pub fn preview_target(&self) -> Option<PreviewTarget> {
        match self.slots.lock().get(&CaptureKind::Camera) {
            Some(Slot::Live(handle)) => handle.preview().cloned(),
            _ => None,
        }
    }

    /// Number of successful releases over the adapter's lifetime
    pub fn release_count(&self) -> u64 {
        self.release_count.load(Ordering::Relaxed)
    }
}

fn count_tracks(handle: &CaptureHandle, kind: TrackKind) -> usize {
    handle
        .tracks()
        .iter()
        .filter(|track| track.kind() == kind)
        .count()
}
