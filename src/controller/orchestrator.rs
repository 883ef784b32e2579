use super::exam::{ExamSession, ExamStatus, TickOutcome};
use crate::config::ProctorConfig;
use crate::error::{CaptureError, ProctorError, Result, UploadError};
use crate::events::{EndReason, EventBus, ProctorEvent};
use crate::media::{CaptureKind, MediaCaptureAdapter, ScreenRecorder};
use crate::recording::RecordingPayload;
use crate::status::StatusBoard;
use crate::upload::{MultipartBackend, PartStore, UploadEngine, UploadOutcome, UploadRequest};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type UploadTask = JoinHandle<std::result::Result<UploadOutcome, UploadError>>;

/// Top-level exam coordinator. The only component that initiates
/// transitions: it owns the exam timer, the capture adapter, the recorder
/// and the upload engine.
pub struct ExamController {
    pub(super) config: ProctorConfig,
    exam: Mutex<ExamSession>,
    capture: Arc<MediaCaptureAdapter>,
    recorder: Mutex<Option<ScreenRecorder>>,
    upload: Arc<UploadEngine>,
    pub(super) event_bus: Arc<EventBus>,
    status: StatusBoard,

    // Lifecycle management
    startup_tasks: Mutex<Vec<JoinHandle<()>>>,
    startup_cancel: CancellationToken,
    pub(super) upload_task: Mutex<Option<UploadTask>>,
    pub(super) upload_cancel: CancellationToken,
    recording_stops: AtomicU64,
}

impl ExamController {
    pub fn new(
        config: ProctorConfig,
        capture: MediaCaptureAdapter,
        backend: Arc<dyn MultipartBackend>,
        store: Arc<dyn PartStore>,
    ) -> Result<Self> {
        let exam = ExamSession::new(config.exam.duration_seconds)?;
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let status = StatusBoard::new();
        status.update(|s| s.remaining_seconds = exam.remaining_seconds());

        let upload = Arc::new(UploadEngine::new(
            backend,
            store,
            config.upload.clone(),
            Arc::clone(&event_bus),
            status.clone(),
        ));

        Ok(Self {
            config,
            exam: Mutex::new(exam),
            capture: Arc::new(capture),
            recorder: Mutex::new(None),
            upload,
            event_bus,
            status,
            startup_tasks: Mutex::new(Vec::new()),
            startup_cancel: CancellationToken::new(),
            upload_task: Mutex::new(None),
            upload_cancel: CancellationToken::new(),
            recording_stops: AtomicU64::new(0),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn capture(&self) -> &MediaCaptureAdapter {
        &self.capture
    }

    pub fn upload_engine(&self) -> Arc<UploadEngine> {
        Arc::clone(&self.upload)
    }

    pub fn exam_status(&self) -> ExamStatus {
        self.exam.lock().status()
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.exam.lock().remaining_seconds()
    }

    /// Number of times a running recording was stopped
    pub fn recording_stop_count(&self) -> u64 {
        self.recording_stops.load(Ordering::Acquire)
    }

    /// Operator edit of the backend address, used by the next upload call
    pub fn set_api_base_url(&self, base_url: &str) -> Result<()> {
        self.upload.set_api_base_url(base_url)?;
        Ok(())
    }

    /// Start the exam. Camera preview and screen recording are requested in
    /// the background; their failures only raise device alerts.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let duration_seconds = {
            let mut exam = self.exam.lock();
            exam.start()?;
            exam.total_duration_seconds()
        };

        info!("Exam started with {} seconds on the clock", duration_seconds);
        self.status.update(|s| {
            s.exam_status = ExamStatus::Active;
            s.remaining_seconds = duration_seconds;
        });
        self.publish(ProctorEvent::ExamStarted {
            duration_seconds,
            timestamp: SystemTime::now(),
        })
        .await;
        self.publish(ProctorEvent::ExamTick {
            remaining_seconds: duration_seconds,
        })
        .await;

        let camera = {
            let controller = Arc::clone(self);
            tokio::spawn(async move { controller.start_camera().await })
        };
        let screen = {
            let controller = Arc::clone(self);
            tokio::spawn(async move { controller.start_recording().await })
        };
        self.startup_tasks.lock().extend([camera, screen]);

        Ok(())
    }

    pub(super) async fn start_camera(&self) {
        let info = match self
            .capture
            .acquire_until(CaptureKind::Camera, &self.startup_cancel)
            .await
        {
            Ok(info) => info,
            Err(CaptureError::Cancelled { .. }) => {
                debug!("Camera acquisition abandoned, exam is over");
                return;
            }
            Err(e) => {
                self.alert(CaptureKind::Camera, e.to_string()).await;
                return;
            }
        };

        // end() may have released everything while the device was opening
        let live = {
            let exam = self.exam.lock();
            let live = exam.status() == ExamStatus::Active;
            if live {
                self.status.update(|s| s.camera_active = true);
            }
            live
        };
        if !live {
            info!("Camera came up after the exam ended, releasing it");
            self.capture.release(CaptureKind::Camera);
            return;
        }

        debug!("Camera preview live with {} video tracks", info.video_tracks);
        self.publish(ProctorEvent::CameraStatusChanged {
            active: true,
            timestamp: SystemTime::now(),
        })
        .await;
    }

    pub(super) async fn start_recording(&self) {
        match self
            .capture
            .acquire_until(CaptureKind::Screen, &self.startup_cancel)
            .await
        {
            Ok(_) => {}
            Err(CaptureError::Cancelled { .. }) => {
                debug!("Screen acquisition abandoned, exam is over");
                return;
            }
            Err(e) => {
                self.alert(CaptureKind::Screen, e.to_string()).await;
                return;
            }
        }

        let Some(source) = self.capture.take_recording_source() else {
            self.alert(
                CaptureKind::Screen,
                "screen stream provided no encoder output".to_string(),
            )
            .await;
            return;
        };

        // The recorder is only handed over while the exam is still Active,
        // so end() either finds it or it is never started
        let started = {
            let exam = self.exam.lock();
            if exam.status() != ExamStatus::Active {
                None
            } else {
                Some(
                    ScreenRecorder::start(
                        source,
                        &self.config.capture.content_type,
                        self.config.capture.segment_interval(),
                        Arc::clone(&self.event_bus),
                        self.status.clone(),
                    )
                    .map(|recorder| {
                        *self.recorder.lock() = Some(recorder);
                        self.status.update(|s| s.recording = true);
                    }),
                )
            }
        };

        match started {
            None => {
                info!("Screen came up after the exam ended, releasing it");
                self.capture.release(CaptureKind::Screen);
            }
            Some(Ok(())) => {
                self.publish(ProctorEvent::RecordingStarted {
                    timestamp: SystemTime::now(),
                })
                .await;
            }
            Some(Err(e)) => self.alert(CaptureKind::Screen, e.to_string()).await,
        }
    }

    /// Advance the exam clock by one second
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.exam.lock().tick();
        match outcome {
            TickOutcome::Ignored => {}
            TickOutcome::Running { remaining_seconds } => {
                self.status.update(|s| s.remaining_seconds = remaining_seconds);
                self.publish(ProctorEvent::ExamTick { remaining_seconds }).await;
            }
            TickOutcome::Expired => {
                self.status.update(|s| s.remaining_seconds = 0);
                self.publish(ProctorEvent::ExamTick {
                    remaining_seconds: 0,
                })
                .await;
                self.end(EndReason::TimeExpired).await;
            }
        }
        outcome
    }

    /// End the exam: stop recording, release both devices and hand the
    /// payload to the upload engine. Returns false when there was nothing to
    /// end, which makes repeated calls harmless.
    pub async fn end(&self, reason: EndReason) -> bool {
        let remaining_seconds = {
            let mut exam = self.exam.lock();
            if !exam.end() {
                debug!("Ignoring end request in state {:?}", exam.status());
                return false;
            }
            exam.remaining_seconds()
        };

        info!(
            "Exam ended ({:?}) with {} seconds remaining",
            reason, remaining_seconds
        );
        self.status.update(|s| s.exam_status = ExamStatus::Ended);
        self.publish(ProctorEvent::ExamEnded {
            reason,
            timestamp: SystemTime::now(),
        })
        .await;

        // Abandon acquisitions still waiting on a device, then let the
        // startup tasks settle so whatever they opened is released below
        self.startup_cancel.cancel();
        let startup: Vec<_> = std::mem::take(&mut *self.startup_tasks.lock());
        for task in startup {
            if let Err(e) = task.await {
                warn!("Capture startup task failed: {}", e);
            }
        }

        let payload = self.stop_recording().await;

        let camera_was_active = self.capture.is_active(CaptureKind::Camera);
        let released = self.capture.release_all();
        debug!("Released {} capture streams", released);
        self.status.update(|s| s.camera_active = false);
        if camera_was_active {
            self.publish(ProctorEvent::CameraStatusChanged {
                active: false,
                timestamp: SystemTime::now(),
            })
            .await;
        }

        self.spawn_upload(payload);
        true
    }

    async fn stop_recording(&self) -> RecordingPayload {
        let content_type = &self.config.capture.content_type;
        let recorder = self.recorder.lock().take();
        let Some(recorder) = recorder else {
            info!("No recording was running");
            return RecordingPayload::empty(content_type);
        };

        let stopped = recorder.stop().await;
        self.recording_stops.fetch_add(1, Ordering::AcqRel);
        self.status.update(|s| s.recording = false);

        match stopped {
            Ok(payload) => {
                info!(
                    "Recording stopped: {} bytes in {} segments",
                    payload.size_bytes(),
                    payload.segment_count
                );
                self.publish(ProctorEvent::RecordingStopped {
                    size_bytes: payload.size_bytes(),
                    segment_count: payload.segment_count,
                    elapsed_seconds: payload.elapsed_seconds,
                })
                .await;
                payload
            }
            Err(e) => {
                error!("Recorder failed to stop cleanly: {}", e);
                self.publish(ProctorEvent::SystemError {
                    component: "recorder".to_string(),
                    error: e.to_string(),
                })
                .await;
                RecordingPayload::empty(content_type)
            }
        }
    }

    fn spawn_upload(&self, payload: RecordingPayload) {
        let filename = format!(
            "{}-{}.webm",
            self.config.capture.filename_prefix,
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let request = UploadRequest {
            payload: payload.data,
            filename,
            content_type: payload.content_type,
            user_id: self.config.upload.user_id.clone(),
        };

        let engine = Arc::clone(&self.upload);
        let cancel = self.upload_cancel.clone();
        let task = tokio::spawn(async move { engine.upload(request, &cancel).await });
        *self.upload_task.lock() = Some(task);
    }

    /// Wait for the upload started by `end()`. None when no upload was started.
    pub async fn wait_for_upload(&self) -> Result<Option<UploadOutcome>> {
        let task = self.upload_task.lock().take();
        match task {
            Some(task) => Self::join_upload(task.await).map(Some),
            None => Ok(None),
        }
    }

    pub(super) fn join_upload(
        joined: std::result::Result<
            std::result::Result<UploadOutcome, UploadError>,
            tokio::task::JoinError,
        >,
    ) -> Result<UploadOutcome> {
        let outcome = joined
            .map_err(|e| ProctorError::component("upload".to_string(), e.to_string()))??;
        Ok(outcome)
    }

    async fn alert(&self, kind: CaptureKind, message: String) {
        warn!("{} unavailable: {}", kind, message);
        self.publish(ProctorEvent::DeviceAlert { kind, message })
            .await;
    }

    /// A bus without subscribers is not an error for the controller
    async fn publish(&self, event: ProctorEvent) {
        let _ = self.event_bus.publish(event).await;
    }
}
