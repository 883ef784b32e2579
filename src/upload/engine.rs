use super::backend::{CompletedPart, CreateSessionRequest, MultipartBackend, PartStore};
use super::progress::{ProgressTracker, UploadOutcome, UploadReceipt, UploadStatus};
use super::session::{SessionId, UploadPart, UploadPlan, UploadSession};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::events::{EventBus, ProctorEvent};
use crate::recovery::{retry_step, RetryPolicy};
use crate::status::StatusBoard;
use bytes::Bytes;
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One payload to deliver through the multipart protocol
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub payload: Bytes,
    pub filename: String,
    pub content_type: String,
    pub user_id: String,
}

/// Drives create → per-part (authorize, transfer, register) → finalize
/// against a backend and a part store.
pub struct UploadEngine {
    backend: Arc<dyn MultipartBackend>,
    store: Arc<dyn PartStore>,
    config: UploadConfig,
    policy: RetryPolicy,
    event_bus: Arc<EventBus>,
    status: StatusBoard,
    // Plan of the last failed upload, kept so finalize can be retried alone
    retained: Mutex<Option<UploadPlan>>,
}

impl UploadEngine {
    pub fn new(
        backend: Arc<dyn MultipartBackend>,
        store: Arc<dyn PartStore>,
        config: UploadConfig,
        event_bus: Arc<EventBus>,
        status: StatusBoard,
    ) -> Self {
        let policy = RetryPolicy::from(&config.retry);
        Self {
            backend,
            store,
            config,
            policy,
            event_bus,
            status,
            retained: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Plan of the last failed upload, if it was not aborted
    pub fn retained_plan(&self) -> Option<UploadPlan> {
        self.retained.lock().clone()
    }

    /// Repoint the backend. Takes effect for the next protocol call.
    pub fn set_api_base_url(&self, base_url: &str) -> Result<(), UploadError> {
        self.backend.set_base_url(base_url)
    }

    /// Upload a whole payload. A zero-length payload never reaches the backend.
    pub async fn upload(
        &self,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        if request.payload.is_empty() {
            info!("Recording is empty, nothing to upload");
            self.set_status(UploadStatus::NothingToUpload).await;
            return Ok(UploadOutcome::NothingToUpload);
        }

        let size = request.payload.len() as u64;
        info!(
            "Starting upload of {} ({} bytes, {})",
            request.filename, size, request.content_type
        );
        self.set_status(UploadStatus::CreatingSession).await;

        let create = CreateSessionRequest {
            filename: request.filename.clone(),
            content_type: request.content_type.clone(),
            size,
            user_id: request.user_id.clone(),
        };
        let created = match retry_step(&self.policy, "create", cancel, || {
            self.backend.create_session(&create)
        })
        .await
        {
            Ok(created) => created,
            Err(err) => {
                error!("Upload session creation failed: {}", err);
                self.set_status(UploadStatus::failed(&err, 0)).await;
                return Err(err);
            }
        };

        let part_size_bytes = match created.part_size {
            Some(part_size) if part_size > 0 => part_size,
            _ => self.config.part_size_bytes,
        };
        let plan = match UploadPlan::new(UploadSession {
            id: created.id.clone(),
            filename: request.filename,
            content_type: request.content_type,
            total_size_bytes: size,
            part_size_bytes,
        }) {
            Ok(plan) => plan,
            Err(err) => {
                error!("Upload session {} is unusable: {}", created.id, err);
                self.set_status(UploadStatus::failed(&err, 0)).await;
                return Err(err);
            }
        };
        info!(
            "Upload session {} created: {} parts of up to {} bytes",
            plan.session.id,
            plan.total_parts(),
            part_size_bytes
        );

        self.run_plan(plan, request.payload, cancel).await
    }

    /// Continue an existing session, uploading only the parts the backend
    /// has not registered yet.
    pub async fn resume(
        &self,
        session_id: &SessionId,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let remote = retry_step(&self.policy, "status", cancel, || {
            self.backend.session_status(session_id)
        })
        .await?;

        if !remote.status.is_open() {
            warn!(
                "Upload session {} is {}, not resuming",
                session_id, remote.status
            );
            return Err(UploadError::SessionClosed {
                session_id: session_id.to_string(),
                state: remote.status,
            });
        }

        let size = payload.len() as u64;
        if let Some(remote_size) = remote.size {
            if remote_size != size {
                return Err(UploadError::StatusQueryFailed {
                    details: format!(
                        "session {} expects {} bytes, payload has {}",
                        session_id, remote_size, size
                    ),
                });
            }
        }

        let part_size_bytes = match remote.part_size {
            Some(part_size) if part_size > 0 => part_size,
            _ => self.config.part_size_bytes,
        };
        let mut plan = UploadPlan::new(UploadSession {
            id: session_id.clone(),
            filename: remote.filename,
            content_type: remote.content_type,
            total_size_bytes: size,
            part_size_bytes,
        })?;
        let already = plan.mark_registered(&remote.parts);
        info!(
            "Resuming upload session {} ({}/{} parts already registered)",
            session_id,
            already,
            plan.total_parts()
        );

        self.run_plan(plan, payload, cancel).await
    }

    /// Retry only the finalize step of the last failed upload
    pub async fn finalize(&self, cancel: &CancellationToken) -> Result<UploadOutcome, UploadError> {
        let plan = self
            .retained
            .lock()
            .clone()
            .ok_or_else(|| UploadError::FinalizationFailed {
                details: "no upload is awaiting finalization".to_string(),
            })?;

        match self.finalize_plan(&plan, cancel).await {
            Ok(receipt) => {
                self.retained.lock().take();
                Ok(UploadOutcome::Completed(receipt))
            }
            Err(err) => Err(self.fail(plan, err).await),
        }
    }

    /// Release a server-side session
    pub async fn abort(&self, session_id: &SessionId) -> Result<(), UploadError> {
        warn!("Aborting upload session {}", session_id);
        self.backend.abort(session_id).await?;

        let mut retained = self.retained.lock();
        if retained
            .as_ref()
            .is_some_and(|plan| plan.session.id == *session_id)
        {
            *retained = None;
        }
        Ok(())
    }

    async fn run_plan(
        &self,
        plan: UploadPlan,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let tracker = ProgressTracker::new(plan.registered_count(), plan.total_parts());
        self.set_status(UploadStatus::Uploading {
            registered_parts: tracker.registered(),
            total_parts: tracker.total(),
        })
        .await;

        let pending: Vec<UploadPart> = plan
            .parts
            .iter()
            .filter(|part| !part.is_registered())
            .cloned()
            .collect();
        let session = plan.session.clone();
        let shared = Mutex::new(plan);

        let transferred = self
            .transfer_pending(&session, &pending, &payload, &tracker, &shared, cancel)
            .await;
        let plan = shared.into_inner();

        let result = match transferred {
            Ok(()) => self.finalize_plan(&plan, cancel).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(receipt) => {
                self.retained.lock().take();
                Ok(UploadOutcome::Completed(receipt))
            }
            Err(err) => Err(self.fail(plan, err).await),
        }
    }

    /// Run the per-part loop. With one worker parts go strictly in order;
    /// more workers share a cursor and the call returns once all are done.
    async fn transfer_pending(
        &self,
        session: &UploadSession,
        pending: &[UploadPart],
        payload: &Bytes,
        tracker: &ProgressTracker,
        plan: &Mutex<UploadPlan>,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        if pending.is_empty() {
            return Ok(());
        }

        let cursor = AtomicUsize::new(0);
        let workers = self.config.max_concurrent_parts.clamp(1, pending.len());
        if workers > 1 {
            debug!("Uploading {} parts with {} workers", pending.len(), workers);
        }

        let cursor = &cursor;
        let tasks = (0..workers).map(move |_| async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::AcqRel);
                let Some(part) = pending.get(index) else {
                    return Ok::<(), UploadError>(());
                };

                self.upload_part(session, part, payload, plan, cancel).await?;

                let (registered_parts, percent) = tracker.record();
                let total_parts = tracker.total();
                debug!(
                    "Part {} registered ({}/{}, {}%)",
                    part.part_number, registered_parts, total_parts, percent
                );
                let _ = self
                    .event_bus
                    .publish(ProctorEvent::UploadProgress {
                        registered_parts,
                        total_parts,
                        percent,
                    })
                    .await;
                self.set_status(UploadStatus::Uploading {
                    registered_parts,
                    total_parts,
                })
                .await;
            }
        });

        try_join_all(tasks).await.map(|_| ())
    }

    /// Authorize, transfer and register one part, recording each
    /// transition in the shared plan as it happens
    async fn upload_part(
        &self,
        session: &UploadSession,
        part: &UploadPart,
        payload: &Bytes,
        plan: &Mutex<UploadPlan>,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let part_number = part.part_number;

        let target = retry_step(&self.policy, "authorize", cancel, || {
            self.backend.authorize_part(&session.id, part_number)
        })
        .await?;
        plan.lock().mark_authorized(part_number);

        let body = payload.slice(part.byte_range.start as usize..part.byte_range.end as usize);
        let etag = retry_step(&self.policy, "transfer", cancel, || {
            self.store
                .put_part(&target, part_number, &session.content_type, body.clone())
        })
        .await?;
        debug!("Part {} transferred ({} bytes)", part_number, part.len());
        plan.lock().mark_uploaded(part_number, etag.clone());

        let completed = CompletedPart { part_number, etag };
        retry_step(&self.policy, "register", cancel, || {
            self.backend.register_part(&session.id, &completed)
        })
        .await?;
        plan.lock().mark_part_registered(part_number);

        Ok(())
    }

    async fn finalize_plan(
        &self,
        plan: &UploadPlan,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        // Rejected locally before any network call
        let parts = plan.completed_parts()?;

        self.set_status(UploadStatus::Finalizing).await;
        let file_url = retry_step(&self.policy, "finalize", cancel, || {
            self.backend.complete(&plan.session.id, &parts)
        })
        .await?;

        info!(
            "Upload session {} finalized at {}",
            plan.session.id, file_url
        );
        self.set_status(UploadStatus::Completed {
            file_url: file_url.clone(),
        })
        .await;

        Ok(UploadReceipt {
            session_id: plan.session.id.clone(),
            file_url,
            total_parts: plan.total_parts(),
            size_bytes: plan.session.total_size_bytes,
        })
    }

    /// Publish the terminal failure and decide what to keep of the session
    async fn fail(&self, plan: UploadPlan, err: UploadError) -> UploadError {
        let last_percent = plan.progress_percent();
        match &err {
            UploadError::Cancelled => warn!(
                "Upload session {} cancelled at {}%",
                plan.session.id, last_percent
            ),
            _ => error!(
                "Upload session {} failed during {} at {}%: {}",
                plan.session.id,
                err.step(),
                last_percent,
                err
            ),
        }
        self.set_status(UploadStatus::failed(&err, last_percent))
            .await;

        if self.config.abort_on_failure {
            if let Err(abort_err) = self.backend.abort(&plan.session.id).await {
                warn!("Could not abort session {}: {}", plan.session.id, abort_err);
            }
            self.retained.lock().take();
        } else {
            *self.retained.lock() = Some(plan);
        }

        err
    }

    async fn set_status(&self, status: UploadStatus) {
        let percent = match &status {
            UploadStatus::Uploading {
                registered_parts,
                total_parts,
            } => Some(super::session::progress_percent(
                *registered_parts,
                *total_parts,
            )),
            UploadStatus::Completed { .. } => Some(100),
            UploadStatus::CreatingSession => Some(0),
            _ => None,
        };

        self.status.update(|s| {
            s.upload_status = status.clone();
            if let Some(percent) = percent {
                s.upload_percent = percent;
            }
        });
        let _ = self
            .event_bus
            .publish(ProctorEvent::UploadStatusChanged { status })
            .await;
    }
}
