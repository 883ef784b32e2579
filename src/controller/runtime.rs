use super::exam::ExamStatus;
use super::ExamController;
use crate::error::{EventBusError, Result};
use crate::events::{EndReason, EventFilter, ProctorEvent};
use crate::upload::UploadOutcome;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl ExamController {
    /// Run one exam attempt: start, tick until Ended, then wait for the
    /// upload. Explicit end requests arrive on the event bus; `shutdown`
    /// ends the exam early.
    pub async fn run(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<Option<UploadOutcome>> {
        let mut requests = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["end_requested", "shutdown_requested"]),
            "exam-runtime",
        );

        self.start().await?;

        let mut ticker = interval(self.config.exam.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        while self.exam_status() == ExamStatus::Active {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested during exam");
                    self.end(EndReason::Requested).await;
                }
                request = requests.recv() => match request {
                    Ok(ProctorEvent::EndRequested { .. }) => {
                        self.end(EndReason::Requested).await;
                    }
                    Ok(ProctorEvent::ShutdownRequested { reason, .. }) => {
                        debug!("Shutdown event received: {}", reason);
                        shutdown.cancel();
                    }
                    Ok(_) | Err(EventBusError::Lagged { .. }) => {}
                    Err(e) => {
                        warn!("Exam runtime lost its request channel: {}", e);
                        self.end(EndReason::Requested).await;
                    }
                },
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.finish(&shutdown).await
    }

    /// Wait for the upload. With `cancel_on_shutdown` a shutdown cancels it,
    /// otherwise the upload is always allowed to finish.
    async fn finish(&self, shutdown: &CancellationToken) -> Result<Option<UploadOutcome>> {
        let task = self.upload_task.lock().take();
        let Some(mut task) = task else {
            return Ok(None);
        };

        let joined = if self.config.upload.cancel_on_shutdown {
            tokio::select! {
                joined = &mut task => joined,
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested, cancelling upload");
                    self.upload_cancel.cancel();
                    task.await
                }
            }
        } else {
            task.await
        };

        Self::join_upload(joined).map(Some)
    }

    /// Request an early end from outside the runtime loop
    pub async fn request_end(&self) {
        let _ = self
            .event_bus
            .publish(ProctorEvent::EndRequested {
                timestamp: SystemTime::now(),
            })
            .await;
    }
}

/// Cancel `shutdown` on SIGINT, and on SIGTERM where available
pub fn spawn_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        token.cancel();
                    }
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            shutdown.cancel();
        }
    });
}
