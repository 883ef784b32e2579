use super::device::SegmentSource;
use crate::error::RecordingError;
use crate::events::{EventBus, ProctorEvent};
use crate::recording::{RecordingBuffer, RecordingPayload};
use crate::status::StatusBoard;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// One timestamped chunk of encoded screen media
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u64,
    pub captured_at: SystemTime,
    pub data: Bytes,
}

/// Periodic producer that moves encoder output into the recording buffer.
///
/// The spawned task owns the buffer exclusively; the payload comes back
/// through the join handle when the recorder is stopped.
pub struct ScreenRecorder {
    stop_token: CancellationToken,
    task: JoinHandle<Result<RecordingPayload, RecordingError>>,
}

impl ScreenRecorder {
    pub fn start(
        source: Box<dyn SegmentSource>,
        content_type: &str,
        segment_interval: Duration,
        event_bus: Arc<EventBus>,
        status: StatusBoard,
    ) -> Result<Self, RecordingError> {
        let mut buffer = RecordingBuffer::new(content_type);
        buffer.start()?;

        let stop_token = CancellationToken::new();
        let token = stop_token.clone();

        info!(
            "Starting screen recorder with {:?} segment cadence",
            segment_interval
        );

        let task = tokio::spawn(async move {
            Self::run(source, buffer, segment_interval, token, event_bus, status).await
        });

        Ok(Self { stop_token, task })
    }

    async fn run(
        mut source: Box<dyn SegmentSource>,
        mut buffer: RecordingBuffer,
        segment_interval: Duration,
        stop_token: CancellationToken,
        event_bus: Arc<EventBus>,
        status: StatusBoard,
    ) -> Result<RecordingPayload, RecordingError> {
        let started = Instant::now();
        let mut next_index = 0u64;
        let mut ticker = interval(segment_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop_token.cancelled() => break,
                _ = ticker.tick() => {
                    let elapsed = started.elapsed().as_secs();
                    buffer.set_elapsed_seconds(elapsed);
                    status.update(|s| s.recording_elapsed_seconds = elapsed);

                    Self::emit(&mut *source, &mut buffer, &mut next_index, &event_bus).await?;
                }
            }
        }

        // Final partial segment
        let elapsed = started.elapsed().as_secs();
        buffer.set_elapsed_seconds(elapsed);
        Self::emit(&mut *source, &mut buffer, &mut next_index, &event_bus).await?;
        debug!("Screen recorder flushed after {} segments", next_index);

        buffer.stop()
    }

    async fn emit(
        source: &mut dyn SegmentSource,
        buffer: &mut RecordingBuffer,
        next_index: &mut u64,
        event_bus: &EventBus,
    ) -> Result<(), RecordingError> {
        let data = source.take_encoded();
        if data.is_empty() {
            trace!("Encoder produced no data this interval");
            return Ok(());
        }

        let segment = Segment {
            index: *next_index,
            captured_at: SystemTime::now(),
            data,
        };
        *next_index += 1;

        let size_bytes = segment.data.len();
        buffer.append(segment.data)?;
        trace!(
            "Segment {} captured at {:?}",
            segment.index,
            segment.captured_at
        );

        let _ = event_bus
            .publish(ProctorEvent::SegmentRecorded {
                index: segment.index,
                size_bytes,
            })
            .await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop emission, flush the final segment, and materialize the payload
    pub async fn stop(self) -> Result<RecordingPayload, RecordingError> {
        self.stop_token.cancel();
        self.task.await.map_err(|e| RecordingError::TaskFailed {
            details: e.to_string(),
        })?
    }
}
