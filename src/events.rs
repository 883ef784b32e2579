use crate::error::EventBusError;
use crate::media::CaptureKind;
use crate::upload::UploadStatus;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Why an exam reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    TimeExpired,
    Requested,
}

/// Events that can occur in the proctoring pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProctorEvent {
    /// Exam timer started
    ExamStarted {
        duration_seconds: u64,
        timestamp: SystemTime,
    },
    /// One timer tick elapsed
    ExamTick { remaining_seconds: u64 },
    /// Exam reached its terminal state
    ExamEnded {
        reason: EndReason,
        timestamp: SystemTime,
    },
    /// Operator asked for the exam to end early
    EndRequested { timestamp: SystemTime },
    /// Camera preview became active or inactive
    CameraStatusChanged {
        active: bool,
        timestamp: SystemTime,
    },
    /// Screen recording started
    RecordingStarted { timestamp: SystemTime },
    /// A recorded segment entered the recording buffer
    SegmentRecorded { index: u64, size_bytes: usize },
    /// Screen recording stopped and the payload was materialized
    RecordingStopped {
        size_bytes: u64,
        segment_count: usize,
        elapsed_seconds: u64,
    },
    /// Upload progress after a part was registered
    UploadProgress {
        registered_parts: u32,
        total_parts: u32,
        percent: u8,
    },
    /// Upload status transition
    UploadStatusChanged { status: UploadStatus },
    /// Non-fatal capture problem the operator should see
    DeviceAlert { kind: CaptureKind, message: String },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl ProctorEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ProctorEvent::ExamStarted {
                duration_seconds, ..
            } => format!("Exam started ({} seconds)", duration_seconds),
            ProctorEvent::ExamTick { remaining_seconds } => {
                format!("{} seconds remaining", remaining_seconds)
            }
            ProctorEvent::ExamEnded { reason, .. } => format!("Exam ended: {:?}", reason),
            ProctorEvent::EndRequested { .. } => "Exam end requested".to_string(),
            ProctorEvent::CameraStatusChanged { active, .. } => {
                format!("Camera {}", if *active { "active" } else { "inactive" })
            }
            ProctorEvent::RecordingStarted { .. } => "Recording started".to_string(),
            ProctorEvent::SegmentRecorded { index, size_bytes } => {
                format!("Segment {} recorded ({} bytes)", index, size_bytes)
            }
            ProctorEvent::RecordingStopped {
                size_bytes,
                segment_count,
                elapsed_seconds,
            } => format!(
                "Recording stopped: {} bytes in {} segments over {}s",
                size_bytes, segment_count, elapsed_seconds
            ),
            ProctorEvent::UploadProgress {
                registered_parts,
                total_parts,
                percent,
            } => format!(
                "Upload {}% ({}/{} parts)",
                percent, registered_parts, total_parts
            ),
            ProctorEvent::UploadStatusChanged { status } => format!("Upload: {}", status),
            ProctorEvent::DeviceAlert { kind, message } => {
                format!("{} alert: {}", kind, message)
            }
            ProctorEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            ProctorEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ProctorEvent::ExamStarted { .. } => "exam_started",
            ProctorEvent::ExamTick { .. } => "exam_tick",
            ProctorEvent::ExamEnded { .. } => "exam_ended",
            ProctorEvent::EndRequested { .. } => "end_requested",
            ProctorEvent::CameraStatusChanged { .. } => "camera_status_changed",
            ProctorEvent::RecordingStarted { .. } => "recording_started",
            ProctorEvent::SegmentRecorded { .. } => "segment_recorded",
            ProctorEvent::RecordingStopped { .. } => "recording_stopped",
            ProctorEvent::UploadProgress { .. } => "upload_progress",
            ProctorEvent::UploadStatusChanged { .. } => "upload_status_changed",
            ProctorEvent::DeviceAlert { .. } => "device_alert",
            ProctorEvent::SystemError { .. } => "system_error",
            ProctorEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProctorEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ProctorEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter attached
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: ProctorEvent) -> Result<usize, EventBusError> {
        match &event {
            ProctorEvent::ExamStarted { .. } | ProctorEvent::ExamEnded { .. } => {
                info!("{}", event.description());
            }
            ProctorEvent::DeviceAlert { kind, message } => {
                warn!("Capture alert for {}: {}", kind, message);
            }
            ProctorEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            ProctorEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&ProctorEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &ProctorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ProctorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<ProctorEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<ProctorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<ProctorEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
