use crate::media::CaptureKind;
use crate::upload::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Exam error: {0}")]
    Exam(#[from] ExamError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ProctorError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Device acquisition failures. These degrade the exam, they never abort it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Permission denied for {kind} capture: {details}")]
    PermissionDenied { kind: CaptureKind, details: String },

    #[error("{kind} device unavailable: {details}")]
    DeviceUnavailable { kind: CaptureKind, details: String },

    #[error("{kind} capture is already acquired")]
    AlreadyAcquired { kind: CaptureKind },

    #[error("{kind} stream has no video track")]
    NoVideoTrack { kind: CaptureKind },

    #[error("{kind} slot is wired to a {actual} device")]
    KindMismatch {
        kind: CaptureKind,
        actual: CaptureKind,
    },

    #[error("{kind} acquisition cancelled")]
    Cancelled { kind: CaptureKind },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordingError {
    #[error("Recording buffer is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Recorder is not running")]
    NotRunning,

    #[error("Recorder task failed: {details}")]
    TaskFailed { details: String },
}

/// Upload protocol failures, one per protocol step plus local guards.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Failed to create upload session: {details}")]
    SessionCreationFailed { details: String },

    #[error("Failed to authorize part {part_number}: {details}")]
    PartAuthorizationFailed { part_number: u32, details: String },

    #[error("Failed to transfer part {part_number}: {details}")]
    PartTransferFailed { part_number: u32, details: String },

    #[error("Failed to register part {part_number}: {details}")]
    PartRegistrationFailed { part_number: u32, details: String },

    #[error("Failed to finalize upload: {details}")]
    FinalizationFailed { details: String },

    #[error("Cannot finalize: {registered} of {total} parts registered")]
    IncompleteParts { registered: u32, total: u32 },

    #[error("Failed to query upload status: {details}")]
    StatusQueryFailed { details: String },

    #[error("Upload session {session_id} is already {state}")]
    SessionClosed {
        session_id: String,
        state: SessionState,
    },

    #[error("Failed to abort upload: {details}")]
    AbortFailed { details: String },

    #[error("Invalid backend address {address}: {details}")]
    InvalidAddress { address: String, details: String },

    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Protocol step the error belongs to, used in status strings and logs
    pub fn step(&self) -> &'static str {
        match self {
            UploadError::SessionCreationFailed { .. } => "create",
            UploadError::PartAuthorizationFailed { .. } => "authorize",
            UploadError::PartTransferFailed { .. } => "transfer",
            UploadError::PartRegistrationFailed { .. } => "register",
            UploadError::FinalizationFailed { .. } | UploadError::IncompleteParts { .. } => {
                "finalize"
            }
            UploadError::StatusQueryFailed { .. } | UploadError::SessionClosed { .. } => "status",
            UploadError::AbortFailed { .. } => "abort",
            UploadError::InvalidAddress { .. } => "address",
            UploadError::Cancelled => "cancelled",
        }
    }

    /// Whether another attempt at the same step could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            UploadError::IncompleteParts { .. }
                | UploadError::SessionClosed { .. }
                | UploadError::InvalidAddress { .. }
                | UploadError::Cancelled
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExamError {
    #[error("Exam cannot start from state {state}")]
    InvalidStart { state: &'static str },

    #[error("Exam duration must be greater than 0")]
    ZeroDuration,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ProctorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_steps() {
        let err = UploadError::PartTransferFailed {
            part_number: 2,
            details: "connection reset".to_string(),
        };
        assert_eq!(err.step(), "transfer");
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Failed to transfer part 2: connection reset"
        );

        let incomplete = UploadError::IncompleteParts {
            registered: 1,
            total: 3,
        };
        assert_eq!(incomplete.step(), "finalize");
        assert!(!incomplete.is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());

        let closed = UploadError::SessionClosed {
            session_id: "7".to_string(),
            state: SessionState::Aborted,
        };
        assert_eq!(closed.step(), "status");
        assert!(!closed.is_retryable());
        assert_eq!(closed.to_string(), "Upload session 7 is already aborted");
    }

    #[test]
    fn test_error_conversion() {
        let err: ProctorError = CaptureError::DeviceUnavailable {
            kind: CaptureKind::Camera,
            details: "no device".to_string(),
        }
        .into();
        assert!(matches!(err, ProctorError::Capture(_)));
        assert_eq!(
            err.to_string(),
            "Capture error: camera device unavailable: no device"
        );
    }
}
