pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod keyboard_input;
pub mod media;
pub mod recording;
pub mod recovery;
pub mod status;
pub mod upload;

pub use config::ProctorConfig;
pub use controller::{ExamController, ExamSession, ExamStatus, TickOutcome};
pub use error::{
    CaptureError, EventBusError, ExamError, ProctorError, RecordingError, Result, UploadError,
};
pub use events::{EndReason, EventBus, EventFilter, EventReceiver, ProctorEvent};
pub use keyboard_input::{KeyAction, KeyboardInputHandler};
pub use media::{CaptureDevice, CaptureHandle, CaptureKind, MediaCaptureAdapter, ScreenRecorder};
pub use recording::{RecordingBuffer, RecordingPayload, RecordingStatus};
pub use recovery::{RecoveryAction, RecoveryManager, RetryPolicy};
pub use status::{ProctorStatus, StatusBoard};
pub use upload::{
    HttpMultipartClient, InMemoryBackend, MultipartBackend, PartStore, UploadEngine,
    UploadOutcome, UploadRequest, UploadStatus,
};
