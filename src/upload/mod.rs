//! Resumable multipart upload of a finished recording

mod backend;
mod engine;
mod http;
pub mod memory;
mod progress;
mod session;


pub use backend::{
    CompleteRequest, CompleteResponse, CompletedPart, CreateSessionRequest, CreateSessionResponse,
    MultipartBackend, PartStore, PresignRequest, PresignResponse, SessionState,
    SessionStatusResponse,
};
pub use engine::{UploadEngine, UploadRequest};
pub use http::HttpMultipartClient;
pub use memory::InMemoryBackend;
pub use progress::{UploadOutcome, UploadReceipt, UploadStatus};
pub use session::{
    partition, progress_percent, total_parts, PartStatus, SessionId, UploadPart, UploadPlan,
    UploadSession,
};
