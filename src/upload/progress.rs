use super::session::{progress_percent, SessionId};
use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Observable upload state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadStatus {
    Idle,
    NothingToUpload,
    CreatingSession,
    Uploading {
        registered_parts: u32,
        total_parts: u32,
    },
    Finalizing,
    Completed {
        file_url: String,
    },
    Failed {
        step: String,
        message: String,
        last_percent: u8,
    },
    Cancelled {
        last_percent: u8,
    },
}

impl UploadStatus {
    pub fn failed(error: &UploadError, last_percent: u8) -> Self {
        match error {
            UploadError::Cancelled => UploadStatus::Cancelled { last_percent },
            _ => UploadStatus::Failed {
                step: error.step().to_string(),
                message: error.to_string(),
                last_percent,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::NothingToUpload
                | UploadStatus::Completed { .. }
                | UploadStatus::Failed { .. }
                | UploadStatus::Cancelled { .. }
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Idle => write!(f, "Idle"),
            UploadStatus::NothingToUpload => write!(f, "Nothing to upload"),
            UploadStatus::CreatingSession => write!(f, "Creating upload session..."),
            UploadStatus::Uploading {
                registered_parts,
                total_parts,
            } => write!(
                f,
                "Uploading... {}% ({}/{} parts)",
                progress_percent(*registered_parts, *total_parts),
                registered_parts,
                total_parts
            ),
            UploadStatus::Finalizing => write!(f, "Finalizing upload..."),
            UploadStatus::Completed { file_url } => write!(f, "Upload complete: {}", file_url),
            UploadStatus::Failed {
                message,
                last_percent,
                ..
            } => write!(f, "Upload failed at {}%: {}", last_percent, message),
            UploadStatus::Cancelled { last_percent } => {
                write!(f, "Upload cancelled at {}%", last_percent)
            }
        }
    }
}

/// Result of a finished upload attempt
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Zero-length payload, the protocol was never invoked
    NothingToUpload,
    Completed(UploadReceipt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub session_id: SessionId,
    pub file_url: String,
    pub total_parts: u32,
    pub size_bytes: u64,
}

/// Registered-part counter shared by upload workers
pub(crate) struct ProgressTracker {
    registered: AtomicU32,
    total: u32,
}

impl ProgressTracker {
    pub(crate) fn new(already_registered: u32, total: u32) -> Self {
        Self {
            registered: AtomicU32::new(already_registered),
            total,
        }
    }

    /// Count one more registered part, returning (registered, percent)
    pub(crate) fn record(&self) -> (u32, u8) {
        let registered = self.registered.fetch_add(1, Ordering::AcqRel) + 1;
        (registered, progress_percent(registered, self.total))
    }

    pub(crate) fn registered(&self) -> u32 {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn percent(&self) -> u8 {
        progress_percent(self.registered(), self.total)
    }

    pub(crate) fn total(&self) -> u32 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        let uploading = UploadStatus::Uploading {
            registered_parts: 2,
            total_parts: 3,
        };
        assert_eq!(uploading.to_string(), "Uploading... 67% (2/3 parts)");
        assert!(!uploading.is_terminal());

        let failed = UploadStatus::failed(
            &UploadError::PartRegistrationFailed {
                part_number: 2,
                details: "HTTP 500".to_string(),
            },
            33,
        );
        assert_eq!(
            failed.to_string(),
            "Upload failed at 33%: Failed to register part 2: HTTP 500"
        );
        assert!(failed.is_terminal());

        assert_eq!(
            UploadStatus::failed(&UploadError::Cancelled, 67),
            UploadStatus::Cancelled { last_percent: 67 }
        );
        assert_eq!(UploadStatus::NothingToUpload.to_string(), "Nothing to upload");
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(1, 3);
        assert_eq!(tracker.percent(), 33);
        assert_eq!(tracker.record(), (2, 67));
        assert_eq!(tracker.record(), (3, 100));
        assert_eq!(tracker.total(), 3);
    }
}
