use crate::controller::ExamStatus;
use crate::upload::UploadStatus;
use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of everything a display surface reads from the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProctorStatus {
    pub exam_status: ExamStatus,
    pub remaining_seconds: u64,
    pub recording: bool,
    pub recording_elapsed_seconds: u64,
    pub camera_active: bool,
    pub upload_percent: u8,
    pub upload_status: UploadStatus,
}

impl Default for ProctorStatus {
    fn default() -> Self {
        Self {
            exam_status: ExamStatus::NotStarted,
            remaining_seconds: 0,
            recording: false,
            recording_elapsed_seconds: 0,
            camera_active: false,
            upload_percent: 0,
            upload_status: UploadStatus::Idle,
        }
    }
}

/// Shared, watchable status published by the pipeline components
#[derive(Clone)]
pub struct StatusBoard {
    sender: watch::Sender<ProctorStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ProctorStatus::default());
        Self { sender }
    }

    /// Apply a change and notify watchers
    pub fn update<F>(&self, modify: F)
    where
        F: FnOnce(&mut ProctorStatus),
    {
        self.sender.send_modify(modify);
    }

    pub fn snapshot(&self) -> ProctorStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProctorStatus> {
        self.sender.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_updates_are_observed() {
        let board = StatusBoard::new();
        let mut watcher = board.subscribe();

        board.update(|status| {
            status.camera_active = true;
            status.remaining_seconds = 60;
        });

        watcher.changed().await.unwrap();
        let seen = watcher.borrow().clone();
        assert!(seen.camera_active);
        assert_eq!(seen.remaining_seconds, 60);
        assert_eq!(board.snapshot(), seen);
    }
}
