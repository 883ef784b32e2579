use crate::error::ExamError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamStatus {
    NotStarted,
    Active,
    Ended,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamStatus::NotStarted => "not_started",
            ExamStatus::Active => "active",
            ExamStatus::Ended => "ended",
        }
    }
}

/// What a single timer tick did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session is not Active, nothing changed
    Ignored,
    Running { remaining_seconds: u64 },
    /// Remaining time just reached zero; the caller ends the exam
    Expired,
}

/// Exam timer state machine: NotStarted → Active → Ended
#[derive(Debug, Clone, PartialEq)]
pub struct ExamSession {
    total_duration_seconds: u64,
    remaining_seconds: u64,
    status: ExamStatus,
}

impl ExamSession {
    pub fn new(total_duration_seconds: u64) -> Result<Self, ExamError> {
        if total_duration_seconds == 0 {
            return Err(ExamError::ZeroDuration);
        }
        Ok(Self {
            total_duration_seconds,
            remaining_seconds: total_duration_seconds,
            status: ExamStatus::NotStarted,
        })
    }

    pub fn status(&self) -> ExamStatus {
        self.status
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn total_duration_seconds(&self) -> u64 {
        self.total_duration_seconds
    }

    pub fn start(&mut self) -> Result<(), ExamError> {
        if self.status != ExamStatus::NotStarted {
            return Err(ExamError::InvalidStart {
                state: self.status.as_str(),
            });
        }
        self.remaining_seconds = self.total_duration_seconds;
        self.status = ExamStatus::Active;
        Ok(())
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.status != ExamStatus::Active {
            return TickOutcome::Ignored;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            TickOutcome::Expired
        } else {
            TickOutcome::Running {
                remaining_seconds: self.remaining_seconds,
            }
        }
    }

    /// Move to Ended. Only an Active session ends; returns whether this call
    /// made the transition.
    pub fn end(&mut self) -> bool {
        if self.status != ExamStatus::Active {
            return false;
        }
        self.status = ExamStatus::Ended;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_to_expiry() {
        let mut exam = ExamSession::new(3).unwrap();
        assert_eq!(exam.tick(), TickOutcome::Ignored);

        exam.start().unwrap();
        assert_eq!(exam.remaining_seconds(), 3);
        assert_eq!(
            exam.tick(),
            TickOutcome::Running {
                remaining_seconds: 2
            }
        );
        assert_eq!(
            exam.tick(),
            TickOutcome::Running {
                remaining_seconds: 1
            }
        );
        assert_eq!(exam.tick(), TickOutcome::Expired);

        assert!(exam.end());
        assert_eq!(exam.status(), ExamStatus::Ended);
        assert_eq!(exam.tick(), TickOutcome::Ignored);
    }

    #[test]
    fn test_no_transition_leaves_ended() {
        let mut exam = ExamSession::new(60).unwrap();
        exam.start().unwrap();
        assert!(exam.end());
        assert!(!exam.end());
        assert_eq!(
            exam.start(),
            Err(ExamError::InvalidStart { state: "ended" })
        );
        assert_eq!(exam.status(), ExamStatus::Ended);
    }

    #[test]
    fn test_end_before_start_is_noop() {
        let mut exam = ExamSession::new(60).unwrap();
        assert!(!exam.end());
        assert_eq!(exam.status(), ExamStatus::NotStarted);
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert_eq!(ExamSession::new(0), Err(ExamError::ZeroDuration));
    }
}
