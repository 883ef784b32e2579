mod exam;
mod orchestrator;
mod runtime;

#[cfg(test)]
mod tests;

pub use exam::{ExamSession, ExamStatus, TickOutcome};
pub use orchestrator::ExamController;
pub use runtime::spawn_signal_handlers;
