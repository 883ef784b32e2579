use crate::error::Result;
use crate::events::{EventBus, ProctorEvent};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator command bound to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    EndExam,
    Quit,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('e') | KeyCode::Char('E') => Some(KeyAction::EndExam),
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }

    pub fn to_event(self) -> ProctorEvent {
        let timestamp = SystemTime::now();
        match self {
            KeyAction::EndExam => ProctorEvent::EndRequested { timestamp },
            KeyAction::Quit => ProctorEvent::ShutdownRequested {
                timestamp,
                reason: "User requested via keyboard".to_string(),
            },
        }
    }
}

/// Terminal keyboard handler: `e` ends the exam early, `q`/Esc quits
pub struct KeyboardInputHandler {
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - press 'e' to end the exam, 'q' to quit");

        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        // crossterm polling blocks, keep it off the async workers
        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled - keyboard handler active");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        let Some(action) = KeyAction::from_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        info!("Key action {:?}", action);
                        let event_bus = Arc::clone(&event_bus);
                        runtime_handle.spawn(async move {
                            if let Err(e) = event_bus.publish(action.to_event()).await {
                                warn!("Failed to publish {:?} event: {}", action, e);
                            }
                        });

                        if action == KeyAction::Quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the blocking task a poll interval to restore the terminal
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(
            KeyAction::from_key(KeyCode::Char('e')),
            Some(KeyAction::EndExam)
        );
        assert_eq!(KeyAction::from_key(KeyCode::Esc), Some(KeyAction::Quit));
        assert_eq!(KeyAction::from_key(KeyCode::Char('q')), Some(KeyAction::Quit));
        assert_eq!(KeyAction::from_key(KeyCode::Char(' ')), None);
    }

    #[test]
    fn test_actions_map_to_events() {
        assert_eq!(KeyAction::EndExam.to_event().event_type(), "end_requested");
        assert_eq!(KeyAction::Quit.to_event().event_type(), "shutdown_requested");
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let event_bus = Arc::new(EventBus::new(16));
        let handler = KeyboardInputHandler::new(event_bus);

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
