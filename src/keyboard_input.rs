use crate::error::Result;
use crate::session::StopTrigger;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// `q`, `s`, Esc, and Ctrl+C (which raw mode delivers as a key press)
pub fn is_stop_key(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        KeyCode::Char('q') | KeyCode::Char('s') | KeyCode::Esc => true,
        _ => false,
    }
}

/// Stops the running session from the terminal
pub struct KeyboardInputHandler {
    stop: StopTrigger,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(stop: StopTrigger) -> Self {
        Self {
            stop,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Press q, s or Esc to stop the session");

        let stop = self.stop.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if is_stop_key(&key_event) {
                                info!("Stop key pressed - stopping session");
                                if !stop.trigger() {
                                    debug!("Session already ended");
                                }
                                break;
                            }
                            debug!("Key pressed: {:?}", key_event.code);
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
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        self.cancellation_token.cancel();

        // Give the blocking task a poll interval to restore the terminal
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}
