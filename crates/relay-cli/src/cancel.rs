//! Esc-to-cancel listener
//!
//! Watches terminal input for Esc (or Ctrl+C) while a generation is in
//! flight. Raw mode is enabled only for the lifetime of the wait; the guard
//! restores the terminal when the generation finishes and the future is
//! dropped.

use async_trait::async_trait;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyModifiers};
use futures::StreamExt;
use relay_core::agent::CancelListener;
use tracing::debug;

pub struct EscListener;

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

#[async_trait]
impl CancelListener for EscListener {
    async fn wait_for_cancel(&self) {
        let _guard = match RawModeGuard::enable() {
            Ok(guard) => guard,
            Err(e) => {
                debug!("Raw mode unavailable, cancellation disabled: {e}");
                return std::future::pending().await;
            }
        };

        let mut events = EventStream::new();
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Key(KeyEvent {
                    code: KeyCode::Esc, ..
                })) => return,
                Ok(Event::Key(KeyEvent {
                    code: KeyCode::Char('c'),
                    modifiers,
                    ..
                })) if modifiers.contains(KeyModifiers::CONTROL) => return,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Terminal event error: {e}");
                    return std::future::pending().await;
                }
            }
        }
        std::future::pending().await
    }
}
