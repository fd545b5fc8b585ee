//! Text display, buttons and the tick clock, bundled for the poll loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Tuning;
use crate::input::{InputDevice, InputEvents};
use crate::provider::{DisplayOutput, OverlayColor};
use crate::types::{FaceBox, Frame};

/// Width of the title rule on text screens.
const RULE_WIDTH: usize = 30;

/// Obtains a display name from the user.
///
/// Gets the console so button-driven implementations can run their own
/// poll loop. Returns `None` (or an empty string) when the user cancels.
pub trait NameInput {
    fn prompt(&mut self, title: &str, console: &mut Console) -> Option<String>;
}

/// The user-facing half of the board: buttons, screen and tick clock.
pub struct Console {
    input: InputDevice,
    display: Box<dyn DisplayOutput>,
    clock: Box<dyn Clock>,
    tuning: Tuning,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Console {
    pub fn new(
        input: InputDevice,
        display: Box<dyn DisplayOutput>,
        clock: Box<dyn Clock>,
        tuning: Tuning,
    ) -> Self {
        Self {
            input,
            display,
            clock,
            tuning,
            shutdown: None,
        }
    }

    /// Stop the poll loops at the next tick once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Sleep one tick, then sample every button.
    ///
    /// This is the only suspension point of the poll loops; cancellation is
    /// observed at the next tick boundary.
    pub fn tick(&mut self) -> InputEvents {
        self.clock.sleep_ms(self.tuning.tick_ms);
        let now = self.clock.now_ms();
        self.input.poll(now)
    }

    /// Render a titled text screen.
    pub fn screen(&mut self, title: &str, body: &[String], footer: Option<&str>) {
        let rule = "=".repeat(RULE_WIDTH);
        let mut lines = Vec::with_capacity(body.len() + 5);
        lines.push(rule.clone());
        lines.push(title.to_string());
        lines.push(rule.clone());
        lines.extend(body.iter().cloned());
        if let Some(footer) = footer {
            lines.push(rule);
            lines.push(footer.to_string());
        }
        self.display.show_text(&lines);
    }

    /// Show a transient notice and hold it for the configured time.
    pub fn notify(&mut self, message: &str) {
        tracing::debug!(message, "notice");
        let body: Vec<String> = message.lines().map(str::to_string).collect();
        self.screen("Notice", &body, None);
        self.clock.sleep_ms(self.tuning.message_ms);
    }

    /// Show a screen and block until any button is pressed.
    pub fn show_until_pressed(&mut self, title: &str, body: &[String]) {
        self.screen(title, body, Some("Press any button to return"));
        while !self.tick().any_pressed() && !self.shutdown_requested() {}
    }

    pub fn overlay(&mut self, frame: &Frame, face: &FaceBox, label: &str, color: OverlayColor) {
        self.display.draw_overlay(frame, face, label, color);
    }
}
