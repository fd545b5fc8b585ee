//! Text-terminal rendering of screens and overlays.

use std::io::Write;

use facegate_core::{DisplayOutput, FaceBox, Frame, OverlayColor};

const CLEAR: &str = "\x1b[2J\x1b[H";

/// Writes screens to a terminal (stdout in the daemon).
///
/// Screens replace the previous one; overlays are single status lines below
/// the current screen, coloured with ANSI escapes when `color` is set.
pub struct TerminalDisplay<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    fn write_all(&mut self, text: &str) {
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(e) = result {
            tracing::debug!(error = %e, "display write failed");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplayOutput for TerminalDisplay<W> {
    fn show_text(&mut self, lines: &[String]) {
        let mut text = String::from(if self.color { CLEAR } else { "" });
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        self.write_all(&text);
    }

    fn draw_overlay(&mut self, frame: &Frame, face: &FaceBox, label: &str, color: OverlayColor) {
        let tag = match color {
            OverlayColor::Match => "match",
            OverlayColor::Unknown => "unknown",
            OverlayColor::Info => "info",
        };
        let body = format!(
            "[{tag}] {label} at {},{} {}x{} (frame {})",
            face.x, face.y, face.width, face.height, frame.sequence
        );
        let line = if self.color {
            let code = match color {
                OverlayColor::Match => "32",
                OverlayColor::Unknown => "31",
                OverlayColor::Info => "36",
            };
            format!("\x1b[{code}m{body}\x1b[0m\n")
        } else {
            format!("{body}\n")
        };
        self.write_all(&line);
    }
}
