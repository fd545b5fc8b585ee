//! Blink-style liveness gate.
//!
//! Advisory only: it deters holding a printed photo up to the camera, it is
//! not a security-grade liveness proof. The gate passes once eyes have been
//! seen on the face and then disappear from it (a blink or a turn of the
//! head) before the timeout runs out.

use crate::clock::elapsed_ms;
use crate::console::Console;
use crate::input::Button;
use crate::provider::{OverlayColor, Vision};
use crate::types::FaceBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessPhase {
    /// No face with visible eyes seen yet.
    WaitingPresence,
    /// Eyes seen; waiting for them to vanish.
    PresenceSeen,
    Passed,
    Failed,
    Cancelled,
}

impl LivenessPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Cancelled)
    }
}

/// Pure state of one liveness check. [`run_liveness`] drives it from the
/// camera; tests drive it directly.
#[derive(Debug, Clone)]
pub struct LivenessGate {
    phase: LivenessPhase,
    started_at_ms: u32,
    timeout_ms: u32,
}

impl LivenessGate {
    pub fn new(started_at_ms: u32, timeout_ms: u32) -> Self {
        Self {
            phase: LivenessPhase::WaitingPresence,
            started_at_ms,
            timeout_ms,
        }
    }

    pub fn phase(&self) -> LivenessPhase {
        self.phase
    }

    /// Feed one tick's observation. Ignored once the gate has finished.
    pub fn observe(&mut self, face_present: bool, eyes_visible: bool) -> LivenessPhase {
        self.phase = match (self.phase, face_present, eyes_visible) {
            (LivenessPhase::WaitingPresence, true, true) => LivenessPhase::PresenceSeen,
            (LivenessPhase::PresenceSeen, true, false) => LivenessPhase::Passed,
            (phase, _, _) => phase,
        };
        self.phase
    }

    /// Fail the gate if the timeout has run out without a pass.
    pub fn check_timeout(&mut self, now_ms: u32) -> LivenessPhase {
        if !self.phase.is_finished() && elapsed_ms(self.started_at_ms, now_ms) >= self.timeout_ms {
            self.phase = LivenessPhase::Failed;
        }
        self.phase
    }

    pub fn cancel(&mut self) {
        if !self.phase.is_finished() {
            self.phase = LivenessPhase::Cancelled;
        }
    }
}

/// Run the gate against the live camera until it finishes.
///
/// Each tick: a Back edge (short or long) cancels, then the timeout is
/// checked, then one frame is sampled. Returns a finished phase.
pub fn run_liveness(console: &mut Console, vision: &mut Vision) -> LivenessPhase {
    let timeout_ms = console.tuning().liveness_timeout_ms;
    let mut gate = LivenessGate::new(console.now_ms(), timeout_ms);
    console.screen(
        "Liveness check",
        &["Blink at the camera".to_string()],
        Some("Back: cancel"),
    );
    tracing::debug!(timeout_ms, "liveness check started");

    loop {
        let events = console.tick();
        let back = events.pressed(Button::Back) || events.long_pressed(Button::Back);
        if back || console.shutdown_requested() {
            gate.cancel();
        }
        let phase = gate.check_timeout(console.now_ms());
        if phase.is_finished() {
            tracing::info!(?phase, "liveness check finished");
            return phase;
        }

        let frame = vision.camera.capture();
        let faces = vision.detector.detect(&frame);
        let face = FaceBox::largest(&faces);
        let eyes = match &face {
            Some(face) => vision.detector.eyes_visible(&frame, face),
            None => false,
        };
        if let Some(face) = &face {
            let label = if eyes { "eyes open" } else { "eyes closed" };
            console.overlay(&frame, face, label, OverlayColor::Info);
        }

        let before = gate.phase();
        let phase = gate.observe(face.is_some(), eyes);
        if phase != before {
            tracing::debug!(?before, ?phase, "liveness transition");
        }
        if phase.is_finished() {
            tracing::info!(?phase, "liveness check finished");
            return phase;
        }
    }
}
