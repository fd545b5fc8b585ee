//! Tuning constants and the runtime settings owned by the controller.

use serde::{Deserialize, Serialize};

pub const DEFAULT_DEBOUNCE_MS: u32 = 20;
pub const DEFAULT_LONG_PRESS_MS: u32 = 1000;
pub const DEFAULT_TICK_MS: u32 = 100;
pub const DEFAULT_MESSAGE_MS: u32 = 1000;
pub const DEFAULT_SAMPLE_TARGET: usize = 5;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 80;
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u32 = 5000;

/// Similarity threshold, held in tenths so repeated ±0.1 steps never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "f32", from = "f32")]
pub struct Threshold(u8);

impl Threshold {
    pub const MIN_TENTHS: u8 = 1;
    pub const MAX_TENTHS: u8 = 10;
    pub const DEFAULT: Threshold = Threshold(5);

    /// Build from tenths, clamped to [0.1, 1.0].
    pub fn from_tenths(tenths: u8) -> Self {
        Self(tenths.clamp(Self::MIN_TENTHS, Self::MAX_TENTHS))
    }

    /// Round an arbitrary value to the nearest tenth inside [0.1, 1.0].
    pub fn from_value(value: f32) -> Self {
        if !value.is_finite() {
            return Self::DEFAULT;
        }
        let tenths = (value * 10.0).round().clamp(0.0, 255.0) as u8;
        Self::from_tenths(tenths)
    }

    pub fn tenths(self) -> u8 {
        self.0
    }

    pub fn value(self) -> f32 {
        f32::from(self.0) / 10.0
    }

    pub fn raised(self) -> Self {
        Self::from_tenths(self.0.saturating_add(1))
    }

    pub fn lowered(self) -> Self {
        Self::from_tenths(self.0.saturating_sub(1))
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Threshold> for f32 {
    fn from(threshold: Threshold) -> Self {
        threshold.value()
    }
}

impl From<f32> for Threshold {
    fn from(value: f32) -> Self {
        Self::from_value(value)
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}", self.value())
    }
}

/// Settings the user can change from the Settings menu while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub threshold: Threshold,
    pub liveness_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: Threshold::DEFAULT,
            liveness_enabled: true,
        }
    }
}

/// Timing and enrollment constants fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Stable-low time before a button edge counts.
    pub debounce_ms: u32,
    /// Hold time that turns a press into a long press.
    pub long_press_ms: u32,
    /// Delay between poll-loop iterations.
    pub tick_ms: u32,
    /// How long a transient message stays on screen.
    pub message_ms: u32,
    /// Samples averaged into one template.
    pub sample_target: usize,
    /// Minimum face width and height accepted for a sample.
    pub min_face_size: u32,
    pub liveness_timeout_ms: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            long_press_ms: DEFAULT_LONG_PRESS_MS,
            tick_ms: DEFAULT_TICK_MS,
            message_ms: DEFAULT_MESSAGE_MS,
            sample_target: DEFAULT_SAMPLE_TARGET,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
        }
    }
}

impl Tuning {
    /// Clamp values that would make the loops misbehave.
    pub fn sanitized(mut self) -> Self {
        self.sample_target = self.sample_target.max(1);
        self.tick_ms = self.tick_ms.max(1);
        self.long_press_ms = self.long_press_ms.max(self.debounce_ms.saturating_add(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_steps_clamp() {
        let mut t = Threshold::DEFAULT;
        for _ in 0..20 {
            t = t.raised();
        }
        assert_eq!(t.value(), 1.0);
        for _ in 0..20 {
            t = t.lowered();
        }
        assert!((t.value() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_from_value_rounds() {
        assert_eq!(Threshold::from_value(0.44).tenths(), 4);
        assert_eq!(Threshold::from_value(0.46).tenths(), 5);
        assert_eq!(Threshold::from_value(0.0).tenths(), 1);
        assert_eq!(Threshold::from_value(3.0).tenths(), 10);
        assert_eq!(Threshold::from_value(f32::NAN), Threshold::DEFAULT);
    }

    #[test]
    fn test_threshold_display() {
        assert_eq!(Threshold::from_tenths(7).to_string(), "0.7");
        assert_eq!(Threshold::from_tenths(10).to_string(), "1.0");
    }

    #[test]
    fn test_tuning_sanitized() {
        let tuning = Tuning {
            sample_target: 0,
            tick_ms: 0,
            long_press_ms: 5,
            ..Tuning::default()
        }
        .sanitized();
        assert_eq!(tuning.sample_target, 1);
        assert_eq!(tuning.tick_ms, 1);
        assert_eq!(tuning.long_press_ms, DEFAULT_DEBOUNCE_MS + 1);
    }

    #[test]
    fn test_tuning_sanitized_huge_debounce() {
        let tuning = Tuning {
            debounce_ms: u32::MAX,
            ..Tuning::default()
        }
        .sanitized();
        assert_eq!(tuning.long_press_ms, u32::MAX);
    }
}
