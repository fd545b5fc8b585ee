//! Capability contracts for the collaborators the core drives but does not own.

use crate::types::{Descriptor, FaceBox, Frame};

/// Camera. Called once per loop tick.
///
/// Capture never fails from the caller's point of view; backends hide
/// transient hardware errors (for example by repeating the last frame).
pub trait ImageSource {
    fn capture(&mut self) -> Frame;
}

/// Face region detector.
pub trait FaceDetector {
    /// Detected faces in `frame`, possibly none, in detector order.
    fn detect(&mut self, frame: &Frame) -> Vec<FaceBox>;

    /// Whether eyes are visible inside `face`. Drives the liveness gate.
    fn eyes_visible(&mut self, frame: &Frame, face: &FaceBox) -> bool;
}

/// Feature extractor.
pub trait FaceFeatureProvider {
    /// Descriptor for one face region, or `None` when no usable features
    /// could be extracted. `None` is an expected outcome, not an error.
    fn extract(&mut self, frame: &Frame, face: &FaceBox) -> Option<Descriptor>;
}

/// Overlay colour hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayColor {
    /// Recognised identity.
    Match,
    /// Face seen but not recognised.
    Unknown,
    /// Neutral guidance (enrollment framing).
    Info,
}

/// Text screen and camera overlay output. Fire-and-forget.
pub trait DisplayOutput {
    fn draw_overlay(&mut self, frame: &Frame, face: &FaceBox, label: &str, color: OverlayColor);
    fn show_text(&mut self, lines: &[String]);
}

/// Everything the vision side of the appliance needs, bundled so the
/// controller and pipeline can borrow it as one unit.
pub struct Vision {
    pub camera: Box<dyn ImageSource>,
    pub detector: Box<dyn FaceDetector>,
    pub features: Box<dyn FaceFeatureProvider>,
}

impl Vision {
    pub fn new(
        camera: Box<dyn ImageSource>,
        detector: Box<dyn FaceDetector>,
        features: Box<dyn FaceFeatureProvider>,
    ) -> Self {
        Self {
            camera,
            detector,
            features,
        }
    }
}
