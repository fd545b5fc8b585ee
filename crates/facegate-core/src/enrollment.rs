//! Multi-sample enrollment: capture, quality gate, liveness gate, average,
//! commit.
//!
//! ```text
//! CollectingSamples -> LivenessCheck -> Committing -> Done
//!        |                   |               |
//!        +--> Cancelled      +--> Failed     +--> Failed
//! ```
//!
//! Nothing touches the store before `Committing`, and the store commit is
//! itself atomic, so every exit other than `Done` leaves the store as it was.

use thiserror::Error;

use crate::config::Settings;
use crate::console::Console;
use crate::input::Button;
use crate::liveness::{run_liveness, LivenessPhase};
use crate::provider::{FaceFeatureProvider, OverlayColor, Vision};
use crate::store::{StoreBackend, StoreError, TemplateStore};
use crate::types::{Descriptor, FaceBox, Frame};

/// Why a capture attempt did not yield a sample. Always retryable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRejection {
    #[error("no face in frame")]
    NoFace,
    #[error("face smaller than the minimum size")]
    FaceTooSmall,
    #[error("feature extraction returned no descriptor")]
    FeatureExtractionFailed,
}

impl SampleRejection {
    pub fn user_message(&self) -> &'static str {
        match self {
            SampleRejection::NoFace => "No face found",
            SampleRejection::FaceTooSmall => "Too far, move closer",
            SampleRejection::FeatureExtractionFailed => "No features, adjust angle",
        }
    }
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("liveness check failed")]
    LivenessFailed,
    #[error("enrollment cancelled")]
    Cancelled,
    #[error("no samples captured")]
    NoSamples,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EnrollError {
    pub fn user_message(&self) -> &'static str {
        match self {
            EnrollError::LivenessFailed => "Liveness check failed",
            EnrollError::Cancelled => "Enrollment cancelled",
            EnrollError::NoSamples => "No valid samples",
            EnrollError::Store(err) => err.user_message(),
        }
    }
}

/// Who the samples are for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollTarget {
    /// A new identity with this display name.
    New(String),
    /// Re-enrollment of an existing record; its descriptor is replaced.
    Existing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollPhase {
    CollectingSamples,
    LivenessCheck,
    Committing,
    Done,
    Failed,
    Cancelled,
}

/// One in-flight enrollment. Consumed by [`commit`](Self::commit).
#[derive(Debug)]
pub struct EnrollmentSession {
    target: EnrollTarget,
    samples: Vec<Descriptor>,
    sample_target: usize,
    phase: EnrollPhase,
}

impl EnrollmentSession {
    pub fn new(target: EnrollTarget, sample_target: usize) -> Self {
        Self {
            target,
            samples: Vec::with_capacity(sample_target),
            sample_target: sample_target.max(1),
            phase: EnrollPhase::CollectingSamples,
        }
    }

    pub fn target(&self) -> &EnrollTarget {
        &self.target
    }

    pub fn phase(&self) -> EnrollPhase {
        self.phase
    }

    pub fn samples(&self) -> &[Descriptor] {
        &self.samples
    }

    pub fn sample_target(&self) -> usize {
        self.sample_target
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.sample_target
    }

    /// Finishing early needs at least one accepted sample.
    pub fn can_finish(&self) -> bool {
        !self.samples.is_empty()
    }

    /// Accept a sample. Returns the new sample count; ignored once full.
    ///
    /// A descriptor whose length differs from the first sample is rejected
    /// so the samples can always be averaged.
    pub fn push_sample(&mut self, descriptor: Descriptor) -> Result<usize, SampleRejection> {
        if let Some(first) = self.samples.first() {
            if first.len() != descriptor.len() {
                tracing::warn!(
                    expected = first.len(),
                    actual = descriptor.len(),
                    "feature provider changed descriptor length"
                );
                return Err(SampleRejection::FeatureExtractionFailed);
            }
        }
        if !self.is_full() {
            self.samples.push(descriptor);
        }
        Ok(self.samples.len())
    }

    fn enter(&mut self, phase: EnrollPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "enrollment phase");
        self.phase = phase;
    }

    /// Average the samples and write them to `store`. Returns the record id.
    ///
    /// # Panics
    ///
    /// If the samples do not all have the same length.
    pub fn commit<B: StoreBackend>(mut self, store: &mut TemplateStore<B>) -> Result<String, EnrollError> {
        self.enter(EnrollPhase::Committing);
        let descriptor = Descriptor::mean(&self.samples).ok_or(EnrollError::NoSamples)?;
        let sample_count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);

        let committed = match &self.target {
            EnrollTarget::New(name) => store.add(name, descriptor, sample_count),
            EnrollTarget::Existing(id) => store
                .replace_descriptor(id, descriptor, sample_count)
                .map(|()| id.clone()),
        };
        self.enter(if committed.is_ok() { EnrollPhase::Done } else { EnrollPhase::Failed });
        Ok(committed?)
    }
}

/// Quality-gate one face and extract its descriptor.
pub fn capture_sample(
    features: &mut dyn FaceFeatureProvider,
    frame: &Frame,
    face: Option<&FaceBox>,
    min_face_size: u32,
) -> Result<Descriptor, SampleRejection> {
    let face = face.ok_or(SampleRejection::NoFace)?;
    if !face.meets_min_size(min_face_size) {
        return Err(SampleRejection::FaceTooSmall);
    }
    features
        .extract(frame, face)
        .filter(|descriptor| !descriptor.is_empty())
        .ok_or(SampleRejection::FeatureExtractionFailed)
}

/// Run a full enrollment against the live camera.
///
/// Select captures a sample. Back finishes early once a sample has been
/// taken and cancels before that; a long Back cancels at any point. When
/// `settings.liveness_enabled` is off the liveness gate is skipped.
pub fn run_enrollment<B: StoreBackend>(
    console: &mut Console,
    vision: &mut Vision,
    store: &mut TemplateStore<B>,
    settings: &Settings,
    target: EnrollTarget,
) -> Result<String, EnrollError> {
    let mut session = EnrollmentSession::new(target, console.tuning().sample_target);
    tracing::info!(enroll_target = ?session.target(), samples = session.sample_target(), "enrollment started");

    if let Err(err) = collect_samples(console, vision, &mut session) {
        session.enter(EnrollPhase::Cancelled);
        tracing::info!(captured = session.samples().len(), "enrollment cancelled");
        return Err(err);
    }

    if settings.liveness_enabled {
        session.enter(EnrollPhase::LivenessCheck);
        match run_liveness(console, vision) {
            LivenessPhase::Passed => {}
            LivenessPhase::Cancelled => {
                session.enter(EnrollPhase::Cancelled);
                return Err(EnrollError::Cancelled);
            }
            _ => {
                session.enter(EnrollPhase::Failed);
                return Err(EnrollError::LivenessFailed);
            }
        }
    } else {
        tracing::debug!("liveness disabled, skipping gate");
    }

    match session.commit(store) {
        Ok(id) => {
            tracing::info!(id = %id, "enrollment committed");
            Ok(id)
        }
        Err(err) => {
            tracing::error!(error = %err, "enrollment commit failed");
            Err(err)
        }
    }
}

fn collect_samples(
    console: &mut Console,
    vision: &mut Vision,
    session: &mut EnrollmentSession,
) -> Result<(), EnrollError> {
    let min_face_size = console.tuning().min_face_size;

    while !session.is_full() {
        let captured = session.samples().len();
        console.screen(
            "Enroll",
            &[
                format!("Samples: {captured}/{}", session.sample_target()),
                "Face the camera".to_string(),
            ],
            Some("Select: capture | Back: done/cancel"),
        );

        let events = console.tick();
        if events.long_pressed(Button::Back) || console.shutdown_requested() {
            return Err(EnrollError::Cancelled);
        }
        if events.pressed(Button::Back) {
            if session.can_finish() {
                tracing::debug!(captured, "collection finished early");
                return Ok(());
            }
            return Err(EnrollError::Cancelled);
        }

        let frame = vision.camera.capture();
        let faces = vision.detector.detect(&frame);
        let face = FaceBox::largest(&faces);
        if let Some(face) = &face {
            let label = format!("sample {}/{}", captured + 1, session.sample_target());
            console.overlay(&frame, face, &label, OverlayColor::Info);
        }

        if !events.pressed(Button::Select) {
            continue;
        }
        let accepted = capture_sample(vision.features.as_mut(), &frame, face.as_ref(), min_face_size)
            .and_then(|descriptor| session.push_sample(descriptor));
        match accepted {
            Ok(count) => {
                tracing::debug!(count, "sample accepted");
                console.notify(&format!("Captured sample {count}/{}", session.sample_target()));
            }
            Err(rejection) => {
                tracing::debug!(%rejection, "sample rejected");
                console.notify(rejection.user_message());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tuning;
    use crate::input::InputDevice;
    use crate::sim::{
        ManualClock, MemoryBackend, RecordingDisplay, ScriptedButtons, ScriptedCamera, ScriptedVision,
    };

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    struct Bench {
        buttons: ScriptedButtons,
        script: ScriptedVision,
        display: RecordingDisplay,
        console: Console,
        vision: Vision,
        backend: MemoryBackend,
        store: TemplateStore<MemoryBackend>,
    }

    fn bench() -> Bench {
        let clock = ManualClock::new();
        let buttons = ScriptedButtons::with_clock(&clock);
        let display = RecordingDisplay::new();
        let tuning = Tuning {
            sample_target: 3,
            ..Tuning::default()
        };
        let console = Console::new(
            InputDevice::new(Box::new(buttons.clone()), &tuning),
            Box::new(display.clone()),
            Box::new(clock),
            tuning,
        );
        let script = ScriptedVision::new();
        script.set_faces(vec![FaceBox::new(10, 10, 120, 120)]);
        let vision = script.clone().into_vision(ScriptedCamera::new(320, 240));
        let backend = MemoryBackend::new();
        let (store, _) = TemplateStore::load(backend.clone());
        Bench {
            buttons,
            script,
            display,
            console,
            vision,
            backend,
            store,
        }
    }

    fn no_liveness() -> Settings {
        Settings {
            liveness_enabled: false,
            ..Settings::default()
        }
    }

    impl Bench {
        fn run(&mut self, settings: &Settings, target: EnrollTarget) -> Result<String, EnrollError> {
            run_enrollment(&mut self.console, &mut self.vision, &mut self.store, settings, target)
        }
    }

    #[test]
    fn test_session_rejects_length_change() {
        let mut session = EnrollmentSession::new(EnrollTarget::New("Ada".into()), 3);
        assert_eq!(session.push_sample(d(&[1.0, 0.0])), Ok(1));
        assert_eq!(
            session.push_sample(d(&[1.0, 0.0, 0.0])),
            Err(SampleRejection::FeatureExtractionFailed)
        );
        assert_eq!(session.push_sample(d(&[0.0, 1.0])), Ok(2));
        assert_eq!(session.samples().len(), 2);
    }

    #[test]
    fn test_session_mean_and_count() {
        let mut session = EnrollmentSession::new(EnrollTarget::New("Ada".into()), 2);
        assert!(!session.can_finish());
        session.push_sample(d(&[1.0, 0.0])).unwrap();
        session.push_sample(d(&[0.0, 1.0])).unwrap();
        assert!(session.is_full());
        assert_eq!(session.push_sample(d(&[9.0, 9.0])), Ok(2));

        let (mut store, _) = TemplateStore::load(MemoryBackend::new());
        let id = session.commit(&mut store).unwrap();
        let record = store.get(&id).unwrap();
        assert_eq!(record.descriptor, d(&[0.5, 0.5]));
        assert_eq!(record.sample_count, 2);
    }

    #[test]
    fn test_commit_without_samples_fails() {
        let session = EnrollmentSession::new(EnrollTarget::New("Ada".into()), 3);
        let (mut store, _) = TemplateStore::load(MemoryBackend::new());
        assert!(matches!(session.commit(&mut store), Err(EnrollError::NoSamples)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_capture_sample_rejections() {
        let script = ScriptedVision::new();
        let mut features = script.clone();
        let frame = Frame::blank(320, 240);

        let none = capture_sample(&mut features, &frame, None, 80);
        assert_eq!(none, Err(SampleRejection::NoFace));

        let small = FaceBox::new(0, 0, 79, 200);
        let too_small = capture_sample(&mut features, &frame, Some(&small), 80);
        assert_eq!(too_small, Err(SampleRejection::FaceTooSmall));
        assert_eq!(script.extract_calls(), 0);

        let ok_box = FaceBox::new(0, 0, 80, 80);
        let failed = capture_sample(&mut features, &frame, Some(&ok_box), 80);
        assert_eq!(failed, Err(SampleRejection::FeatureExtractionFailed));

        script.queue_descriptor(Some(d(&[0.1, 0.2])));
        let sample = capture_sample(&mut features, &frame, Some(&ok_box), 80);
        assert_eq!(sample, Ok(d(&[0.1, 0.2])));
    }

    #[test]
    fn test_full_target_commits_mean() {
        let mut b = bench();
        b.script
            .queue_descriptor(Some(d(&[1.0, 0.0, 0.0])))
            .queue_descriptor(Some(d(&[0.0, 1.0, 0.0])))
            .queue_descriptor(Some(d(&[0.0, 0.0, 1.0])));
        b.buttons.presses(&[Button::Select, Button::Select, Button::Select]);

        let id = b.run(&no_liveness(), EnrollTarget::New("Ada".into())).unwrap();
        let record = b.store.get(&id).unwrap();
        let third = 1.0 / 3.0;
        for value in record.descriptor.values() {
            assert!((value - third).abs() < 1e-6);
        }
        assert_eq!(record.sample_count, 3);
        assert_eq!(b.backend.write_count(), 1);
        assert!(b.display.saw_text("Captured sample 3/3"));
    }

    #[test]
    fn test_rejected_samples_are_not_counted() {
        let mut b = bench();
        b.script
            .queue_descriptor(None)
            .queue_descriptor(Some(d(&[1.0, 0.0])));
        b.buttons.presses(&[Button::Select, Button::Select, Button::Back]);

        let id = b.run(&no_liveness(), EnrollTarget::New("Bo".into())).unwrap();
        assert_eq!(b.store.get(&id).unwrap().sample_count, 1);
        assert!(b.display.saw_text("No features, adjust angle"));
    }

    #[test]
    fn test_small_face_prompts_to_move_closer() {
        let mut b = bench();
        b.script.set_faces(vec![FaceBox::new(0, 0, 40, 40)]);
        b.script.set_fallback_descriptor(Some(d(&[1.0])));
        b.buttons.press(Button::Select).press(Button::Back);

        let err = b.run(&no_liveness(), EnrollTarget::New("Cy".into())).unwrap_err();
        assert!(matches!(err, EnrollError::Cancelled));
        assert!(b.display.saw_text("Too far, move closer"));
        assert_eq!(b.script.extract_calls(), 0);
        assert!(b.store.is_empty());
    }

    #[test]
    fn test_back_before_any_sample_cancels() {
        let mut b = bench();
        b.buttons.press(Button::Back);
        let err = b.run(&no_liveness(), EnrollTarget::New("Di".into())).unwrap_err();
        assert!(matches!(err, EnrollError::Cancelled));
        assert!(b.store.is_empty());
        assert_eq!(b.backend.write_count(), 0);
    }

    #[test]
    fn test_long_back_cancels_after_samples() {
        let mut b = bench();
        b.script.set_fallback_descriptor(Some(d(&[1.0, 1.0])));
        b.buttons.press(Button::Select).long_press(Button::Back);
        let err = b.run(&no_liveness(), EnrollTarget::New("Ed".into())).unwrap_err();
        assert!(matches!(err, EnrollError::Cancelled));
        assert!(b.store.is_empty());
    }

    #[test]
    fn test_liveness_failure_discards_samples() {
        let mut b = bench();
        b.script.set_fallback_descriptor(Some(d(&[1.0, 1.0])));
        b.buttons.presses(&[Button::Select, Button::Back]);

        let err = b.run(&Settings::default(), EnrollTarget::New("Flo".into())).unwrap_err();
        assert!(matches!(err, EnrollError::LivenessFailed));
        assert!(b.store.is_empty());
        assert_eq!(b.backend.write_count(), 0);
    }

    #[test]
    fn test_liveness_pass_commits() {
        let mut b = bench();
        b.script
            .set_fallback_descriptor(Some(d(&[1.0, 1.0])))
            .queue_eyes(&[true, false]);
        b.buttons.presses(&[Button::Select, Button::Back]);

        let id = b.run(&Settings::default(), EnrollTarget::New("Gus".into())).unwrap();
        assert_eq!(b.store.get(&id).unwrap().name, "Gus");
    }

    #[test]
    fn test_reenroll_replaces_descriptor() {
        let mut b = bench();
        let id = b.store.add("Hal", d(&[0.0, 1.0]), 5).unwrap();
        b.script.set_fallback_descriptor(Some(d(&[1.0, 0.0])));
        b.buttons.presses(&[Button::Select, Button::Back]);

        let returned = b.run(&no_liveness(), EnrollTarget::Existing(id.clone())).unwrap();
        assert_eq!(returned, id);
        let record = b.store.get(&id).unwrap();
        assert_eq!(record.descriptor, d(&[1.0, 0.0]));
        assert_eq!(record.sample_count, 1);
        assert_eq!(b.store.len(), 1);
    }

    #[test]
    fn test_commit_failure_leaves_store_unchanged() {
        let mut b = bench();
        b.script.set_fallback_descriptor(Some(d(&[1.0, 1.0])));
        b.buttons.presses(&[Button::Select, Button::Back]);
        b.backend.fail_writes(true);

        let err = b.run(&no_liveness(), EnrollTarget::New("Ivy".into())).unwrap_err();
        assert!(matches!(err, EnrollError::Store(StoreError::WriteFailed { .. })));
        assert_eq!(err.user_message(), "Save failed");
        assert!(b.store.is_empty());
    }
}
