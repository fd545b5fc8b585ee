//! Scripted stand-ins for the board collaborators.
//!
//! Used by the test suites and for bench runs without hardware. Every type
//! is a cheap `Clone` handle over shared state, so a test can keep one handle
//! for inspection after boxing another into the controller.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use crate::clock::Clock;
use crate::console::{Console, NameInput};
use crate::input::{Button, ButtonLevels};
use crate::provider::{DisplayOutput, FaceDetector, FaceFeatureProvider, ImageSource, OverlayColor, Vision};
use crate::store::StoreBackend;
use crate::types::{Descriptor, FaceBox, Frame};

/// Hold time for a scripted short press: long enough for two polls at the
/// reference tick, well short of a long press.
pub const SHORT_PRESS_MS: u32 = 200;
/// Hold time for a scripted long press.
pub const LONG_PRESS_HOLD_MS: u32 = 1300;
/// Released gap between scripted actions, so each release is observed.
const RELEASE_GAP_MS: u32 = 100;

/// Clock that only moves when slept on or advanced by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: u32) -> Self {
        let clock = Self::new();
        clock.now.set(ms);
        clock
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u32) {
        self.advance(ms);
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Hold(Button, u32),
    Idle(u32),
}

#[derive(Debug)]
struct ButtonScript {
    clock: Option<ManualClock>,
    manual: [bool; 4],
    pending: VecDeque<Step>,
    active: Option<(Step, u32)>,
    ready_at: u32,
}

/// Button levels from manual toggles and/or a queued press script.
///
/// Scripted steps start lazily on the first read after the previous step
/// ended, so a script does not depend on how many ticks the code under test
/// spends between interactions.
#[derive(Debug, Clone)]
pub struct ScriptedButtons {
    inner: Rc<RefCell<ButtonScript>>,
}

impl ScriptedButtons {
    /// Manual-only levels; use [`set`](Self::set).
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Levels that follow a press script timed against `clock`.
    pub fn with_clock(clock: &ManualClock) -> Self {
        Self::build(Some(clock.clone()))
    }

    fn build(clock: Option<ManualClock>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ButtonScript {
                clock,
                manual: [false; 4],
                pending: VecDeque::new(),
                active: None,
                ready_at: 0,
            })),
        }
    }

    pub fn set(&self, button: Button, down: bool) {
        self.inner.borrow_mut().manual[slot(button)] = down;
    }

    /// Queue a clean short press.
    pub fn press(&self, button: Button) -> &Self {
        self.hold(button, SHORT_PRESS_MS)
    }

    /// Queue several short presses in order.
    pub fn presses(&self, buttons: &[Button]) -> &Self {
        for button in buttons {
            self.press(*button);
        }
        self
    }

    pub fn long_press(&self, button: Button) -> &Self {
        self.hold(button, LONG_PRESS_HOLD_MS)
    }

    pub fn hold(&self, button: Button, ms: u32) -> &Self {
        self.inner.borrow_mut().pending.push_back(Step::Hold(button, ms));
        self
    }

    /// Queue a stretch with every button released.
    pub fn wait(&self, ms: u32) -> &Self {
        self.inner.borrow_mut().pending.push_back(Step::Idle(ms));
        self
    }

    /// Steps not yet started.
    pub fn remaining(&self) -> usize {
        let inner = self.inner.borrow();
        inner.pending.len() + usize::from(inner.active.is_some())
    }
}

impl Default for ScriptedButtons {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(button: Button) -> usize {
    match button {
        Button::Up => 0,
        Button::Down => 1,
        Button::Select => 2,
        Button::Back => 3,
    }
}

impl ButtonLevels for ScriptedButtons {
    fn is_down(&mut self, button: Button) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.manual[slot(button)] {
            return true;
        }
        let Some(now) = inner.clock.as_ref().map(|clock| clock.now_ms()) else {
            return false;
        };

        if let Some((step, started)) = inner.active {
            let length = match step {
                Step::Hold(_, ms) | Step::Idle(ms) => ms,
            };
            if now.wrapping_sub(started) >= length {
                inner.active = None;
                inner.ready_at = now.wrapping_add(RELEASE_GAP_MS);
                return false;
            }
        }

        if inner.active.is_none() && now.wrapping_sub(inner.ready_at) < u32::MAX / 2 {
            if let Some(step) = inner.pending.pop_front() {
                inner.active = Some((step, now));
            }
        }

        matches!(inner.active, Some((Step::Hold(held, _), _)) if held == button)
    }
}

/// Camera returning blank frames with increasing sequence numbers.
#[derive(Debug, Clone)]
pub struct ScriptedCamera {
    width: u32,
    height: u32,
    captured: Rc<Cell<u32>>,
}

impl ScriptedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            captured: Rc::new(Cell::new(0)),
        }
    }

    pub fn captured(&self) -> u32 {
        self.captured.get()
    }
}

impl ImageSource for ScriptedCamera {
    fn capture(&mut self) -> Frame {
        let sequence = self.captured.get();
        self.captured.set(sequence + 1);
        let mut frame = Frame::blank(self.width, self.height);
        frame.sequence = sequence;
        frame
    }
}

#[derive(Debug, Default)]
struct VisionScript {
    faces: Vec<FaceBox>,
    face_queue: VecDeque<Vec<FaceBox>>,
    eyes: VecDeque<bool>,
    descriptors: VecDeque<Option<Descriptor>>,
    fallback: Option<Descriptor>,
    extract_calls: usize,
}

/// Detector and feature provider driven by queues.
///
/// Faces: each detection pops the face queue if non-empty, else reports the
/// standing face list. Eyes: popped per query, `false` once exhausted.
/// Descriptors: popped per extraction, then the fallback.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVision {
    inner: Rc<RefCell<VisionScript>>,
}

impl ScriptedVision {
    pub fn new() -> Self {
        Self::default()
    }

    /// Faces reported on every frame once the queue is drained.
    pub fn set_faces(&self, faces: Vec<FaceBox>) -> &Self {
        self.inner.borrow_mut().faces = faces;
        self
    }

    /// Faces for the next detection only.
    pub fn queue_faces(&self, faces: Vec<FaceBox>) -> &Self {
        self.inner.borrow_mut().face_queue.push_back(faces);
        self
    }

    pub fn queue_eyes(&self, eyes: &[bool]) -> &Self {
        self.inner.borrow_mut().eyes.extend(eyes.iter().copied());
        self
    }

    pub fn queue_descriptor(&self, descriptor: Option<Descriptor>) -> &Self {
        self.inner.borrow_mut().descriptors.push_back(descriptor);
        self
    }

    pub fn set_fallback_descriptor(&self, descriptor: Option<Descriptor>) -> &Self {
        self.inner.borrow_mut().fallback = descriptor;
        self
    }

    pub fn extract_calls(&self) -> usize {
        self.inner.borrow().extract_calls
    }

    /// Bundle with `camera` into a [`Vision`].
    pub fn into_vision(self, camera: ScriptedCamera) -> Vision {
        Vision::new(Box::new(camera), Box::new(self.clone()), Box::new(self))
    }
}

impl FaceDetector for ScriptedVision {
    fn detect(&mut self, _frame: &Frame) -> Vec<FaceBox> {
        let mut inner = self.inner.borrow_mut();
        match inner.face_queue.pop_front() {
            Some(faces) => faces,
            None => inner.faces.clone(),
        }
    }

    fn eyes_visible(&mut self, _frame: &Frame, _face: &FaceBox) -> bool {
        self.inner.borrow_mut().eyes.pop_front().unwrap_or(false)
    }
}

impl FaceFeatureProvider for ScriptedVision {
    fn extract(&mut self, _frame: &Frame, _face: &FaceBox) -> Option<Descriptor> {
        let mut inner = self.inner.borrow_mut();
        inner.extract_calls += 1;
        match inner.descriptors.pop_front() {
            Some(descriptor) => descriptor,
            None => inner.fallback.clone(),
        }
    }
}

/// One overlay drawn on a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub frame_sequence: u32,
    pub face: FaceBox,
    pub label: String,
    pub color: OverlayColor,
}

#[derive(Debug, Default)]
struct DisplayLog {
    screens: Vec<Vec<String>>,
    overlays: Vec<Overlay>,
}

/// Display that records every screen and overlay.
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    inner: Rc<RefCell<DisplayLog>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screens(&self) -> Vec<Vec<String>> {
        self.inner.borrow().screens.clone()
    }

    pub fn overlays(&self) -> Vec<Overlay> {
        self.inner.borrow().overlays.clone()
    }

    /// Whether any screen line so far contains `needle`.
    pub fn saw_text(&self, needle: &str) -> bool {
        self.inner
            .borrow()
            .screens
            .iter()
            .flatten()
            .any(|line| line.contains(needle))
    }
}

impl DisplayOutput for RecordingDisplay {
    fn draw_overlay(&mut self, frame: &Frame, face: &FaceBox, label: &str, color: OverlayColor) {
        self.inner.borrow_mut().overlays.push(Overlay {
            frame_sequence: frame.sequence,
            face: *face,
            label: label.to_string(),
            color,
        });
    }

    fn show_text(&mut self, lines: &[String]) {
        self.inner.borrow_mut().screens.push(lines.to_vec());
    }
}

/// Name input answering from a queue; `None` once exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedNames {
    answers: Rc<RefCell<VecDeque<Option<String>>>>,
}

impl ScriptedNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, name: Option<&str>) -> &Self {
        self.answers.borrow_mut().push_back(name.map(str::to_string));
        self
    }
}

impl NameInput for ScriptedNames {
    fn prompt(&mut self, title: &str, console: &mut Console) -> Option<String> {
        console.screen(title, &[], None);
        self.answers.borrow_mut().pop_front().flatten()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    contents: Option<Vec<u8>>,
    fail_writes: bool,
    writes: usize,
}

/// In-memory store backend with switchable write failure.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Rc<RefCell<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: &[u8]) -> Self {
        let backend = Self::new();
        backend.inner.borrow_mut().contents = Some(bytes.to_vec());
        backend
    }

    /// Make every following write fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.inner.borrow().contents.clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.inner.borrow().contents.clone())
    }

    fn write(&mut self, contents: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure"));
        }
        inner.contents = Some(contents.to_vec());
        inner.writes += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
