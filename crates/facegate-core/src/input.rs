//! Debounced press / long-press edge detection for the four board buttons.
//!
//! Buttons are sampled, never interrupt-driven. Each button runs its own
//! small state machine:
//!
//! ```text
//! Idle --raw down--> Debouncing --still down after debounce--> ConfirmedDown
//! Debouncing --released--> Idle                      (bounce, no event)
//! ConfirmedDown --released--> Idle                   (emits Pressed)
//! ConfirmedDown --held past long press--> LongFired  (emits LongPressed)
//! LongFired --released--> Idle                       (no trailing Pressed)
//! ```
//!
//! Polling at any interval at least as long as the debounce window works;
//! the reference cadence is the 100 ms controller tick.

use crate::clock::elapsed_ms;
use crate::config::Tuning;

/// Logical buttons on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Up,
    Down,
    Select,
    Back,
}

impl Button {
    pub const ALL: [Button; 4] = [Button::Up, Button::Down, Button::Select, Button::Back];

    fn index(self) -> usize {
        match self {
            Button::Up => 0,
            Button::Down => 1,
            Button::Select => 2,
            Button::Back => 3,
        }
    }
}

/// Raw, undebounced button levels.
///
/// Implementations report the *logical* state: `true` while the button is
/// held, whatever the electrical polarity of the pin.
pub trait ButtonLevels {
    fn is_down(&mut self, button: Button) -> bool;
}

/// Edge reported by [`InputDevice::poll_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonEvent {
    #[default]
    None,
    Pressed,
    LongPressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Debouncing,
    ConfirmedDown,
    LongFired,
}

/// Per-button debounce state. Only [`InputDevice`] touches it.
#[derive(Debug, Clone, Copy)]
pub struct ButtonState {
    phase: Phase,
    last_level: bool,
    /// When the current press was first seen (start of the debounce window).
    changed_at_ms: u32,
}

impl ButtonState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            last_level: false,
            changed_at_ms: 0,
        }
    }

    /// True while a confirmed press is in progress.
    pub fn is_held(&self) -> bool {
        matches!(self.phase, Phase::ConfirmedDown | Phase::LongFired)
    }

    /// Raw level seen at the last poll.
    pub fn last_level(&self) -> bool {
        self.last_level
    }

    /// Tick at which the current (or last) press was first seen.
    pub fn changed_at_ms(&self) -> u32 {
        self.changed_at_ms
    }

    fn step(&mut self, down: bool, now_ms: u32, timing: &EdgeTiming) -> ButtonEvent {
        self.last_level = down;
        let held_for = elapsed_ms(self.changed_at_ms, now_ms);

        match (self.phase, down) {
            (Phase::Idle, true) => {
                self.phase = Phase::Debouncing;
                self.changed_at_ms = now_ms;
                ButtonEvent::None
            }
            (Phase::Idle, false) => ButtonEvent::None,
            (Phase::Debouncing, false) => {
                self.phase = Phase::Idle;
                ButtonEvent::None
            }
            (Phase::Debouncing, true) => {
                if held_for < timing.debounce_ms {
                    return ButtonEvent::None;
                }
                self.phase = Phase::ConfirmedDown;
                // A slow poll can cross both windows at once.
                self.check_long_press(held_for, timing)
            }
            (Phase::ConfirmedDown, true) => self.check_long_press(held_for, timing),
            (Phase::ConfirmedDown, false) => {
                self.phase = Phase::Idle;
                ButtonEvent::Pressed
            }
            (Phase::LongFired, true) => ButtonEvent::None,
            (Phase::LongFired, false) => {
                self.phase = Phase::Idle;
                ButtonEvent::None
            }
        }
    }

    fn check_long_press(&mut self, held_for: u32, timing: &EdgeTiming) -> ButtonEvent {
        if held_for >= timing.long_press_ms {
            self.phase = Phase::LongFired;
            ButtonEvent::LongPressed
        } else {
            ButtonEvent::None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeTiming {
    debounce_ms: u32,
    long_press_ms: u32,
}

/// Edges seen on every button during one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputEvents {
    events: [ButtonEvent; 4],
}

impl InputEvents {
    /// Events with a single edge on one button.
    pub fn single(button: Button, event: ButtonEvent) -> Self {
        let mut events = Self::default();
        events.set(button, event);
        events
    }

    pub fn get(&self, button: Button) -> ButtonEvent {
        self.events[button.index()]
    }

    pub fn pressed(&self, button: Button) -> bool {
        self.get(button) == ButtonEvent::Pressed
    }

    pub fn long_pressed(&self, button: Button) -> bool {
        self.get(button) == ButtonEvent::LongPressed
    }

    /// Any short press on any button.
    pub fn any_pressed(&self) -> bool {
        self.events.iter().any(|e| *e == ButtonEvent::Pressed)
    }

    pub fn is_empty(&self) -> bool {
        self.events.iter().all(|e| *e == ButtonEvent::None)
    }

    fn set(&mut self, button: Button, event: ButtonEvent) {
        self.events[button.index()] = event;
    }
}

/// Debounced view over a set of raw button levels.
pub struct InputDevice {
    levels: Box<dyn ButtonLevels>,
    states: [ButtonState; 4],
    timing: EdgeTiming,
}

impl InputDevice {
    pub fn new(levels: Box<dyn ButtonLevels>, tuning: &Tuning) -> Self {
        Self {
            levels,
            states: [ButtonState::new(); 4],
            timing: EdgeTiming {
                debounce_ms: tuning.debounce_ms,
                long_press_ms: tuning.long_press_ms,
            },
        }
    }

    /// Sample one button and advance its state machine.
    pub fn poll_edge(&mut self, button: Button, now_ms: u32) -> ButtonEvent {
        let down = self.levels.is_down(button);
        let event = self.states[button.index()].step(down, now_ms, &self.timing);
        if event != ButtonEvent::None {
            tracing::debug!(?button, ?event, "button edge");
        }
        event
    }

    /// Sample every button once. Call this once per tick so no button's
    /// state machine is starved by another button's event.
    pub fn poll(&mut self, now_ms: u32) -> InputEvents {
        let mut events = InputEvents::default();
        for button in Button::ALL {
            events.set(button, self.poll_edge(button, now_ms));
        }
        events
    }

    pub fn state(&self, button: Button) -> &ButtonState {
        &self.states[button.index()]
    }
}
