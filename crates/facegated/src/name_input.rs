//! Paged character picker for entering display names with four buttons.
//!
//! Up/Down move the cursor within the page, a long Up/Down flips to the
//! previous/next page, Select appends the highlighted character, Back
//! deletes the last character (or cancels when the name is empty) and a
//! long Select confirms.

use facegate_core::input::InputEvents;
use facegate_core::types::MAX_NAME_CHARS;
use facegate_core::{Button, Console, NameInput};

const PAGES: [&str; 5] = [
    "ABCDEFGHIJKLMNOP",
    "QRSTUVWXYZ-._ ",
    "abcdefghijklmnop",
    "qrstuvwxyz",
    "0123456789",
];
const COLUMNS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Confirmed(String),
    Cancelled,
    /// Long Select on an empty name.
    Empty,
}

/// Picker state, independent of the console.
#[derive(Debug, Clone, Default)]
pub struct NameEntry {
    text: String,
    page: usize,
    selected: usize,
}

impl NameEntry {
    pub fn text(&self) -> &str {
        &self.text
    }

    fn page_chars(&self) -> Vec<char> {
        PAGES[self.page].chars().collect()
    }

    fn highlighted(&self) -> Option<char> {
        self.page_chars().get(self.selected).copied()
    }

    fn flip(&mut self, forward: bool) {
        self.page = if forward {
            (self.page + 1) % PAGES.len()
        } else {
            (self.page + PAGES.len() - 1) % PAGES.len()
        };
        self.selected = 0;
    }

    /// Apply one tick of button edges.
    pub fn handle(&mut self, events: &InputEvents) -> Option<EntryOutcome> {
        let len = self.page_chars().len();
        if events.long_pressed(Button::Select) {
            return Some(if self.text.is_empty() {
                EntryOutcome::Empty
            } else {
                EntryOutcome::Confirmed(self.text.clone())
            });
        }
        if events.long_pressed(Button::Up) {
            self.flip(false);
        } else if events.long_pressed(Button::Down) {
            self.flip(true);
        } else if events.pressed(Button::Up) {
            self.selected = (self.selected + len - 1) % len;
        } else if events.pressed(Button::Down) {
            self.selected = (self.selected + 1) % len;
        } else if events.pressed(Button::Select) {
            if self.text.chars().count() < MAX_NAME_CHARS {
                if let Some(c) = self.highlighted() {
                    self.text.push(c);
                }
            }
        } else if events.pressed(Button::Back) {
            if self.text.pop().is_none() {
                return Some(EntryOutcome::Cancelled);
            }
        }
        None
    }

    /// Screen body: current text, then the page as a grid with the
    /// highlighted character bracketed.
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Name: {}", self.text),
            format!("Page {}/{}", self.page + 1, PAGES.len()),
        ];
        let chars = self.page_chars();
        for (row, chunk) in chars.chunks(COLUMNS).enumerate() {
            let line: String = chunk
                .iter()
                .enumerate()
                .map(|(col, c)| {
                    let shown = if *c == ' ' { '_' } else { *c };
                    if row * COLUMNS + col == self.selected {
                        format!("[{shown}]")
                    } else {
                        format!(" {shown} ")
                    }
                })
                .collect();
            lines.push(line);
        }
        lines
    }
}

/// [`NameInput`] driven by the board buttons.
#[derive(Debug, Default)]
pub struct PagedNameInput;

impl NameInput for PagedNameInput {
    fn prompt(&mut self, title: &str, console: &mut Console) -> Option<String> {
        let mut entry = NameEntry::default();
        loop {
            console.screen(
                title,
                &entry.render(),
                Some("Select: add | Back: delete | hold Select: ok"),
            );
            let events = console.tick();
            if console.shutdown_requested() {
                return None;
            }
            match entry.handle(&events) {
                Some(EntryOutcome::Confirmed(name)) => return Some(name),
                Some(EntryOutcome::Cancelled) => return None,
                Some(EntryOutcome::Empty) => console.notify("Name cannot be empty"),
                None => {}
            }
        }
    }
}
