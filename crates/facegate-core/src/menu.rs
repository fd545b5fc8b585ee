//! Generic button-driven list menu.
//!
//! Every screen that offers a choice is a [`Menu`]: a title, option labels
//! and an optional action per option. Actions are plain values (usually an
//! enum per screen); the caller dispatches on them.

use thiserror::Error;

use crate::console::Console;
use crate::input::{Button, InputEvents};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MenuError {
    #[error("a menu needs at least one option")]
    NoOptions,
}

/// Outcome of a menu interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuChoice<A> {
    /// Select on an option with an action attached.
    Action(A),
    /// Select on an option without an action: its index.
    Index(usize),
    /// Back was pressed. No action runs.
    Back,
}

pub struct Menu<A> {
    title: String,
    options: Vec<String>,
    actions: Vec<Option<A>>,
    selected: usize,
}

impl<A: Clone> Menu<A> {
    pub fn new<S: Into<String>>(title: impl Into<String>, options: Vec<S>) -> Result<Self, MenuError> {
        if options.is_empty() {
            return Err(MenuError::NoOptions);
        }
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        let actions = vec![None; options.len()];
        Ok(Self {
            title: title.into(),
            options,
            actions,
            selected: 0,
        })
    }

    /// Build a menu where every option carries an action.
    pub fn with_actions<S: Into<String>>(
        title: impl Into<String>,
        entries: Vec<(S, A)>,
    ) -> Result<Self, MenuError> {
        let (labels, actions): (Vec<S>, Vec<A>) = entries.into_iter().unzip();
        let mut menu = Self::new(title, labels)?;
        menu.actions = actions.into_iter().map(Some).collect();
        Ok(menu)
    }

    /// Attach `action` to option `index`. Out-of-range indices are ignored.
    pub fn map(mut self, index: usize, action: A) -> Self {
        if let Some(slot) = self.actions.get_mut(index) {
            *slot = Some(action);
        }
        self
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Move the cursor, clamped into range.
    pub fn select(&mut self, index: usize) {
        self.selected = index.min(self.options.len() - 1);
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Replace option labels, keeping the cursor where possible.
    pub fn set_label(&mut self, index: usize, label: impl Into<String>) {
        if let Some(slot) = self.options.get_mut(index) {
            *slot = label.into();
        }
    }

    pub fn move_up(&mut self) {
        let len = self.options.len();
        self.selected = (self.selected + len - 1) % len;
    }

    pub fn move_down(&mut self) {
        self.selected = (self.selected + 1) % self.options.len();
    }

    /// Apply one tick's worth of button edges.
    ///
    /// Returns `Some` once the user has chosen; navigation returns `None`.
    pub fn handle(&mut self, events: &InputEvents) -> Option<MenuChoice<A>> {
        if events.pressed(Button::Up) {
            self.move_up();
        } else if events.pressed(Button::Down) {
            self.move_down();
        } else if events.pressed(Button::Select) {
            return Some(match &self.actions[self.selected] {
                Some(action) => MenuChoice::Action(action.clone()),
                None => MenuChoice::Index(self.selected),
            });
        } else if events.pressed(Button::Back) {
            return Some(MenuChoice::Back);
        }
        None
    }

    /// Option labels with the cursor marker on the selected one.
    pub fn render_lines(&self) -> Vec<String> {
        self.options
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let marker = if i == self.selected { "> " } else { "  " };
                format!("{marker}{label}")
            })
            .collect()
    }

    /// Draw the menu and poll until the user chooses.
    pub fn run(&mut self, console: &mut Console) -> MenuChoice<A> {
        loop {
            let lines = self.render_lines();
            console.screen(
                &self.title,
                &lines,
                Some("Up/Down: move | Select: ok | Back: return"),
            );
            let events = console.tick();
            if console.shutdown_requested() {
                return MenuChoice::Back;
            }
            if let Some(choice) = self.handle(&events) {
                tracing::debug!(menu = %self.title, selected = self.selected, "menu choice");
                return choice;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ButtonEvent;

    fn press(button: Button) -> InputEvents {
        InputEvents::single(button, ButtonEvent::Pressed)
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Pick {
        First,
        Third,
    }

    fn menu() -> Menu<Pick> {
        Menu::new("Main", vec!["one", "two", "three"])
            .unwrap()
            .map(0, Pick::First)
            .map(2, Pick::Third)
    }

    #[test]
    fn test_empty_menu_is_rejected() {
        let menu: Result<Menu<Pick>, _> = Menu::new("Empty", Vec::<String>::new());
        assert_eq!(menu.err(), Some(MenuError::NoOptions));
    }

    #[test]
    fn test_down_from_last_wraps_to_first() {
        let mut menu = menu();
        menu.select(2);
        assert_eq!(menu.handle(&press(Button::Down)), None);
        assert_eq!(menu.selected(), 0);
    }

    #[test]
    fn test_up_from_first_wraps_to_last() {
        let mut menu = menu();
        assert_eq!(menu.handle(&press(Button::Up)), None);
        assert_eq!(menu.selected(), 2);
    }

    #[test]
    fn test_single_option_wraps_onto_itself() {
        let mut menu: Menu<Pick> = Menu::new("Solo", vec!["only"]).unwrap();
        menu.handle(&press(Button::Down));
        assert_eq!(menu.selected(), 0);
        menu.handle(&press(Button::Up));
        assert_eq!(menu.selected(), 0);
    }

    #[test]
    fn test_select_mapped_returns_action() {
        let mut menu = menu();
        assert_eq!(menu.handle(&press(Button::Select)), Some(MenuChoice::Action(Pick::First)));
        menu.select(2);
        assert_eq!(menu.handle(&press(Button::Select)), Some(MenuChoice::Action(Pick::Third)));
    }

    #[test]
    fn test_select_unmapped_returns_index() {
        let mut menu = menu();
        menu.handle(&press(Button::Down));
        assert_eq!(menu.handle(&press(Button::Select)), Some(MenuChoice::Index(1)));
    }

    #[test]
    fn test_back_returns_cancel_sentinel() {
        let mut menu = menu();
        menu.select(2);
        assert_eq!(menu.handle(&press(Button::Back)), Some(MenuChoice::Back));
    }

    #[test]
    fn test_long_press_does_not_navigate() {
        let mut menu = menu();
        let events = InputEvents::single(Button::Down, ButtonEvent::LongPressed);
        assert_eq!(menu.handle(&events), None);
        assert_eq!(menu.selected(), 0);
    }

    #[test]
    fn test_with_actions_maps_every_option() {
        let mut menu = Menu::with_actions("Confirm", vec![("Yes", true), ("No", false)]).unwrap();
        menu.handle(&press(Button::Down));
        assert_eq!(menu.handle(&press(Button::Select)), Some(MenuChoice::Action(false)));
    }

    #[test]
    fn test_render_marks_cursor() {
        let mut menu = menu();
        menu.handle(&press(Button::Down));
        assert_eq!(menu.render_lines(), vec!["  one", "> two", "  three"]);
    }
}
