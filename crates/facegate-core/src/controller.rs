//! Top-level application state machine.
//!
//! Owns the store, the runtime [`Settings`] and every collaborator, and
//! sequences recognition, enrollment, user management and settings through
//! [`Menu`] instances. Nothing else holds the store, so at most one
//! enrollment can be in flight.

use crate::config::Settings;
use crate::console::{Console, NameInput};
use crate::enrollment::{run_enrollment, EnrollTarget};
use crate::input::Button;
use crate::matcher::find_best_match;
use crate::menu::{Menu, MenuChoice, MenuError};
use crate::provider::{OverlayColor, Vision};
use crate::store::{LoadStatus, StoreBackend, TemplateStore};
use crate::types::is_valid_name;

/// Overlay label for a face that matched nobody.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainAction {
    Recognize,
    Enroll,
    ManageUsers,
    Settings,
    About,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserAction {
    View,
    Rename,
    Reenroll,
    Delete,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsAction {
    Threshold,
    Liveness,
    Reset,
    Back,
}

pub struct Controller<B> {
    console: Console,
    vision: Vision,
    store: TemplateStore<B>,
    names: Box<dyn NameInput>,
    settings: Settings,
}

impl<B: StoreBackend> Controller<B> {
    pub fn new(
        console: Console,
        vision: Vision,
        store: TemplateStore<B>,
        names: Box<dyn NameInput>,
        settings: Settings,
    ) -> Self {
        Self {
            console,
            vision,
            store,
            names,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &TemplateStore<B> {
        &self.store
    }

    /// Show what loading the store found when the user needs to know.
    pub fn report_load_status(&mut self, status: &LoadStatus) {
        match status {
            LoadStatus::Corrupt(err) => self.console.notify(err.user_message()),
            LoadStatus::Loaded { dropped, .. } if *dropped > 0 => {
                self.console.notify(&format!("Skipped {dropped} bad records"));
            }
            _ => {}
        }
    }

    /// Run the main menu until Exit is chosen or shutdown is requested.
    pub fn run(&mut self) -> Result<(), MenuError> {
        self.console.notify("System ready");
        let mut menu = Menu::with_actions(
            "Facegate",
            vec![
                ("Recognize", MainAction::Recognize),
                ("Enroll", MainAction::Enroll),
                ("Manage users", MainAction::ManageUsers),
                ("Settings", MainAction::Settings),
                ("About", MainAction::About),
                ("Exit", MainAction::Exit),
            ],
        )?;

        loop {
            let choice = menu.run(&mut self.console);
            if self.console.shutdown_requested() {
                tracing::info!("shutdown requested, leaving main menu");
                return Ok(());
            }
            let MenuChoice::Action(action) = choice else {
                continue;
            };
            match action {
                MainAction::Recognize => self.recognize(),
                MainAction::Enroll => self.enroll_new(),
                MainAction::ManageUsers => self.manage_users()?,
                MainAction::Settings => self.system_settings()?,
                MainAction::About => self.about(),
                MainAction::Exit => {
                    self.console.notify("System shut down");
                    tracing::info!("exit chosen");
                    return Ok(());
                }
            }
        }
    }

    /// Continuous recognition until Back.
    pub fn recognize(&mut self) {
        self.console.notify("Recognition started\nBack to exit");
        tracing::info!(threshold = %self.settings.threshold, "recognition started");

        loop {
            let events = self.console.tick();
            if events.pressed(Button::Back)
                || events.long_pressed(Button::Back)
                || self.console.shutdown_requested()
            {
                break;
            }

            let frame = self.vision.camera.capture();
            for face in self.vision.detector.detect(&frame) {
                let best = self
                    .vision
                    .features
                    .extract(&frame, &face)
                    .and_then(|probe| find_best_match(&probe, self.store.list(), self.settings.threshold));
                match best {
                    Some(found) => {
                        tracing::debug!(id = %found.id, similarity = found.similarity, "face recognised");
                        self.console.overlay(&frame, &face, &found.name, OverlayColor::Match);
                    }
                    None => self.console.overlay(&frame, &face, UNKNOWN_LABEL, OverlayColor::Unknown),
                }
            }
        }
        tracing::info!("recognition stopped");
    }

    fn enroll_new(&mut self) {
        let Some(name) = self.prompt_name("Enter name") else {
            self.console.notify("Enrollment cancelled");
            return;
        };
        if !is_valid_name(&name) {
            self.console.notify("Invalid name");
            return;
        }

        self.console.notify(&format!(
            "Name: {name}\nFace the camera\nSelect: capture | Back: finish"
        ));
        let result = run_enrollment(
            &mut self.console,
            &mut self.vision,
            &mut self.store,
            &self.settings,
            EnrollTarget::New(name.clone()),
        );
        match result {
            Ok(_) => self.console.notify(&format!("Enrolled {name}")),
            Err(err) => self.console.notify(err.user_message()),
        }
    }

    /// Prompt through the name input; empty answers count as cancel.
    fn prompt_name(&mut self, title: &str) -> Option<String> {
        self.names
            .prompt(title, &mut self.console)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn manage_users(&mut self) -> Result<(), MenuError> {
        loop {
            if self.store.is_empty() {
                self.console.notify("No users enrolled");
                return Ok(());
            }

            let users: Vec<(String, String)> = self
                .store
                .list()
                .map(|entry| (entry.id.to_string(), format!("{} ({})", entry.record.name, entry.id)))
                .collect();
            let mut labels: Vec<String> = users.iter().map(|(_, label)| label.clone()).collect();
            labels.push("Back".to_string());

            let mut menu = Menu::new("Manage users", labels)?;
            for (index, (id, _)) in users.iter().enumerate() {
                menu = menu.map(index, id.clone());
            }

            match menu.run(&mut self.console) {
                MenuChoice::Action(id) => self.user_details(&id)?,
                MenuChoice::Index(_) | MenuChoice::Back => return Ok(()),
            }
            if self.console.shutdown_requested() {
                return Ok(());
            }
        }
    }

    fn user_details(&mut self, id: &str) -> Result<(), MenuError> {
        let mut menu = Menu::with_actions(
            "User",
            vec![
                ("View details", UserAction::View),
                ("Rename", UserAction::Rename),
                ("Re-enroll face", UserAction::Reenroll),
                ("Delete user", UserAction::Delete),
                ("Back", UserAction::Back),
            ],
        )?;

        loop {
            let Some(name) = self.store.get(id).map(|record| record.name.clone()) else {
                self.console.notify("User not found");
                return Ok(());
            };
            menu.set_title(format!("User: {name}"));

            let action = match menu.run(&mut self.console) {
                MenuChoice::Action(UserAction::Back) | MenuChoice::Back | MenuChoice::Index(_) => {
                    return Ok(())
                }
                MenuChoice::Action(action) => action,
            };
            match action {
                UserAction::View => self.view_user(id),
                UserAction::Rename => self.rename_user(id),
                UserAction::Reenroll => self.reenroll_user(id),
                UserAction::Delete => {
                    if self.delete_user(id)? {
                        return Ok(());
                    }
                }
                UserAction::Back => return Ok(()),
            }
        }
    }

    fn view_user(&mut self, id: &str) {
        let Some(record) = self.store.get(id) else {
            self.console.notify("User not found");
            return;
        };
        let title = format!("User: {}", record.name);
        let body = vec![
            format!("Id: {id}"),
            format!("Registered: {}", record.registered_at),
            format!("Samples: {}", record.sample_count),
        ];
        self.console.show_until_pressed(&title, &body);
    }

    fn rename_user(&mut self, id: &str) {
        let Some(current) = self.store.get(id).map(|record| record.name.clone()) else {
            self.console.notify("User not found");
            return;
        };
        let Some(name) = self.prompt_name(&format!("Rename: {current}")) else {
            return;
        };
        if name == current {
            return;
        }

        match self.store.rename(id, &name) {
            Ok(()) => self.console.notify(&format!("Renamed to {name}")),
            Err(err) => {
                tracing::warn!(id, error = %err, "rename failed");
                self.console.notify(err.user_message());
            }
        }
    }

    fn reenroll_user(&mut self, id: &str) {
        let Some(name) = self.store.get(id).map(|record| record.name.clone()) else {
            self.console.notify("User not found");
            return;
        };
        self.console.notify(&format!(
            "Re-enrolling {name}\nFace the camera\nSelect: capture | Back: finish"
        ));
        let result = run_enrollment(
            &mut self.console,
            &mut self.vision,
            &mut self.store,
            &self.settings,
            EnrollTarget::Existing(id.to_string()),
        );
        match result {
            Ok(_) => self.console.notify("Face data updated"),
            Err(err) => self.console.notify(err.user_message()),
        }
    }

    /// Returns whether the record is gone.
    fn delete_user(&mut self, id: &str) -> Result<bool, MenuError> {
        let Some(name) = self.store.get(id).map(|record| record.name.clone()) else {
            self.console.notify("User not found");
            return Ok(true);
        };
        if !self.confirm(&format!("Delete {name}?"))? {
            return Ok(false);
        }

        match self.store.delete(id) {
            Ok(_) => {
                self.console.notify(&format!("Deleted {name}"));
                Ok(true)
            }
            Err(err) => {
                tracing::error!(id, error = %err, "delete failed");
                self.console.notify(err.user_message());
                Ok(false)
            }
        }
    }

    fn confirm(&mut self, title: &str) -> Result<bool, MenuError> {
        let mut menu = Menu::with_actions(title, vec![("Confirm", true), ("Cancel", false)])?;
        Ok(matches!(menu.run(&mut self.console), MenuChoice::Action(true)))
    }

    fn system_settings(&mut self) -> Result<(), MenuError> {
        let mut menu = Menu::with_actions(
            "Settings",
            vec![
                (String::new(), SettingsAction::Threshold),
                (String::new(), SettingsAction::Liveness),
                ("Reset database".to_string(), SettingsAction::Reset),
                ("Back".to_string(), SettingsAction::Back),
            ],
        )?;

        loop {
            menu.set_label(0, format!("Threshold: {}", self.settings.threshold));
            let liveness = if self.settings.liveness_enabled { "on" } else { "off" };
            menu.set_label(1, format!("Liveness: {liveness}"));

            match menu.run(&mut self.console) {
                MenuChoice::Action(SettingsAction::Threshold) => self.adjust_threshold(),
                MenuChoice::Action(SettingsAction::Liveness) => self.toggle_liveness(),
                MenuChoice::Action(SettingsAction::Reset) => self.reset_database()?,
                MenuChoice::Action(SettingsAction::Back) | MenuChoice::Back | MenuChoice::Index(_) => {
                    return Ok(())
                }
            }
        }
    }

    /// Up/Down step by 0.1 within [0.1, 1.0]; Select keeps, Back discards.
    fn adjust_threshold(&mut self) {
        let mut pending = self.settings.threshold;
        loop {
            self.console.screen(
                "Adjust threshold",
                &[format!("Current: {pending}")],
                Some("Up: +0.1 | Down: -0.1 | Select: ok | Back: cancel"),
            );
            let events = self.console.tick();
            if self.console.shutdown_requested() {
                return;
            }

            if events.pressed(Button::Up) {
                pending = pending.raised();
            } else if events.pressed(Button::Down) {
                pending = pending.lowered();
            } else if events.pressed(Button::Select) {
                self.settings.threshold = pending;
                tracing::info!(threshold = %pending, "threshold changed");
                self.console.notify(&format!("Threshold set to {pending}"));
                return;
            } else if events.pressed(Button::Back) {
                return;
            }
        }
    }

    fn toggle_liveness(&mut self) {
        self.settings.liveness_enabled = !self.settings.liveness_enabled;
        tracing::info!(enabled = self.settings.liveness_enabled, "liveness toggled");
        if self.settings.liveness_enabled {
            self.console.notify("Liveness check on");
        } else {
            self.console.notify("Liveness check off");
        }
    }

    fn reset_database(&mut self) -> Result<(), MenuError> {
        if !self.confirm("Reset database?")? {
            return Ok(());
        }
        match self.store.reset() {
            Ok(()) => self.console.notify("Database reset"),
            Err(err) => {
                tracing::error!(error = %err, "reset failed");
                self.console.notify(err.user_message());
            }
        }
        Ok(())
    }

    fn about(&mut self) {
        let body = vec![
            "Facegate face recognition".to_string(),
            format!("Version: {}", env!("CARGO_PKG_VERSION")),
        ];
        self.console.show_until_pressed("About", &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Threshold, Tuning};
    use crate::input::InputDevice;
    use crate::sim::{
        ManualClock, MemoryBackend, RecordingDisplay, ScriptedButtons, ScriptedCamera, ScriptedNames,
        ScriptedVision,
    };
    use crate::types::{Descriptor, FaceBox};

    struct Bench {
        buttons: ScriptedButtons,
        script: ScriptedVision,
        display: RecordingDisplay,
        names: ScriptedNames,
        backend: MemoryBackend,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                buttons: ScriptedButtons::new(),
                script: ScriptedVision::new(),
                display: RecordingDisplay::new(),
                names: ScriptedNames::new(),
                backend: MemoryBackend::new(),
            }
        }

        fn controller(&mut self, settings: Settings) -> Controller<MemoryBackend> {
            let clock = ManualClock::new();
            self.buttons = ScriptedButtons::with_clock(&clock);
            let tuning = Tuning::default();
            let console = Console::new(
                InputDevice::new(Box::new(self.buttons.clone()), &tuning),
                Box::new(self.display.clone()),
                Box::new(clock),
                tuning,
            );
            let (store, _) = TemplateStore::load(self.backend.clone());
            let vision = self.script.clone().into_vision(ScriptedCamera::new(320, 240));
            Controller::new(console, vision, store, Box::new(self.names.clone()), settings)
        }
    }

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    #[test]
    fn test_corrupt_store_is_reported() {
        let mut bench = Bench::new();
        bench.backend = MemoryBackend::with_contents(b"garbage");
        let mut controller = bench.controller(Settings::default());
        let (_, status) = TemplateStore::load(bench.backend.clone());
        controller.report_load_status(&status);
        assert!(bench.display.saw_text("Database damaged, starting empty"));
        assert!(controller.store().is_empty());
    }

    #[test]
    fn test_dropped_records_are_reported() {
        let mut bench = Bench::new();
        bench.backend = MemoryBackend::with_contents(
            br#"{"1": {"name": ""}, "2": {"name": "Ada", "descriptor": [1.0], "registered_at": "t", "sample_count": 1}}"#,
        );
        let mut controller = bench.controller(Settings::default());
        let (_, status) = TemplateStore::load(bench.backend.clone());
        controller.report_load_status(&status);
        assert!(bench.display.saw_text("Skipped 1 bad records"));
        assert_eq!(controller.store().len(), 1);
    }

    #[test]
    fn test_clean_load_shows_nothing() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        let (_, status) = TemplateStore::load(bench.backend.clone());
        controller.report_load_status(&status);
        assert!(bench.display.screens().is_empty());
    }

    #[test]
    fn test_exit_from_main_menu() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        // Exit is the sixth option; Up wraps to it from the first.
        bench.buttons.presses(&[Button::Up, Button::Select]);
        controller.run().unwrap();
        assert!(bench.display.saw_text("System shut down"));
    }

    #[test]
    fn test_recognition_labels_known_and_unknown() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        controller.store.add("Ada", d(&[1.0, 0.0]), 1).unwrap();

        bench.script.set_faces(vec![FaceBox::new(0, 0, 100, 100), FaceBox::new(150, 0, 100, 100)]);
        bench
            .script
            .queue_descriptor(Some(d(&[1.0, 0.0])))
            .queue_descriptor(Some(d(&[0.0, 1.0])))
            .queue_descriptor(None);
        bench.buttons.press(Button::Back);

        controller.recognize();
        let overlays = bench.display.overlays();
        assert_eq!(overlays[0].label, "Ada");
        assert_eq!(overlays[0].color, OverlayColor::Match);
        assert_eq!(overlays[1].label, UNKNOWN_LABEL);
        assert_eq!(overlays[2].label, UNKNOWN_LABEL);
        assert_eq!(overlays[2].color, OverlayColor::Unknown);
    }

    #[test]
    fn test_enroll_from_main_menu() {
        let mut bench = Bench::new();
        bench.names.answer(Some("Ada"));
        bench.script.set_faces(vec![FaceBox::new(0, 0, 100, 100)]);
        bench.script.set_fallback_descriptor(Some(d(&[1.0, 0.0, 0.0])));
        let settings = Settings {
            liveness_enabled: false,
            ..Settings::default()
        };
        let mut controller = bench.controller(settings);
        bench
            .buttons
            .presses(&[Button::Down, Button::Select])
            .presses(&[Button::Select; 5])
            .presses(&[Button::Up, Button::Select]);

        controller.run().unwrap();
        let users: Vec<_> = controller.store().list().map(|e| e.record.name.clone()).collect();
        assert_eq!(users, vec!["Ada"]);
        assert_eq!(controller.store().list().next().unwrap().record.sample_count, 5);
        assert!(bench.display.saw_text("Enrolled Ada"));
    }

    #[test]
    fn test_cancelled_name_prompt_adds_nothing() {
        let mut bench = Bench::new();
        bench.names.answer(None);
        let mut controller = bench.controller(Settings::default());
        controller.enroll_new();
        assert!(controller.store().is_empty());
        assert!(bench.display.saw_text("Enrollment cancelled"));
    }

    #[test]
    fn test_overlong_name_is_refused_before_capture() {
        let mut bench = Bench::new();
        bench.names.answer(Some("Bartholomew"));
        let mut controller = bench.controller(Settings::default());
        controller.enroll_new();
        assert!(controller.store().is_empty());
        assert!(bench.display.saw_text("Invalid name"));
        assert_eq!(bench.script.extract_calls(), 0);
    }

    #[test]
    fn test_threshold_adjust_confirm_and_cancel() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        bench.buttons.presses(&[Button::Up, Button::Up, Button::Select]);
        controller.adjust_threshold();
        assert_eq!(controller.settings().threshold, Threshold::from_tenths(7));

        bench.buttons.presses(&[Button::Down, Button::Back]);
        controller.adjust_threshold();
        assert_eq!(controller.settings().threshold, Threshold::from_tenths(7));
    }

    #[test]
    fn test_threshold_clamps_at_bounds() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        bench.buttons.presses(&[Button::Up; 8]).press(Button::Select);
        controller.adjust_threshold();
        assert_eq!(controller.settings().threshold.value(), 1.0);

        bench.buttons.presses(&[Button::Down; 12]).press(Button::Select);
        controller.adjust_threshold();
        assert_eq!(controller.settings().threshold, Threshold::from_tenths(1));
    }

    #[test]
    fn test_settings_menu_toggles_liveness() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        bench.buttons.presses(&[Button::Down, Button::Select, Button::Back]);
        controller.system_settings().unwrap();
        assert!(!controller.settings().liveness_enabled);
        assert!(bench.display.saw_text("Liveness: off"));
    }

    #[test]
    fn test_delete_requires_confirmation() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        let id = controller.store.add("Ada", d(&[1.0]), 1).unwrap();

        // Delete, then Cancel on the confirm menu, then Back.
        bench
            .buttons
            .presses(&[Button::Up, Button::Up, Button::Select])
            .presses(&[Button::Down, Button::Select])
            .press(Button::Back);
        controller.user_details(&id).unwrap();
        assert!(controller.store().contains(&id));

        // Delete, Confirm.
        bench
            .buttons
            .presses(&[Button::Up, Button::Up, Button::Select, Button::Select]);
        controller.user_details(&id).unwrap();
        assert!(!controller.store().contains(&id));
        assert!(bench.display.saw_text("Deleted Ada"));
    }

    #[test]
    fn test_rename_through_name_input() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        let id = controller.store.add("Ada", d(&[1.0]), 1).unwrap();
        bench.names.answer(Some("Lovelace"));
        controller.rename_user(&id);
        assert_eq!(controller.store().get(&id).unwrap().name, "Lovelace");
        assert_eq!(bench.backend.write_count(), 2);

        // Unchanged name is a no-op.
        bench.names.answer(Some("Lovelace"));
        controller.rename_user(&id);
        assert_eq!(bench.backend.write_count(), 2);
    }

    #[test]
    fn test_reset_database_after_confirm() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        controller.store.add("Ada", d(&[1.0]), 1).unwrap();
        controller.store.add("Bo", d(&[0.5]), 1).unwrap();
        bench.buttons.press(Button::Select);
        controller.reset_database().unwrap();
        assert!(controller.store().is_empty());
    }

    #[test]
    fn test_manage_users_with_empty_store() {
        let mut bench = Bench::new();
        let mut controller = bench.controller(Settings::default());
        controller.manage_users().unwrap();
        assert!(bench.display.saw_text("No users enrolled"));
    }
}
