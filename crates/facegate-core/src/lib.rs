//! facegate-core: identity matching engine and cooperative control loop.
//!
//! Debounced button input, a durable template store, cosine matching, a
//! blink liveness gate, multi-sample enrollment and the menu-driven
//! controller that sequences them. Camera, detector, feature extractor,
//! display and name entry are capability traits in [`provider`] and
//! [`console`]; the board crates implement them.

pub mod clock;
pub mod config;
pub mod console;
pub mod controller;
pub mod enrollment;
pub mod input;
pub mod liveness;
pub mod matcher;
pub mod menu;
pub mod provider;
pub mod sim;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use clock::{Clock, SystemClock};
pub use config::{Settings, Threshold, Tuning};
pub use console::{Console, NameInput};
pub use controller::Controller;
pub use enrollment::{EnrollError, EnrollTarget, SampleRejection};
pub use input::{Button, ButtonEvent, ButtonLevels, InputDevice};
pub use matcher::{find_best_match, MatchResult};
pub use provider::{DisplayOutput, FaceDetector, FaceFeatureProvider, ImageSource, OverlayColor, Vision};
pub use store::{JsonFile, LoadStatus, StoreBackend, StoreError, TemplateStore};
pub use types::{Descriptor, FaceBox, Frame, IdentityRecord};

/// Default template store location: `$XDG_DATA_HOME/facegate/templates.json`,
/// falling back to `~/.local/share`, then `/tmp`.
pub fn default_store_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("facegate").join("templates.json")
}
