use std::path::{Path, PathBuf};

use facegate_core::{Settings, Threshold, Tuning};
use facegate_hw::ButtonPins;
use serde::Deserialize;
use thiserror::Error;

/// Config file read when `FACEGATE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/facegate/config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: TOML file, then `FACEGATE_*` environment
/// overrides, then defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Template store JSON file.
    pub store_path: PathBuf,
    pub camera: CameraConfig,
    pub buttons: ButtonConfig,
    pub vision: VisionConfig,
    /// Initial match threshold; the Settings menu can change it at runtime.
    pub threshold: f32,
    pub liveness_enabled: bool,
    pub tuning: Tuning,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device path (default: /dev/video0).
    pub device: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    pub up: u32,
    pub down: u32,
    pub select: u32,
    pub back: u32,
    /// Pressed pulls the line low.
    pub active_low: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Helper executable speaking the line protocol on stdin/stdout.
    pub command: String,
    pub args: Vec<String>,
    /// Longest wait for one helper reply before the helper is restarted.
    pub timeout_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            store_path: facegate_core::default_store_path(),
            camera: CameraConfig::default(),
            buttons: ButtonConfig::default(),
            vision: VisionConfig::default(),
            threshold: settings.threshold.value(),
            liveness_enabled: settings.liveness_enabled,
            tuning: Tuning::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 320,
            height: 240,
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            up: 5,
            down: 6,
            select: 13,
            back: 19,
            active_low: true,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            command: "facegate-vision".to_string(),
            args: Vec::new(),
            timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    ///
    /// A missing file at the default path is not an error; a missing file
    /// named by `FACEGATE_CONFIG` is.
    pub fn load() -> Result<Self, ConfigError> {
        let (path, explicit) = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => (PathBuf::from(path), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = if explicit || path.exists() {
            let config = Self::from_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
            config
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.tuning = config.tuning.sanitized();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACEGATE_*` overrides read through `get`.
    pub fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { get: &get };

        if let Some(path) = get("FACEGATE_STORE_PATH") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(device) = get("FACEGATE_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        env.parse("FACEGATE_CAMERA_WIDTH", &mut self.camera.width);
        env.parse("FACEGATE_CAMERA_HEIGHT", &mut self.camera.height);

        env.parse("FACEGATE_BUTTON_UP", &mut self.buttons.up);
        env.parse("FACEGATE_BUTTON_DOWN", &mut self.buttons.down);
        env.parse("FACEGATE_BUTTON_SELECT", &mut self.buttons.select);
        env.parse("FACEGATE_BUTTON_BACK", &mut self.buttons.back);
        env.flag("FACEGATE_BUTTONS_ACTIVE_LOW", &mut self.buttons.active_low);

        if let Some(command) = get("FACEGATE_VISION_COMMAND") {
            let mut parts = command.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                self.vision.command = program;
                self.vision.args = parts.collect();
            }
        }

        env.parse("FACEGATE_VISION_TIMEOUT_MS", &mut self.vision.timeout_ms);

        env.parse("FACEGATE_THRESHOLD", &mut self.threshold);
        env.flag("FACEGATE_LIVENESS_ENABLED", &mut self.liveness_enabled);

        let tuning = &mut self.tuning;
        env.parse("FACEGATE_DEBOUNCE_MS", &mut tuning.debounce_ms);
        env.parse("FACEGATE_LONG_PRESS_MS", &mut tuning.long_press_ms);
        env.parse("FACEGATE_TICK_MS", &mut tuning.tick_ms);
        env.parse("FACEGATE_MESSAGE_MS", &mut tuning.message_ms);
        env.parse("FACEGATE_SAMPLE_TARGET", &mut tuning.sample_target);
        env.parse("FACEGATE_MIN_FACE_SIZE", &mut tuning.min_face_size);
        env.parse("FACEGATE_LIVENESS_TIMEOUT_MS", &mut tuning.liveness_timeout_ms);
    }

    /// Startup runtime settings; the threshold snaps to the 0.1 grid.
    pub fn settings(&self) -> Settings {
        Settings {
            threshold: Threshold::from_value(self.threshold),
            liveness_enabled: self.liveness_enabled,
        }
    }

    pub fn button_pins(&self) -> ButtonPins {
        ButtonPins {
            up: self.buttons.up,
            down: self.buttons.down,
            select: self.buttons.select,
            back: self.buttons.back,
        }
    }
}

struct Env<'a, F> {
    get: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Unparsable values keep the current setting.
    fn parse<T: std::str::FromStr>(&self, key: &str, slot: &mut T) {
        if let Some(raw) = (self.get)(key) {
            match raw.trim().parse() {
                Ok(value) => *slot = value,
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
            }
        }
    }

    /// `0`, `false`, `off` and `no` clear the flag; anything else sets it.
    fn flag(&self, key: &str, slot: &mut bool) {
        if let Some(raw) = (self.get)(key) {
            *slot = !matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera.device, "/dev/video0");
        assert!(config.buttons.active_low);
        assert_eq!(config.vision.timeout_ms, 2000);
        assert_eq!(config.settings(), Settings::default());
        assert_eq!(config.tuning, Tuning::default());
        assert!(config.store_path.ends_with("facegate/templates.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            store_path = "/var/lib/facegate/templates.json"
            threshold = 0.7

            [camera]
            device = "/dev/video2"

            [tuning]
            sample_target = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("/var/lib/facegate/templates.json"));
        assert_eq!(config.camera.device, "/dev/video2");
        assert_eq!(config.camera.width, 320);
        assert_eq!(config.tuning.sample_target, 3);
        assert_eq!(config.tuning.tick_ms, 100);
        assert_eq!(config.settings().threshold, Threshold::from_tenths(7));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("FACEGATE_STORE_PATH", "/tmp/t.json"),
            ("FACEGATE_BUTTON_BACK", "26"),
            ("FACEGATE_BUTTONS_ACTIVE_LOW", "false"),
            ("FACEGATE_LIVENESS_ENABLED", "0"),
            ("FACEGATE_THRESHOLD", "0.33"),
            ("FACEGATE_VISION_COMMAND", "python3 /opt/vision.py --cpu"),
            ("FACEGATE_LONG_PRESS_MS", "1500"),
            ("FACEGATE_VISION_TIMEOUT_MS", "750"),
        ]));
        assert_eq!(config.store_path, PathBuf::from("/tmp/t.json"));
        assert_eq!(config.button_pins().back, 26);
        assert!(!config.buttons.active_low);
        assert!(!config.settings().liveness_enabled);
        assert_eq!(config.settings().threshold, Threshold::from_tenths(3));
        assert_eq!(config.vision.command, "python3");
        assert_eq!(config.vision.args, vec!["/opt/vision.py", "--cpu"]);
        assert_eq!(config.tuning.long_press_ms, 1500);
        assert_eq!(config.vision.timeout_ms, 750);
    }

    #[test]
    fn test_unparsable_env_value_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("FACEGATE_TICK_MS", "fast"), ("FACEGATE_CAMERA_WIDTH", "640")]));
        assert_eq!(config.tuning.tick_ms, 100);
        assert_eq!(config.camera.width, 640);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = [").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
