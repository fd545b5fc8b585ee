//! Board buttons on sysfs GPIO (`/sys/class/gpio/gpioN/value`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use facegate_core::{Button, ButtonLevels};
use thiserror::Error;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("failed to export gpio {pin}: {source}")]
    Export {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("gpio {pin} not available at {path}")]
    Unavailable { pin: u32, path: PathBuf },
}

/// GPIO line numbers for the four buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPins {
    pub up: u32,
    pub down: u32,
    pub select: u32,
    pub back: u32,
}

impl ButtonPins {
    pub fn pin(&self, button: Button) -> u32 {
        match button {
            Button::Up => self.up,
            Button::Down => self.down,
            Button::Select => self.select,
            Button::Back => self.back,
        }
    }
}

/// Raw button levels read from sysfs value files.
///
/// Buttons are active-low by default (pressed pulls the line to ground). A
/// read error counts as released and is logged once per pin.
pub struct SysfsButtons {
    root: PathBuf,
    pins: ButtonPins,
    active_low: bool,
    warned: [bool; 4],
}

impl SysfsButtons {
    /// Use the pins under [`SYSFS_GPIO_ROOT`], exporting any that are not
    /// exported yet.
    pub fn open(pins: ButtonPins, active_low: bool) -> Result<Self, GpioError> {
        Self::open_at(SYSFS_GPIO_ROOT, pins, active_low)
    }

    pub fn open_at(root: impl Into<PathBuf>, pins: ButtonPins, active_low: bool) -> Result<Self, GpioError> {
        let buttons = Self {
            root: root.into(),
            pins,
            active_low,
            warned: [false; 4],
        };
        for button in Button::ALL {
            buttons.ensure_exported(pins.pin(button))?;
        }
        tracing::info!(root = %buttons.root.display(), ?pins, active_low, "gpio buttons ready");
        Ok(buttons)
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn ensure_exported(&self, pin: u32) -> Result<(), GpioError> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            fs::write(self.root.join("export"), pin.to_string())
                .map_err(|source| GpioError::Export { pin, source })?;
            tracing::debug!(pin, "exported gpio");
        }
        let value = dir.join("value");
        if !value.exists() {
            return Err(GpioError::Unavailable { pin, path: value });
        }
        if let Err(e) = fs::write(dir.join("direction"), "in") {
            tracing::debug!(pin, error = %e, "could not set gpio direction");
        }
        Ok(())
    }

    fn read_level(path: &Path) -> io::Result<bool> {
        let raw = fs::read_to_string(path)?;
        Ok(raw.trim() == "1")
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

impl ButtonLevels for SysfsButtons {
    fn is_down(&mut self, button: Button) -> bool {
        let pin = self.pins.pin(button);
        let path = self.pin_dir(pin).join("value");
        match Self::read_level(&path) {
            Ok(high) => {
                self.warned[slot(button)] = false;
                high != self.active_low
            }
            Err(e) => {
                if !self.warned[slot(button)] {
                    tracing::warn!(pin, ?button, error = %e, "gpio read failed, treating as released");
                    self.warned[slot(button)] = true;
                }
                false
            }
        }
    }
}
