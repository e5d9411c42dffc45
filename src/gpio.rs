//! # Output Pin
//!
//! The single binary output line this device drives. The pin is configured as
//! an output once during bootstrap and afterwards only written from the MQTT
//! dispatcher, so it is owned outright instead of being shared.
//!
//! Hardware access goes through the [`OutputLine`] seam. On the device this is
//! an `rppal` output pin; tests substitute a recording line.

use rppal::gpio::{Gpio, Level};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Logical level of the output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinLevel {
    #[default]
    Low,
    High,
}

impl From<bool> for PinLevel {
    fn from(on: bool) -> Self {
        if on {
            PinLevel::High
        } else {
            PinLevel::Low
        }
    }
}

impl From<PinLevel> for Level {
    fn from(level: PinLevel) -> Self {
        match level {
            PinLevel::Low => Level::Low,
            PinLevel::High => Level::High,
        }
    }
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PinLevel::Low => write!(f, "0"),
            PinLevel::High => write!(f, "1"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Failed to open GPIO peripheral: {0}")]
    Peripheral(#[source] rppal::gpio::Error),

    #[error("Failed to acquire GPIO {pin}: {source}")]
    Acquire {
        pin: u8,
        #[source]
        source: rppal::gpio::Error,
    },
}

/// Anything that can be driven high or low.
pub trait OutputLine {
    fn drive(&mut self, level: PinLevel);
}

impl OutputLine for rppal::gpio::OutputPin {
    fn drive(&mut self, level: PinLevel) {
        self.write(level.into());
    }
}

/// A configured output pin together with the level it was last driven to.
#[derive(Debug)]
pub struct OutputPin<L: OutputLine> {
    id: u8,
    line: L,
    level: PinLevel,
}

impl<L: OutputLine> OutputPin<L> {
    /// Takes ownership of an output line and drives it to `initial`.
    pub fn configure(id: u8, mut line: L, initial: PinLevel) -> Self {
        line.drive(initial);
        info!("GPIO {} configured as output, level {}", id, initial);
        Self {
            id,
            line,
            level: initial,
        }
    }

    pub fn set(&mut self, level: PinLevel) {
        self.line.drive(level);
        if self.level != level {
            debug!("GPIO {} level {} -> {}", self.id, self.level, level);
        }
        self.level = level;
    }

    pub fn level(&self) -> PinLevel {
        self.level
    }

    pub fn id(&self) -> u8 {
        self.id
    }
}

/// Acquires a BCM-numbered line from the Raspberry Pi GPIO peripheral and
/// switches it to output mode.
pub fn open_rppal(pin: u8) -> Result<rppal::gpio::OutputPin, GpioError> {
    let gpio = Gpio::new().map_err(GpioError::Peripheral)?;
    let line = gpio
        .get(pin)
        .map_err(|source| GpioError::Acquire { pin, source })?
        .into_output();
    Ok(line)
}
