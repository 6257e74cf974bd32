//! Pin access. The `gpio` feature gates the real rppal driver; without it, a
//! mock board logs every level change and reads inputs at their idle level.

use anyhow::Result;

use yaha_core::hal::{InputPin, OutputPin};

#[cfg(feature = "gpio")]
use rppal::gpio::Gpio;

// ---------------------------------------------------------------------------
// Real GPIO board (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct Board {
    gpio: Gpio,
}

#[cfg(feature = "gpio")]
struct RppalOutput {
    pin: rppal::gpio::OutputPin,
}

#[cfg(feature = "gpio")]
impl OutputPin for RppalOutput {
    fn set(&mut self, high: bool) {
        if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }

    fn is_set_high(&self) -> bool {
        self.pin.is_set_high()
    }
}

#[cfg(feature = "gpio")]
struct RppalInput {
    pin: rppal::gpio::InputPin,
}

#[cfg(feature = "gpio")]
impl InputPin for RppalInput {
    fn is_high(&mut self) -> bool {
        self.pin.is_high()
    }
}

#[cfg(feature = "gpio")]
impl Board {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self { gpio: Gpio::new()? })
    }

    /// Output pin driven low at startup.
    pub(crate) fn output(&mut self, pin: u8, label: &str) -> Result<Box<dyn OutputPin>> {
        let mut out = self.gpio.get(pin)?.into_output();
        out.set_low();
        tracing::info!(pin, label, "gpio output ready");
        Ok(Box::new(RppalOutput { pin: out }))
    }

    /// Input pin with the pull resistor towards its idle level.
    pub(crate) fn input(&mut self, pin: u8, label: &str, idle_high: bool) -> Result<Box<dyn InputPin>> {
        let p = self.gpio.get(pin)?;
        let input = if idle_high {
            p.into_input_pullup()
        } else {
            p.into_input_pulldown()
        };
        tracing::info!(pin, label, "gpio input ready");
        Ok(Box::new(RppalInput { pin: input }))
    }
}

// ---------------------------------------------------------------------------
// Mock board (development, no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct Board;

#[cfg(not(feature = "gpio"))]
pub(crate) struct LoggedOutput {
    pin: u8,
    label: String,
    high: bool,
}

#[cfg(not(feature = "gpio"))]
impl OutputPin for LoggedOutput {
    fn set(&mut self, high: bool) {
        if high != self.high {
            tracing::info!(
                pin = self.pin,
                label = %self.label,
                "[mock-gpio] set {}",
                if high { "HIGH" } else { "LOW" }
            );
        }
        self.high = high;
    }

    fn is_set_high(&self) -> bool {
        self.high
    }
}

#[cfg(not(feature = "gpio"))]
pub(crate) struct IdleInput {
    idle_high: bool,
}

#[cfg(not(feature = "gpio"))]
impl InputPin for IdleInput {
    fn is_high(&mut self) -> bool {
        self.idle_high
    }
}

#[cfg(not(feature = "gpio"))]
impl Board {
    pub(crate) fn new() -> Result<Self> {
        tracing::info!("[mock-gpio] board initialised (no hardware)");
        Ok(Self)
    }

    pub(crate) fn output(&mut self, pin: u8, label: &str) -> Result<Box<dyn OutputPin>> {
        tracing::info!(pin, label, "[mock-gpio] registered output (not wired)");
        Ok(Box::new(LoggedOutput {
            pin,
            label: label.to_string(),
            high: false,
        }))
    }

    pub(crate) fn input(&mut self, pin: u8, label: &str, idle_high: bool) -> Result<Box<dyn InputPin>> {
        tracing::info!(pin, label, idle_high, "[mock-gpio] registered input (not wired)");
        Ok(Box::new(IdleInput { idle_high }))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
