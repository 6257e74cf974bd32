use tracing::info;

use crate::device::{Broadcasts, Device};
use crate::hal::InputPin;
use crate::message::{topic, Message};

use super::battery::KEY_MODE;

const REASON: &str = "motion detected by yaha station";

/// Motion detectors, latched between reports.
pub struct Motion {
    inputs: Vec<Box<dyn InputPin>>,
    latched: Vec<bool>,
    battery_mode: bool,
}

impl Motion {
    pub fn new(inputs: Vec<Box<dyn InputPin>>) -> Self {
        let latched = vec![false; inputs.len()];
        Self {
            inputs,
            latched,
            battery_mode: false,
        }
    }

    fn sample(&mut self) {
        for (input, latch) in self.inputs.iter_mut().zip(self.latched.iter_mut()) {
            *latch |= input.is_high();
        }
    }
}

impl Device for Motion {
    fn name(&self) -> &str {
        "motion"
    }

    fn handle_broadcast(&mut self, key: &str, value: &str) {
        if key == KEY_MODE {
            self.battery_mode = value == "on";
        }
    }

    fn setup(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        self.sample();
        Ok(())
    }

    /// In battery mode only the wake-up sample counts.
    fn run(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if !self.battery_mode {
            self.sample();
        }
        Ok(())
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        let any = self.latched.iter().any(|m| *m);
        if any {
            info!(sensors = ?self.latched, "motion detected");
        }
        let mut out = vec![Message::new(topic(base_topic, "motion/detected"), u8::from(any))
            .with_reason(REASON)];
        for (i, m) in self.latched.iter().enumerate() {
            out.push(
                Message::new(topic(base_topic, &format!("motion/sensor{}", i + 1)), u8::from(*m))
                    .with_reason(REASON),
            );
        }
        self.latched.iter_mut().for_each(|m| *m = false);
        out
    }
}

// ===========================================================================
// Tests
// ===========================================================================
