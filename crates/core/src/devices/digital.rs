use tracing::debug;

use crate::device::{Broadcasts, Device, FormDescriptor};
use crate::hal::{InputPin, OutputPin};
use crate::message::{topic, ConfigMap, Message};

pub const KEY_RAIN: &str = "sensor/rain";

const FORM: &str = r#"
<form>
<label for="rain">Rain</label>
<input type="text" id="rain" readonly [value]="sensor/rain">
</form>
"#;

/// Rain detector on a digital input. The line is pulled low when wet.
pub struct DigitalSensor {
    input: Box<dyn InputPin>,
    power: Option<Box<dyn OutputPin>>,
    last: Option<bool>,
}

impl DigitalSensor {
    pub fn new(input: Box<dyn InputPin>, power: Option<Box<dyn OutputPin>>) -> Self {
        Self {
            input,
            power,
            last: None,
        }
    }

    fn sample(&mut self) -> bool {
        let rain = !self.input.is_high();
        self.last = Some(rain);
        rain
    }
}

impl Device for DigitalSensor {
    fn name(&self) -> &str {
        "rain"
    }

    fn get_config(&mut self) -> ConfigMap {
        let rain = self.sample();
        ConfigMap::from([(KEY_RAIN.into(), u8::from(rain).to_string())])
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        let rain = match self.last {
            Some(rain) => rain,
            None => self.sample(),
        };
        vec![Message::new(topic(base_topic, KEY_RAIN), u8::from(rain))]
    }

    fn setup(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if let Some(pin) = self.power.as_mut() {
            pin.set(true);
        }
        Ok(())
    }

    fn run(&mut self, bus: &mut Broadcasts) -> anyhow::Result<()> {
        let rain = self.sample();
        debug!(rain, "rain sensor sampled");
        bus.send(KEY_RAIN, u8::from(rain));
        Ok(())
    }

    fn shutdown(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if let Some(pin) = self.power.as_mut() {
            pin.set(false);
        }
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("digital", "Rain", FORM))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInputPin;

    #[test]
    fn low_line_means_rain() {
        let pin = MockInputPin::new(true);
        let mut sensor = DigitalSensor::new(Box::new(pin.clone()), None);
        let mut bus = Broadcasts::default();
        sensor.run(&mut bus).unwrap();
        pin.drive(false);
        sensor.run(&mut bus).unwrap();
        assert_eq!(
            bus.drain(),
            vec![
                (KEY_RAIN.to_string(), "0".to_string()),
                (KEY_RAIN.to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn message_reports_last_sample() {
        let pin = MockInputPin::new(false);
        let mut sensor = DigitalSensor::new(Box::new(pin), None);
        let msgs = sensor.outgoing_messages("garden");
        assert_eq!(msgs[0].topic, "garden/sensor/rain");
        assert_eq!(msgs[0].value, "1");
    }
}
