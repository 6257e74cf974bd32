use anyhow::Context;
use tracing::{info, warn};

use crate::device::{Broadcasts, Device, FormDescriptor};
use crate::hal::{ClimateSensor, OutputPin};
use crate::message::{topic, ConfigMap, Message};

pub const KEY_TEMPERATURE: &str = "sensor/temperature";
pub const KEY_HUMIDITY: &str = "sensor/humidity";
pub const KEY_PRESSURE: &str = "sensor/pressure";

const FORM: &str = r#"
<form>
<label for="temperature">Temperature (°C)</label>
<input type="text" id="temperature" readonly [value]="sensor/temperature">
<label for="humidity">Humidity (% rH)</label>
<input type="text" id="humidity" readonly [value]="sensor/humidity">
<label for="pressure">Pressure (hPa)</label>
<input type="text" id="pressure" readonly [value]="sensor/pressure">
</form>
"#;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    temperature: f32,
    humidity: f32,
    pressure: f32,
}

/// Temperature, humidity and pressure sensor.
pub struct Bme280 {
    sensor: Box<dyn ClimateSensor>,
    power: Option<Box<dyn OutputPin>>,
    present: bool,
    last: Option<Reading>,
}

impl Bme280 {
    /// `power` switches the sensor supply, if it is wired to a pin.
    pub fn new(sensor: Box<dyn ClimateSensor>, power: Option<Box<dyn OutputPin>>) -> Self {
        Self {
            sensor,
            power,
            present: false,
            last: None,
        }
    }

    fn read(&mut self) -> anyhow::Result<Reading> {
        let reading = Reading {
            temperature: self.sensor.temperature().context("temperature")?,
            humidity: self.sensor.humidity().context("humidity")?,
            pressure: self.sensor.pressure().context("pressure")?,
        };
        self.last = Some(reading);
        Ok(reading)
    }
}

impl Device for Bme280 {
    fn name(&self) -> &str {
        "bme280"
    }

    fn get_config(&mut self) -> ConfigMap {
        let Some(r) = self.last else {
            return ConfigMap::new();
        };
        ConfigMap::from([
            (KEY_TEMPERATURE.into(), format!("{:.2}", r.temperature)),
            (KEY_HUMIDITY.into(), format!("{:.2}", r.humidity)),
            (KEY_PRESSURE.into(), format!("{:.2}", r.pressure)),
        ])
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        let Some(r) = self.last else {
            return Vec::new();
        };
        vec![
            Message::new(topic(base_topic, "temperature"), format!("{:.2}", r.temperature)),
            Message::new(topic(base_topic, "humidity"), format!("{:.2}", r.humidity)),
            Message::new(topic(base_topic, "pressure"), format!("{:.2}", r.pressure)),
        ]
    }

    fn is_valid(&self) -> bool {
        self.present
    }

    fn setup(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if let Some(pin) = self.power.as_mut() {
            pin.set(true);
        }
        self.present = self.sensor.probe();
        if self.present {
            info!("BME280 found, start measuring");
        } else {
            warn!("could not find a valid BME280");
        }
        Ok(())
    }

    fn run(&mut self, bus: &mut Broadcasts) -> anyhow::Result<()> {
        let r = self.read().context("BME280 read failed")?;
        info!(
            temperature = r.temperature,
            humidity = r.humidity,
            pressure = r.pressure,
            "climate measured"
        );
        bus.send(KEY_TEMPERATURE, r.temperature);
        bus.send(KEY_HUMIDITY, r.humidity);
        bus.send(KEY_PRESSURE, r.pressure);
        Ok(())
    }

    fn shutdown(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if let Some(pin) = self.power.as_mut() {
            pin.set(false);
        }
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("weather", "Weather", FORM))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ClimateReading, MockClimate, MockOutputPin};

    fn reading() -> ClimateReading {
        ClimateReading {
            temperature: 21.5,
            humidity: 44.25,
            pressure: 1013.0,
        }
    }

    #[test]
    fn absent_sensor_is_invalid_after_setup() {
        let mut bme = Bme280::new(Box::new(MockClimate::absent()), None);
        bme.setup(&mut Broadcasts::default()).unwrap();
        assert!(!bme.is_valid());
    }

    #[test]
    fn power_pin_follows_lifecycle() {
        let power = MockOutputPin::new("bme-power");
        let mut bme = Bme280::new(
            Box::new(MockClimate::new(reading())),
            Some(Box::new(power.clone())),
        );
        let mut bus = Broadcasts::default();
        bme.setup(&mut bus).unwrap();
        bme.shutdown(&mut bus).unwrap();
        assert_eq!(power.history(), vec![true, false]);
    }

    #[test]
    fn run_broadcasts_all_three_values() {
        let mut bme = Bme280::new(Box::new(MockClimate::new(reading())), None);
        let mut bus = Broadcasts::default();
        bme.setup(&mut bus).unwrap();
        bme.run(&mut bus).unwrap();
        assert_eq!(
            bus.drain(),
            vec![
                (KEY_TEMPERATURE.to_string(), "21.5".to_string()),
                (KEY_HUMIDITY.to_string(), "44.25".to_string()),
                (KEY_PRESSURE.to_string(), "1013".to_string()),
            ]
        );
    }

    #[test]
    fn messages_use_base_topic_directly() {
        let mut bme = Bme280::new(Box::new(MockClimate::new(reading())), None);
        bme.run(&mut Broadcasts::default()).unwrap();
        let topics: Vec<_> = bme
            .outgoing_messages("garden")
            .into_iter()
            .map(|m| m.topic)
            .collect();
        assert_eq!(
            topics,
            vec!["garden/temperature", "garden/humidity", "garden/pressure"]
        );
        assert_eq!(bme.get_config()[KEY_HUMIDITY], "44.25");
    }
}
