use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::{Broadcasts, Device, FormDescriptor};
use crate::duty::{KEY_RESET_WAKEUP_COUNT, KEY_WAKEUP_AMOUNT};
use crate::error::StoreError;
use crate::hal::{Delay, NonVolatileStore, OutputPin};
use crate::irrigation::{IrrigationConfig, IrrigationPlan};
use crate::message::{topic, ConfigMap, Message};
use crate::store::{read_record, write_record, Record};

use super::bme280::KEY_HUMIDITY;

const FORM: &str = r#"
<form action="/config/irrigation" method="POST">
<p>Settings are kept across reboots only once a WLAN is configured.</p>
<label for="humidity">Current humidity</label>
<input type="text" id="humidity" readonly [value]="sensor/humidity">
<label for="needed">Wakeups until irrigation</label>
<input type="text" id="needed" readonly [value]="irrigation/neededWakeups">
<label for="lowHumidity">Low humidity anchor in % rH</label>
<input type="text" id="lowHumidity" name="irrigation/lowHumidity" [value]="irrigation/lowHumidity">
<label for="lowDuration">Irrigation duration at low humidity in seconds</label>
<input type="text" id="lowDuration" name="irrigation/lowDurationInSeconds" [value]="irrigation/lowDurationInSeconds">
<label for="lowWakeup">Wakeups until irrigation at low humidity</label>
<input type="text" id="lowWakeup" name="irrigation/lowWakeup" [value]="irrigation/lowWakeup">
<label for="highHumidity">High humidity anchor in % rH</label>
<input type="text" id="highHumidity" name="irrigation/highHumidity" [value]="irrigation/highHumidity">
<label for="highDuration">Irrigation duration at high humidity in seconds</label>
<input type="text" id="highDuration" name="irrigation/highDurationInSeconds" [value]="irrigation/highDurationInSeconds">
<label for="highWakeup">Wakeups until irrigation at high humidity</label>
<input type="text" id="highWakeup" name="irrigation/highWakeup" [value]="irrigation/highWakeup">
<label for="pump2Factor">Duration factor for pump 2</label>
<input type="text" id="pump2Factor" name="irrigation/pump2Factor" [value]="irrigation/pump2Factor">
<input type="submit" value="Submit">
</form>
"#;

/// Drives the two pumps from the humidity reading and the wake counter.
pub struct IrrigationController {
    config: IrrigationConfig,
    pump1: Box<dyn OutputPin>,
    pump2: Box<dyn OutputPin>,
    delay: Box<dyn Delay>,
    humidity: Option<f32>,
    wake_count: u16,
}

impl IrrigationController {
    /// Both pumps are switched off before anything else happens.
    pub fn new(
        mut pump1: Box<dyn OutputPin>,
        mut pump2: Box<dyn OutputPin>,
        delay: Box<dyn Delay>,
    ) -> Self {
        pump1.set(false);
        pump2.set(false);
        Self {
            config: IrrigationConfig::default(),
            pump1,
            pump2,
            delay,
            humidity: None,
            wake_count: 0,
        }
    }

    pub fn config(&self) -> &IrrigationConfig {
        &self.config
    }

    fn plan(&self) -> Option<IrrigationPlan> {
        let humidity = self.humidity?;
        match self.config.plan(humidity, self.wake_count) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!("irrigation skipped: {e}");
                None
            }
        }
    }

    fn water(pin: &mut dyn OutputPin, delay: &mut dyn Delay, pump: u8, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        info!(pump, secs = duration.as_secs_f32(), "pump on");
        pin.set(true);
        delay.delay(duration);
        pin.set(false);
        info!(pump, "pump off");
    }
}

impl Device for IrrigationController {
    fn name(&self) -> &str {
        "irrigation"
    }

    fn set_config(&mut self, config: &ConfigMap) {
        self.config.merge(config);
    }

    fn get_config(&mut self) -> ConfigMap {
        let mut map = self.config.to_config();
        if let Some(plan) = self.plan() {
            map.insert(
                "irrigation/neededWakeups".into(),
                format!("{:.0}", plan.needed_wakeups.ceil()),
            );
        }
        map
    }

    fn store_len(&self) -> usize {
        IrrigationConfig::LEN
    }

    fn write_to_store(
        &self,
        store: &mut dyn NonVolatileStore,
        offset: usize,
    ) -> Result<usize, StoreError> {
        write_record(store, offset, &self.config)
    }

    fn read_from_store(
        &mut self,
        store: &dyn NonVolatileStore,
        offset: usize,
    ) -> Result<usize, StoreError> {
        let (config, next) = read_record(store, offset)?;
        self.config = config;
        Ok(next)
    }

    fn clear(&mut self) {
        self.config = IrrigationConfig::default();
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        let Some(plan) = self.plan() else {
            return Vec::new();
        };
        vec![
            Message::new(topic(base_topic, "irrigation/pump1"), plan.pump1.as_secs()),
            Message::new(topic(base_topic, "irrigation/pump2"), plan.pump2.as_secs()),
            Message::new(
                topic(base_topic, "irrigation/neededWakeups"),
                format!("{:.0}", plan.needed_wakeups.ceil()),
            ),
        ]
    }

    fn handle_broadcast(&mut self, key: &str, value: &str) {
        match key {
            KEY_HUMIDITY => match value.parse() {
                Ok(h) => self.humidity = Some(h),
                Err(_) => warn!(value, "ignoring malformed humidity"),
            },
            KEY_WAKEUP_AMOUNT => match value.parse() {
                Ok(n) => self.wake_count = n,
                Err(_) => warn!(value, "ignoring malformed wakeup amount"),
            },
            _ => {}
        }
    }

    fn run(&mut self, bus: &mut Broadcasts) -> anyhow::Result<()> {
        let Some(plan) = self.plan() else {
            debug!("no humidity reading, irrigation idle");
            return Ok(());
        };
        debug!(
            wakeups = self.wake_count,
            needed = plan.needed_wakeups,
            "irrigation check"
        );
        if !plan.fire {
            return Ok(());
        }
        Self::water(self.pump1.as_mut(), self.delay.as_mut(), 1, plan.pump1);
        Self::water(self.pump2.as_mut(), self.delay.as_mut(), 2, plan.pump2);
        self.wake_count = 0;
        bus.send(KEY_RESET_WAKEUP_COUNT, 1);
        Ok(())
    }

    fn shutdown(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        self.pump1.set(false);
        self.pump2.set(false);
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("irrigation", "Irrigation", FORM))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::KEY_HIGH_HUMIDITY;
    use crate::mock::{MockOutputPin, RecordingDelay};

    struct Rig {
        device: IrrigationController,
        pump1: MockOutputPin,
        pump2: MockOutputPin,
        delay: RecordingDelay,
    }

    fn rig() -> Rig {
        let pump1 = MockOutputPin::new("pump1");
        let pump2 = MockOutputPin::new("pump2");
        let delay = RecordingDelay::new();
        let mut device = IrrigationController::new(
            Box::new(pump1.clone()),
            Box::new(pump2.clone()),
            Box::new(delay.clone()),
        );
        device.set_config(&ConfigMap::from([
            ("irrigation/lowDurationInSeconds".into(), "60".into()),
            ("irrigation/highDurationInSeconds".into(), "20".into()),
            ("irrigation/lowWakeup".into(), "2".into()),
            ("irrigation/highWakeup".into(), "8".into()),
            ("irrigation/pump2Factor".into(), "0.5".into()),
        ]));
        Rig {
            device,
            pump1,
            pump2,
            delay,
        }
    }

    #[test]
    fn pumps_start_switched_off() {
        let r = rig();
        assert_eq!(r.pump1.history(), vec![false]);
        assert_eq!(r.pump2.history(), vec![false]);
    }

    #[test]
    fn fires_when_counter_reaches_needed_wakeups() {
        let mut r = rig();
        r.device.handle_broadcast(KEY_HUMIDITY, "30");
        r.device.handle_broadcast(KEY_WAKEUP_AMOUNT, "2");
        let mut bus = Broadcasts::default();
        r.device.run(&mut bus).unwrap();

        assert_eq!(r.pump1.history(), vec![false, true, false]);
        assert_eq!(r.pump2.history(), vec![false, true, false]);
        assert_eq!(
            r.delay.calls(),
            vec![Duration::from_secs(60), Duration::from_secs(30)]
        );
        assert_eq!(
            bus.drain(),
            vec![(KEY_RESET_WAKEUP_COUNT.to_string(), "1".to_string())]
        );
    }

    #[test]
    fn waits_while_counter_is_below_needed() {
        let mut r = rig();
        r.device.handle_broadcast(KEY_HUMIDITY, "60");
        r.device.handle_broadcast(KEY_WAKEUP_AMOUNT, "7");
        let mut bus = Broadcasts::default();
        r.device.run(&mut bus).unwrap();
        assert!(r.delay.calls().is_empty());
        assert!(bus.is_empty());
    }

    #[test]
    fn no_humidity_no_irrigation() {
        let mut r = rig();
        r.device.handle_broadcast(KEY_WAKEUP_AMOUNT, "100");
        let mut bus = Broadcasts::default();
        r.device.run(&mut bus).unwrap();
        assert!(r.delay.calls().is_empty());
        assert!(r.device.outgoing_messages("g").is_empty());
    }

    #[test]
    fn degenerate_range_skips_without_error() {
        let mut r = rig();
        r.device
            .set_config(&ConfigMap::from([(KEY_HIGH_HUMIDITY.into(), "30".into())]));
        r.device.handle_broadcast(KEY_HUMIDITY, "40");
        r.device.handle_broadcast(KEY_WAKEUP_AMOUNT, "100");
        let mut bus = Broadcasts::default();
        assert!(r.device.run(&mut bus).is_ok());
        assert!(r.delay.calls().is_empty());
    }

    #[test]
    fn messages_report_planned_durations() {
        let mut r = rig();
        r.device.handle_broadcast(KEY_HUMIDITY, "45");
        let msgs = r.device.outgoing_messages("garden");
        let pairs: Vec<_> = msgs
            .iter()
            .map(|m| (m.topic.as_str(), m.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("garden/irrigation/pump1", "40"),
                ("garden/irrigation/pump2", "20"),
                ("garden/irrigation/neededWakeups", "5"),
            ]
        );
    }

    #[test]
    fn huge_pump2_factor_is_ignored() {
        let mut r = rig();
        r.device
            .set_config(&ConfigMap::from([("irrigation/pump2Factor".into(), "1e30".into())]));
        r.device.handle_broadcast(KEY_HUMIDITY, "30");
        assert_eq!(r.device.get_config()["irrigation/pump2Factor"], "0.5");
        assert_eq!(r.device.outgoing_messages("g")[1].value, "30");
    }

    #[test]
    fn form_says_settings_need_a_wlan() {
        let form = rig().device.form().unwrap();
        assert!(form.markup.contains("only once a WLAN is configured"));
    }

    #[test]
    fn malformed_humidity_keeps_previous_reading() {
        let mut r = rig();
        r.device.handle_broadcast(KEY_HUMIDITY, "45");
        r.device.handle_broadcast(KEY_HUMIDITY, "wet");
        assert_eq!(r.device.outgoing_messages("g").len(), 3);
    }
}
