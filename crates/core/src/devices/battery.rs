use std::time::Duration;

use tracing::{info, warn};

use crate::device::{Broadcasts, Device, FormDescriptor, SleepPolicy};
use crate::duty::KEY_START_TYPE;
use crate::error::StoreError;
use crate::hal::{AnalogInput, NonVolatileStore};
use crate::message::{flag_value, merge_flag, merge_parsed, topic, ConfigMap, Message};
use crate::rtc::StartType;
use crate::store::{read_record, write_record, Record, RecordReader, RecordWriter};

pub const KEY_MODE: &str = "battery/mode";
pub const KEY_VOLTAGE: &str = "battery/voltage";
const KEY_SLEEP_TIME: &str = "battery/sleepTimeInSeconds";
const KEY_DIVISOR: &str = "battery/voltageCalibrationDivisor";
const KEY_HIGH_VOLTAGE: &str = "battery/highVoltage";
const KEY_LOW_VOLTAGE: &str = "battery/lowVoltage";
const KEY_HIGH_SLEEP: &str = "battery/highVoltageSleepTimeInSeconds";
const KEY_NORMAL_SLEEP: &str = "battery/normalVoltageSleepTimeInSeconds";
const KEY_LOW_SLEEP: &str = "battery/lowVoltageSleepTimeInSeconds";

const FORM: &str = r#"
<form action="/config/battery" method="POST">
<p>Settings are kept across reboots only once a WLAN is configured.</p>
<label for="voltage">Current voltage</label>
<input type="text" id="voltage" readonly [value]="battery/voltage">
<label for="sleepTime">Resulting sleep time in seconds</label>
<input type="text" id="sleepTime" readonly [value]="battery/sleepTimeInSeconds">
<label for="divisor">Voltage calibration divisor</label>
<input type="text" id="divisor" name="battery/voltageCalibrationDivisor" [value]="battery/voltageCalibrationDivisor">
<label for="highVoltage">High voltage</label>
<input type="text" id="highVoltage" name="battery/highVoltage" [value]="battery/highVoltage">
<label for="lowVoltage">Low voltage</label>
<input type="text" id="lowVoltage" name="battery/lowVoltage" [value]="battery/lowVoltage">
<label for="highTime">High voltage sleep time in seconds</label>
<input type="text" id="highTime" name="battery/highVoltageSleepTimeInSeconds" [value]="battery/highVoltageSleepTimeInSeconds">
<label for="normalTime">Normal voltage sleep time in seconds</label>
<input type="text" id="normalTime" name="battery/normalVoltageSleepTimeInSeconds" [value]="battery/normalVoltageSleepTimeInSeconds">
<label for="lowTime">Low voltage sleep time in seconds</label>
<input type="text" id="lowTime" name="battery/lowVoltageSleepTimeInSeconds" [value]="battery/lowVoltageSleepTimeInSeconds">
<input type="hidden" name="battery/mode" value="off">
<label for="batteryMode">Battery mode enabled</label>
<input type="checkbox" id="batteryMode" name="battery/mode" [checked]="battery/mode">
<input type="submit" value="Submit">
</form>
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryConfig {
    pub normal_sleep_secs: u16,
    pub high_sleep_secs: u16,
    pub low_sleep_secs: u16,
    /// Raw analog reading divided by this gives volts.
    pub divisor: f32,
    pub high_voltage: f32,
    pub low_voltage: f32,
    pub battery_mode: bool,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            normal_sleep_secs: 900,
            high_sleep_secs: 120,
            low_sleep_secs: 3600,
            divisor: 24.0,
            high_voltage: 3.5,
            low_voltage: 3.1,
            battery_mode: false,
        }
    }
}

impl Record for BatteryConfig {
    const LEN: usize = 3 * 2 + 3 * 4 + 1;

    fn encode(&self, w: &mut RecordWriter) {
        w.u16(self.normal_sleep_secs);
        w.u16(self.high_sleep_secs);
        w.u16(self.low_sleep_secs);
        w.f32(self.divisor);
        w.f32(self.high_voltage);
        w.f32(self.low_voltage);
        w.u8(self.battery_mode.into());
    }

    fn decode(r: &mut RecordReader<'_>) -> Self {
        Self {
            normal_sleep_secs: r.u16(),
            high_sleep_secs: r.u16(),
            low_sleep_secs: r.u16(),
            divisor: r.f32(),
            high_voltage: r.f32(),
            low_voltage: r.f32(),
            battery_mode: r.u8() == 1,
        }
    }
}

impl BatteryConfig {
    pub fn voltage(&self, raw: u16) -> f32 {
        let divisor = if self.divisor == 0.0 { 1.0 } else { self.divisor };
        f32::from(raw) / divisor
    }

    /// Low tier below `low_voltage`, high tier at or above `high_voltage`.
    /// An unknown voltage sleeps the normal time.
    pub fn sleep_for(&self, voltage: Option<f32>) -> Duration {
        let secs = match voltage {
            Some(v) if v < self.low_voltage => self.low_sleep_secs,
            Some(v) if v >= self.high_voltage => self.high_sleep_secs,
            _ => self.normal_sleep_secs,
        };
        Duration::from_secs(u64::from(secs))
    }
}

/// Battery monitor and owner of the sleep policy.
pub struct Battery {
    config: BatteryConfig,
    analog: Box<dyn AnalogInput>,
    voltage: Option<f32>,
    hold_awake: bool,
}

impl Battery {
    pub fn new(analog: Box<dyn AnalogInput>) -> Self {
        Self {
            config: BatteryConfig::default(),
            analog,
            voltage: None,
            hold_awake: false,
        }
    }

    pub fn config(&self) -> &BatteryConfig {
        &self.config
    }

    fn measure(&mut self) -> Option<f32> {
        match self.analog.read_raw() {
            Ok(raw) => self.voltage = Some(self.config.voltage(raw)),
            Err(e) => warn!("battery measurement failed: {e:#}"),
        }
        self.voltage
    }
}

impl Device for Battery {
    fn name(&self) -> &str {
        "battery"
    }

    fn set_config(&mut self, config: &ConfigMap) {
        let c = &mut self.config;
        merge_parsed(config, KEY_DIVISOR, &mut c.divisor);
        merge_parsed(config, KEY_HIGH_VOLTAGE, &mut c.high_voltage);
        merge_parsed(config, KEY_LOW_VOLTAGE, &mut c.low_voltage);
        merge_parsed(config, KEY_HIGH_SLEEP, &mut c.high_sleep_secs);
        merge_parsed(config, KEY_NORMAL_SLEEP, &mut c.normal_sleep_secs);
        merge_parsed(config, KEY_LOW_SLEEP, &mut c.low_sleep_secs);
        merge_flag(config, KEY_MODE, &mut c.battery_mode);
    }

    fn get_config(&mut self) -> ConfigMap {
        let voltage = self.measure();
        let c = &self.config;
        let mut map = ConfigMap::from([
            (KEY_DIVISOR.into(), c.divisor.to_string()),
            (KEY_HIGH_VOLTAGE.into(), c.high_voltage.to_string()),
            (KEY_LOW_VOLTAGE.into(), c.low_voltage.to_string()),
            (KEY_HIGH_SLEEP.into(), c.high_sleep_secs.to_string()),
            (KEY_NORMAL_SLEEP.into(), c.normal_sleep_secs.to_string()),
            (KEY_LOW_SLEEP.into(), c.low_sleep_secs.to_string()),
            (KEY_MODE.into(), flag_value(c.battery_mode).into()),
            (
                KEY_SLEEP_TIME.into(),
                c.sleep_for(voltage).as_secs().to_string(),
            ),
        ]);
        if let Some(v) = voltage {
            map.insert(KEY_VOLTAGE.into(), format!("{v:.2}"));
        }
        map
    }

    fn store_len(&self) -> usize {
        BatteryConfig::LEN
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
        self.config = BatteryConfig::default();
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        self.measure()
            .map(|v| vec![Message::new(topic(base_topic, KEY_VOLTAGE), format!("{v:.2}"))])
            .unwrap_or_default()
    }

    fn handle_broadcast(&mut self, key: &str, value: &str) {
        if key == KEY_START_TYPE && value == StartType::FastReset.label() {
            info!("fast reset, holding the station awake");
            self.hold_awake = true;
        }
    }

    fn setup(&mut self, bus: &mut Broadcasts) -> anyhow::Result<()> {
        let voltage = self.measure();
        info!(
            voltage = voltage.unwrap_or(f32::NAN),
            mode = self.config.battery_mode,
            "battery ready"
        );
        bus.send(KEY_MODE, flag_value(self.config.battery_mode));
        Ok(())
    }

    fn run(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        self.measure();
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("battery", "Battery", FORM))
    }

    fn sleep_policy(&self) -> Option<SleepPolicy> {
        Some(SleepPolicy {
            battery_mode: self.config.battery_mode,
            hold_awake: self.hold_awake,
            sleep_for: self.config.sleep_for(self.voltage),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
