//! TOML config file loading and validation for the station host: where the
//! store lives, which pins drive what, and how fast simulated time runs.
//!
//! Device settings (WiFi, broker, battery, irrigation) are not in here. They
//! are persisted in the station store and edited through the web surface.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use yaha_core::store::DEFAULT_CAPACITY;
use yaha_core::DutySettings;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub station: StationSection,
    pub web: WebSection,
    pub pins: PinSection,
    pub sensor: SensorSection,
    pub network: NetworkSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationSection {
    pub name: String,
    pub store_path: String,
    pub wake_path: String,
    pub store_capacity: usize,
    pub awake_window_secs: u64,
    pub poll_slice_ms: u64,
    /// Multiplier applied to deep sleeps and pump runs. 1.0 is real time.
    pub time_scale: f64,
    /// Stop after this many cycles of a boot that never sleeps.
    pub max_cycles: Option<u32>,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            name: "yaha-station".into(),
            store_path: "yaha-store.bin".into(),
            wake_path: "yaha-wake.bin".into(),
            store_capacity: DEFAULT_CAPACITY,
            awake_window_secs: 50,
            poll_slice_ms: 10,
            time_scale: 1.0,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinSection {
    pub pump1: i64,
    pub pump2: i64,
    pub sensor_power: Option<i64>,
    pub rain: Option<i64>,
    pub motion: Vec<i64>,
    pub switches: Vec<SwitchEntry>,
}

impl Default for PinSection {
    fn default() -> Self {
        Self {
            pump1: 17,
            pump2: 27,
            sensor_power: None,
            rain: None,
            motion: Vec::new(),
            switches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchEntry {
    pub name: String,
    pub pin: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClimateSource {
    #[default]
    Sim,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub climate: ClimateSource,
    /// Simulation profile, see `sim::Scenario`.
    pub scenario: String,
    pub adc_address: u16,
    pub battery_channel: usize,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            climate: ClimateSource::Sim,
            scenario: "drying".into(),
            adc_address: 0x48,
            battery_channel: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Whether the simulated WiFi link joins the configured network.
    pub online: bool,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self { online: true }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Smallest store that still fits the header and a useful set of records.
const MIN_STORE_CAPACITY: usize = 64;

/// The motion device polls at most three detectors.
const MAX_MOTION_INPUTS: usize = 3;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_station(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_station(&self, errors: &mut Vec<String>) {
        let s = &self.station;

        if s.name.trim().is_empty() {
            errors.push("station: name is empty".into());
        }
        if s.store_path.trim().is_empty() {
            errors.push("station: store_path is empty".into());
        }
        if s.wake_path.trim().is_empty() {
            errors.push("station: wake_path is empty".into());
        } else if s.wake_path == s.store_path {
            errors.push(format!(
                "station: wake_path and store_path are both '{}'",
                s.wake_path
            ));
        }
        if s.store_capacity < MIN_STORE_CAPACITY {
            errors.push(format!(
                "station: store_capacity {} is below the minimum of {MIN_STORE_CAPACITY} bytes",
                s.store_capacity
            ));
        }
        if s.poll_slice_ms == 0 {
            errors.push("station: poll_slice_ms must be positive".into());
        } else if s.poll_slice_ms > s.awake_window_secs * 1000 && s.awake_window_secs > 0 {
            errors.push(format!(
                "station: poll_slice_ms ({}) exceeds the awake window ({} s)",
                s.poll_slice_ms, s.awake_window_secs
            ));
        }
        if !(s.time_scale.is_finite() && s.time_scale > 0.0) {
            errors.push(format!(
                "station: time_scale must be positive, got {}",
                s.time_scale
            ));
        }
        if s.max_cycles == Some(0) {
            errors.push("station: max_cycles must be positive when set".into());
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;
        let mut seen_pins: HashSet<i64> = HashSet::new();
        let mut check = |what: String, pin: i64, errors: &mut Vec<String>| {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{what}: gpio {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!("{what}: gpio {pin} is already in use"));
            }
        };

        check("pins.pump1".into(), p.pump1, errors);
        check("pins.pump2".into(), p.pump2, errors);
        if let Some(pin) = p.sensor_power {
            check("pins.sensor_power".into(), pin, errors);
        }
        if let Some(pin) = p.rain {
            check("pins.rain".into(), pin, errors);
        }

        if p.motion.len() > MAX_MOTION_INPUTS {
            errors.push(format!(
                "pins.motion: {} inputs configured, at most {MAX_MOTION_INPUTS} are supported",
                p.motion.len()
            ));
        }
        for (i, pin) in p.motion.iter().enumerate() {
            check(format!("pins.motion[{i}]"), *pin, errors);
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, sw) in p.switches.iter().enumerate() {
            let ctx = if sw.name.is_empty() {
                format!("pins.switches[{i}]")
            } else {
                format!("switch '{}'", sw.name)
            };
            if sw.name.trim().is_empty() {
                errors.push(format!("{ctx}: name is empty"));
            } else if sw.name.contains('/') {
                errors.push(format!("{ctx}: name must not contain '/'"));
            } else if !seen_names.insert(&sw.name) {
                errors.push(format!("{ctx}: duplicate name"));
            }
            check(ctx, sw.pin, errors);
        }
    }

    /// Timing handed to the duty-cycle controller.
    pub fn duty_settings(&self) -> DutySettings {
        DutySettings {
            awake_window: Duration::from_secs(self.station.awake_window_secs),
            poll_slice: Duration::from_millis(self.station.poll_slice_ms),
            ..DutySettings::default()
        }
    }

    /// Scale a device-side duration to host time.
    pub fn scaled(&self, d: Duration) -> Duration {
        d.mul_f64(self.station.time_scale)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    tracing::info!(
        station = %config.station.name,
        switches = config.pins.switches.len(),
        motion = config.pins.motion.len(),
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[station]
name = "greenhouse"
store_path = "/var/lib/yaha/store.bin"
wake_path = "/run/yaha/wake.bin"
store_capacity = 1024
awake_window_secs = 20
poll_slice_ms = 50
time_scale = 0.01

[web]
port = 9090

[pins]
pump1 = 5
pump2 = 6
sensor_power = 22
rain = 23
motion = [16, 20, 21]

[[pins.switches]]
name = "light"
pin = 12

[sensor]
climate = "none"
scenario = "humid"

[network]
online = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.station.name, "greenhouse");
        assert_eq!(config.station.store_capacity, 1024);
        assert_eq!(config.web.port, 9090);
        assert_eq!(config.pins.sensor_power, Some(22));
        assert_eq!(config.pins.motion, vec![16, 20, 21]);
        assert_eq!(config.pins.switches[0].name, "light");
        assert_eq!(config.sensor.climate, ClimateSource::None);
        assert!(!config.network.online);
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.station.store_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.pins.pump1, 17);
        assert_eq!(config.sensor.climate, ClimateSource::Sim);
        assert!(config.network.online);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_climate_source_is_rejected() {
        let res: std::result::Result<Config, _> = toml::from_str("[sensor]\nclimate = \"bme680\"");
        assert!(res.is_err());
    }

    // -- Station ----------------------------------------------------------

    #[test]
    fn small_store_rejected() {
        let mut cfg = Config::default();
        cfg.station.store_capacity = 32;
        assert_validation_err(&cfg, "store_capacity 32 is below the minimum");
    }

    #[test]
    fn zero_poll_slice_rejected() {
        let mut cfg = Config::default();
        cfg.station.poll_slice_ms = 0;
        assert_validation_err(&cfg, "poll_slice_ms must be positive");
    }

    #[test]
    fn poll_slice_longer_than_window_rejected() {
        let mut cfg = Config::default();
        cfg.station.awake_window_secs = 1;
        cfg.station.poll_slice_ms = 5000;
        assert_validation_err(&cfg, "exceeds the awake window");
    }

    #[test]
    fn zero_window_allows_any_slice() {
        let mut cfg = Config::default();
        cfg.station.awake_window_secs = 0;
        cfg.station.poll_slice_ms = 5000;
        cfg.validate().unwrap();
    }

    #[test]
    fn non_positive_time_scale_rejected() {
        let mut cfg = Config::default();
        cfg.station.time_scale = 0.0;
        assert_validation_err(&cfg, "time_scale must be positive");
        cfg.station.time_scale = f64::NAN;
        assert_validation_err(&cfg, "time_scale must be positive");
    }

    #[test]
    fn shared_store_and_wake_file_rejected() {
        let mut cfg = Config::default();
        cfg.station.wake_path = cfg.station.store_path.clone();
        assert_validation_err(&cfg, "wake_path and store_path are both");
    }

    // -- Pins -------------------------------------------------------------

    #[test]
    fn reserved_gpio_rejected() {
        let mut cfg = Config::default();
        cfg.pins.pump1 = 0;
        assert_validation_err(&cfg, "pins.pump1: gpio 0 is not a valid BCM GPIO pin");
    }

    #[test]
    fn gpio_above_header_rejected() {
        let mut cfg = Config::default();
        cfg.pins.rain = Some(28);
        assert_validation_err(&cfg, "pins.rain: gpio 28 is not a valid");
    }

    #[test]
    fn duplicate_pin_rejected() {
        let mut cfg = Config::default();
        cfg.pins.pump2 = cfg.pins.pump1;
        assert_validation_err(&cfg, "pins.pump2: gpio 17 is already in use");
    }

    #[test]
    fn switch_pin_clashing_with_motion_rejected() {
        let mut cfg = Config::default();
        cfg.pins.motion = vec![16];
        cfg.pins.switches = vec![SwitchEntry {
            name: "light".into(),
            pin: 16,
        }];
        assert_validation_err(&cfg, "switch 'light': gpio 16 is already in use");
    }

    #[test]
    fn too_many_motion_inputs_rejected() {
        let mut cfg = Config::default();
        cfg.pins.motion = vec![5, 6, 13, 19];
        assert_validation_err(&cfg, "4 inputs configured");
    }

    #[test]
    fn duplicate_switch_name_rejected() {
        let mut cfg = Config::default();
        cfg.pins.switches = vec![
            SwitchEntry {
                name: "light".into(),
                pin: 12,
            },
            SwitchEntry {
                name: "light".into(),
                pin: 13,
            },
        ];
        assert_validation_err(&cfg, "switch 'light': duplicate name");
    }

    #[test]
    fn switch_name_with_slash_rejected() {
        let mut cfg = Config::default();
        cfg.pins.switches = vec![SwitchEntry {
            name: "a/b".into(),
            pin: 12,
        }];
        assert_validation_err(&cfg, "must not contain '/'");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.station.poll_slice_ms = 0;
        cfg.pins.pump1 = 1;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("(2 errors)"), "got: {msg}");
    }

    // -- Derived values ---------------------------------------------------

    #[test]
    fn duty_settings_follow_station_section() {
        let mut cfg = Config::default();
        cfg.station.awake_window_secs = 5;
        cfg.station.poll_slice_ms = 100;
        let d = cfg.duty_settings();
        assert_eq!(d.awake_window, Duration::from_secs(5));
        assert_eq!(d.poll_slice, Duration::from_millis(100));
        assert_eq!(d.start_counter, 0);
    }

    #[test]
    fn scaled_applies_time_scale() {
        let mut cfg = Config::default();
        cfg.station.time_scale = 0.5;
        assert_eq!(cfg.scaled(Duration::from_secs(10)), Duration::from_secs(5));
    }
}
