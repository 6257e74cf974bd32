//! Composition root and boot loop of the station firmware.
//!
//! Runs on its own OS thread. Every iteration of the loop is one power-on:
//! the registry is rebuilt from scratch, the controller classifies the boot
//! from the wake memory file, and a sleep decision ends the boot with a
//! (scaled) pause before the next one.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::mpsc::UnboundedReceiver;

use yaha_core::devices::{
    Battery, Bme280, BrokerProxy, DigitalSensor, IrrigationController, Motion, Runtime, SoftAp,
    Switch, Wlan,
};
use yaha_core::hal::{AnalogInput, ClimateSensor, Delay, InputPin, OutputPin};
use yaha_core::{BootOutcome, ConfigMap, Controller, Priority, Registry};

use crate::config::{ClimateSource, Config};
use crate::gpio::Board;
use crate::link::{HostLink, LoggedAccessPoint, NoClimate};
use crate::mqtt::MqttTransport;
use crate::persist::{FileStore, FileWakeMemory};
use crate::state::SharedState;
use crate::surface::ChannelSurface;

/// One simulated day, in device seconds.
#[cfg(feature = "sim")]
const DAY_SECS: f64 = 86_400.0;

/// Fresh battery behind the default divider (about 4.1 V).
#[cfg(not(feature = "adc"))]
const FULL_BATTERY_RAW: u16 = 98;

// ---------------------------------------------------------------------------
// Host collaborators
// ---------------------------------------------------------------------------

/// `thread::sleep`, stretched by `scale`.
pub struct ThreadDelay {
    scale: f64,
}

impl ThreadDelay {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration.mul_f64(self.scale));
    }
}

/// Climate source that outlives a single boot.
#[derive(Clone)]
struct SharedClimate(Rc<RefCell<Box<dyn ClimateSensor>>>);

impl ClimateSensor for SharedClimate {
    fn probe(&mut self) -> bool {
        self.0.borrow_mut().probe()
    }

    fn temperature(&mut self) -> anyhow::Result<f32> {
        self.0.borrow_mut().temperature()
    }

    fn humidity(&mut self) -> anyhow::Result<f32> {
        self.0.borrow_mut().humidity()
    }

    fn pressure(&mut self) -> anyhow::Result<f32> {
        self.0.borrow_mut().pressure()
    }
}

/// Battery input that outlives a single boot.
#[derive(Clone)]
struct SharedAnalog(Rc<RefCell<Box<dyn AnalogInput>>>);

impl AnalogInput for SharedAnalog {
    fn read_raw(&mut self) -> anyhow::Result<u16> {
        self.0.borrow_mut().read_raw()
    }
}

#[cfg(feature = "sim")]
fn climate_source(cfg: &Config) -> Box<dyn ClimateSensor> {
    match cfg.sensor.climate {
        ClimateSource::Sim => {
            let scenario = crate::sim::Scenario::from_str_lossy(&cfg.sensor.scenario);
            tracing::info!(%scenario, "simulated climate sensor");
            Box::new(crate::sim::SimClimate::new(
                scenario,
                DAY_SECS * cfg.station.time_scale,
            ))
        }
        ClimateSource::None => Box::new(NoClimate),
    }
}

#[cfg(not(feature = "sim"))]
fn climate_source(cfg: &Config) -> Box<dyn ClimateSensor> {
    if cfg.sensor.climate == ClimateSource::Sim {
        tracing::warn!("built without the sim feature, climate sensor disabled");
    }
    Box::new(NoClimate)
}

#[cfg(feature = "adc")]
fn battery_source(cfg: &Config) -> Result<Box<dyn AnalogInput>> {
    let adc = crate::adc::Ads1115::new(cfg.sensor.adc_address, cfg.sensor.battery_channel)
        .context("failed to open battery ADC")?;
    Ok(Box::new(adc))
}

#[cfg(all(not(feature = "adc"), feature = "sim"))]
fn battery_source(_cfg: &Config) -> Result<Box<dyn AnalogInput>> {
    Ok(Box::new(crate::sim::SimBattery::new(FULL_BATTERY_RAW, 0.02)))
}

#[cfg(all(not(feature = "adc"), not(feature = "sim")))]
fn battery_source(_cfg: &Config) -> Result<Box<dyn AnalogInput>> {
    Ok(Box::new(crate::link::FixedAnalog(FULL_BATTERY_RAW)))
}

fn gpio(pin: i64) -> Result<u8> {
    u8::try_from(pin).with_context(|| format!("gpio {pin} out of range"))
}

// ---------------------------------------------------------------------------
// Composition root
// ---------------------------------------------------------------------------

pub struct Firmware {
    cfg: Config,
    state: SharedState,
    surface: ChannelSurface,
    board: Board,
    climate: SharedClimate,
    battery: SharedAnalog,
    sys: System,
}

impl Firmware {
    pub fn new(cfg: Config, state: SharedState, posts: UnboundedReceiver<ConfigMap>) -> Result<Self> {
        let surface = ChannelSurface::new(posts, state.clone());
        let climate = SharedClimate(Rc::new(RefCell::new(climate_source(&cfg))));
        let battery = SharedAnalog(Rc::new(RefCell::new(battery_source(&cfg)?)));
        Ok(Self {
            cfg,
            state,
            surface,
            board: Board::new()?,
            climate,
            battery,
            sys: System::new(),
        })
    }

    /// Register every device. Order matters: the access point comes up before
    /// any network, and the weather sensor runs before irrigation so this
    /// cycle's humidity is known when the pumps are decided.
    pub fn build_registry(&mut self) -> Result<Registry> {
        let cfg = &self.cfg;
        let store = FileStore::open(&cfg.station.store_path, cfg.station.store_capacity)?;
        let mut reg = Registry::new(Box::new(store));

        let link = HostLink::new(cfg.network.online);

        reg.register(
            Box::new(SoftAp::new(Box::new(LoggedAccessPoint::default()))),
            Priority::BeforeNetwork,
        )?;
        reg.register(Box::new(Wlan::new(Box::new(link))), Priority::Normal)?;
        reg.register(
            Box::new(BrokerProxy::new(Box::new(MqttTransport::new()))),
            Priority::Normal,
        )?;
        reg.register(
            Box::new(Battery::new(Box::new(self.battery.clone()))),
            Priority::Normal,
        )?;

        let power = match cfg.pins.sensor_power {
            Some(pin) => Some(self.board.output(gpio(pin)?, "sensor power")?),
            None => None,
        };
        reg.register(
            Box::new(Bme280::new(Box::new(self.climate.clone()), power)),
            Priority::Normal,
        )?;

        let pump1 = self.board.output(gpio(cfg.pins.pump1)?, "pump1")?;
        let pump2 = self.board.output(gpio(cfg.pins.pump2)?, "pump2")?;
        let pump_delay = Box::new(ThreadDelay::new(cfg.station.time_scale));
        reg.register(
            Box::new(IrrigationController::new(pump1, pump2, pump_delay)),
            Priority::Normal,
        )?;

        if let Some(pin) = cfg.pins.rain {
            // Dry line idles high.
            let input = self.board.input(gpio(pin)?, "rain", true)?;
            reg.register(Box::new(DigitalSensor::new(input, None)), Priority::Normal)?;
        }

        if !cfg.pins.motion.is_empty() {
            let mut inputs: Vec<Box<dyn InputPin>> = Vec::new();
            for (i, pin) in cfg.pins.motion.iter().enumerate() {
                let label = format!("motion{}", i + 1);
                inputs.push(self.board.input(gpio(*pin)?, &label, false)?);
            }
            reg.register(Box::new(Motion::new(inputs)), Priority::Normal)?;
        }

        if !cfg.pins.switches.is_empty() {
            let mut outputs: Vec<(String, Box<dyn OutputPin>)> = Vec::new();
            for sw in &cfg.pins.switches {
                outputs.push((sw.name.clone(), self.board.output(gpio(sw.pin)?, &sw.name)?));
            }
            reg.register(Box::new(Switch::new(outputs)), Priority::Normal)?;
        }

        reg.register(Box::new(Runtime::new()), Priority::Normal)?;

        tracing::info!(
            devices = reg.len(),
            store_bytes = reg.layout_end(),
            capacity = cfg.station.store_capacity,
            "station assembled"
        );
        Ok(reg)
    }

    fn log_memory(&mut self) {
        self.sys.refresh_memory();
        tracing::info!(
            available_kib = self.sys.available_memory() / 1024,
            used_kib = self.sys.used_memory() / 1024,
            "memory"
        );
    }

    /// One power-on, from boot classification to the sleep decision.
    pub fn boot(&mut self) -> Result<BootOutcome> {
        self.log_memory();
        let registry = self.build_registry()?;
        let wake = FileWakeMemory::open(&self.cfg.station.wake_path);
        let mut controller = Controller::start(
            registry,
            wake,
            Box::new(self.surface.clone()),
            Box::new(ThreadDelay::new(1.0)),
            self.cfg.duty_settings(),
        )?;
        {
            let w = controller.wake();
            self.state
                .blocking_write()
                .record_boot(w.start_type().label(), w.wakeup_count());
        }

        let outcome = controller.run_boot(self.cfg.station.max_cycles);
        match outcome {
            BootOutcome::Sleep(d) => {
                let host = self.cfg.scaled(d);
                self.state.blocking_write().record_sleep(d, host);
            }
            BootOutcome::CycleLimit => {
                controller.shutdown(Duration::ZERO);
                self.state.blocking_write().record_halt(controller.cycles());
            }
        }
        Ok(outcome)
    }

    /// Boot, sleep, repeat. Returns once a boot hits the cycle limit.
    pub fn run(mut self) -> Result<()> {
        loop {
            match self.boot() {
                Ok(BootOutcome::Sleep(d)) => thread::sleep(self.cfg.scaled(d)),
                Ok(BootOutcome::CycleLimit) => return Ok(()),
                Err(e) => {
                    self.state
                        .blocking_write()
                        .record_error(format!("boot failed: {e:#}"));
                    return Err(e);
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio"), not(feature = "adc")))]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    use crate::config::SwitchEntry;
    use crate::state::SystemState;

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("yaha-fw-{}-{name}", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    fn config(tag: &str) -> Config {
        let mut cfg = Config::default();
        cfg.station.store_path = temp_path(&format!("{tag}-store.bin")).display().to_string();
        cfg.station.wake_path = temp_path(&format!("{tag}-wake.bin")).display().to_string();
        cfg.station.awake_window_secs = 0;
        cfg.station.time_scale = 0.001;
        cfg.sensor.climate = ClimateSource::None;
        cfg
    }

    fn firmware(cfg: Config) -> (Firmware, SharedState, mpsc::UnboundedSender<ConfigMap>) {
        let state = Arc::new(RwLock::new(SystemState::new("test")));
        let (tx, rx) = mpsc::unbounded_channel();
        let fw = Firmware::new(cfg, Arc::clone(&state), rx).unwrap();
        (fw, state, tx)
    }

    fn cleanup(cfg: &Config) {
        let _ = fs::remove_file(&cfg.station.store_path);
        let _ = fs::remove_file(&cfg.station.wake_path);
    }

    #[test]
    fn default_station_layout_fits_store() {
        let cfg = config("layout");
        let (mut fw, _, _) = firmware(cfg.clone());
        let reg = fw.build_registry().unwrap();
        // softap, wlan, broker, battery, bme280, irrigation, runtime
        assert_eq!(reg.len(), 7);
        assert_eq!(reg.layout_end(), 1 + 115 + 102 + 192 + 19 + 16);
        cleanup(&cfg);
    }

    #[test]
    fn optional_devices_follow_pins() {
        let mut cfg = config("optional");
        cfg.pins.rain = Some(23);
        cfg.pins.motion = vec![5, 6];
        cfg.pins.switches = vec![SwitchEntry {
            name: "light".into(),
            pin: 12,
        }];
        let (mut fw, _, _) = firmware(cfg.clone());
        let reg = fw.build_registry().unwrap();
        assert_eq!(reg.len(), 10);
        assert!(reg.forms().iter().any(|f| f.route == "switch"));
        cleanup(&cfg);
    }

    #[test]
    fn undersized_store_is_rejected() {
        let mut cfg = config("small");
        cfg.station.store_capacity = 128;
        let (mut fw, _, _) = firmware(cfg.clone());
        let err = fw.build_registry().err().expect("undersized store must be rejected");
        assert!(format!("{err:#}").contains("store capacity is 128"));
        cleanup(&cfg);
    }

    #[test]
    fn boot_without_awake_window_sleeps_and_persists() {
        let cfg = config("boot");
        let (mut fw, state, _tx) = firmware(cfg.clone());

        let outcome = fw.boot().unwrap();
        assert!(matches!(outcome, BootOutcome::Sleep(_)));
        assert!(PathBuf::from(&cfg.station.store_path).exists());
        assert!(PathBuf::from(&cfg.station.wake_path).exists());

        fw.boot().unwrap();
        let st = state.blocking_read();
        assert_eq!(st.boots, 2);
        assert!(!st.awake);
        assert!(st.last_outcome.as_deref().unwrap().starts_with("sleep"));
        assert!(!st.snapshot.forms.is_empty());
        drop(st);
        cleanup(&cfg);
    }

    #[test]
    fn cycle_limit_halts_the_loop() {
        let mut cfg = config("halt");
        cfg.station.awake_window_secs = 1;
        cfg.station.poll_slice_ms = 500;
        cfg.station.max_cycles = Some(1);
        let (fw, state, _tx) = firmware(cfg.clone());

        fw.run().unwrap();
        let st = state.blocking_read();
        assert_eq!(st.boots, 1);
        assert_eq!(st.last_outcome.as_deref(), Some("halted after 1 cycle(s)"));
        drop(st);
        cleanup(&cfg);
    }
}
