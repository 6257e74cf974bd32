//! Simulated weather sensor and battery for running the station on a host.
//!
//! Humidity follows a random walk with mean reversion and a day/night
//! cycle. Temperature moves against humidity, pressure wanders slowly.
//! The battery discharges a little on every read.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use yaha_core::hal::{AnalogInput, ClimateSensor};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Weather profiles selectable via `[sensor] scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Humidity sinks towards the low threshold.  Irrigation fires often.
    Drying,
    /// Hovers mid-range with little noise.
    Stable,
    /// Damp weather; irrigation rarely fires.
    Humid,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "humid" => Self::Humid,
            _ => Self::Drying,
        }
    }

    /// (mean humidity %, walk sigma, mean reversion)
    fn params(self) -> (f64, f64, f64) {
        match self {
            Self::Drying => (30.0, 1.5, 0.05),
            Self::Stable => (45.0, 0.5, 0.10),
            Self::Humid => (75.0, 1.0, 0.05),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Humid => write!(f, "humid"),
        }
    }
}

// ---------------------------------------------------------------------------
// Climate
// ---------------------------------------------------------------------------

pub struct SimClimate {
    humidity: f64,
    pressure: f64,
    center: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    diurnal_amplitude: f64,
    diurnal_period_s: f64,
}

impl SimClimate {
    /// `diurnal_period_s` is the simulated day length.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (center, walk_sigma, mean_reversion) = scenario.params();
        Self {
            humidity: center + gaussian(0.0, 3.0),
            pressure: 1013.0 + gaussian(0.0, 4.0),
            center,
            walk_sigma,
            mean_reversion,
            diurnal_amplitude: 10.0,
            diurnal_period_s: diurnal_period_s.max(1.0),
        }
    }

    /// -1 in the early morning, +1 in the afternoon.
    fn daylight(&self) -> f64 {
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s).sin()
    }

    fn step(&mut self) {
        let pull = self.mean_reversion * (self.center - self.humidity);
        self.humidity = (self.humidity + pull + gaussian(0.0, self.walk_sigma)).clamp(0.0, 100.0);
        self.pressure = (self.pressure + gaussian(0.0, 0.3)).clamp(950.0, 1060.0);
    }
}

impl ClimateSensor for SimClimate {
    fn probe(&mut self) -> bool {
        true
    }

    fn temperature(&mut self) -> anyhow::Result<f32> {
        let t = 18.0 + 7.0 * self.daylight() - 0.05 * (self.humidity - 50.0);
        Ok(t as f32)
    }

    /// Advances the walk; the station reads humidity once per cycle.
    fn humidity(&mut self) -> anyhow::Result<f32> {
        self.step();
        let h = self.humidity - self.diurnal_amplitude * self.daylight();
        Ok(h.clamp(0.0, 100.0) as f32)
    }

    fn pressure(&mut self) -> anyhow::Result<f32> {
        Ok(self.pressure as f32)
    }
}

// ---------------------------------------------------------------------------
// Battery
// ---------------------------------------------------------------------------

/// Battery divider read by a 10-bit ADC.
pub struct SimBattery {
    raw: f64,
    drain_per_read: f64,
}

impl SimBattery {
    pub fn new(start_raw: u16, drain_per_read: f64) -> Self {
        Self {
            raw: f64::from(start_raw),
            drain_per_read,
        }
    }
}

impl AnalogInput for SimBattery {
    fn read_raw(&mut self) -> anyhow::Result<u16> {
        self.raw = (self.raw - self.drain_per_read).max(0.0);
        let reading = self.raw + gaussian(0.0, 0.5);
        Ok(reading.round().clamp(0.0, 1023.0) as u16)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_humidity(sim: &mut SimClimate, n: usize) -> f64 {
        (0..n).map(|_| f64::from(sim.humidity().unwrap())).sum::<f64>() / n as f64
    }

    #[test]
    fn readings_stay_physical() {
        let mut sim = SimClimate::new(Scenario::Drying, 600.0);
        assert!(sim.probe());
        for _ in 0..500 {
            let h = sim.humidity().unwrap();
            let p = sim.pressure().unwrap();
            let t = sim.temperature().unwrap();
            assert!((0.0..=100.0).contains(&h), "humidity out of range: {h}");
            assert!((950.0..=1060.0).contains(&p), "pressure out of range: {p}");
            assert!((-20.0..=50.0).contains(&t), "temperature out of range: {t}");
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = SimClimate::new(Scenario::Stable, 86_400.0);
        let samples: Vec<f32> = (0..100).map(|_| sim.humidity().unwrap()).collect();
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_jump < 10.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn humid_scenario_is_wetter_than_drying() {
        // Day length far above the test duration keeps the diurnal term flat.
        let mut dry = SimClimate::new(Scenario::Drying, 1.0e9);
        let mut humid = SimClimate::new(Scenario::Humid, 1.0e9);
        let dry_mean = mean_humidity(&mut dry, 200);
        let humid_mean = mean_humidity(&mut humid, 200);
        assert!(
            humid_mean > dry_mean + 20.0,
            "humid ({humid_mean:.1}) should exceed drying ({dry_mean:.1})"
        );
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("Humid"), Scenario::Humid);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Drying);
        assert_eq!(Scenario::Humid.to_string(), "humid");
    }

    #[test]
    fn battery_discharges() {
        let mut bat = SimBattery::new(100, 1.0);
        let first = bat.read_raw().unwrap();
        for _ in 0..20 {
            bat.read_raw().unwrap();
        }
        let later = bat.read_raw().unwrap();
        assert!(later < first, "battery should drain: {first} -> {later}");
    }

    #[test]
    fn empty_battery_reads_near_zero() {
        let mut bat = SimBattery::new(1, 5.0);
        for _ in 0..10 {
            assert!(bat.read_raw().unwrap() <= 3);
        }
    }
}
