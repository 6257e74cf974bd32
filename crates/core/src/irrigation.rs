//! Irrigation decision engine.
//!
//! Both the number of wake cycles to wait and the pump run time are linear
//! between two humidity anchors. Humidity outside the anchors is clamped, so
//! the result never leaves the configured range. The anchors may be given in
//! either order.

use std::time::Duration;

use tracing::warn;

use crate::error::IrrigationError;
use crate::message::{merge_parsed, ConfigMap};
use crate::store::{Record, RecordReader, RecordWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    One,
    Two,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrrigationConfig {
    /// Percent relative humidity of the dry anchor.
    pub low_humidity: u16,
    /// Percent relative humidity of the wet anchor.
    pub high_humidity: u16,
    pub low_duration_secs: u16,
    pub high_duration_secs: u16,
    pub low_wakeup_count: u16,
    pub high_wakeup_count: u16,
    /// Pump 2 runs `pump2_factor` times as long as pump 1.
    pub pump2_factor: f32,
}

impl Default for IrrigationConfig {
    fn default() -> Self {
        Self {
            low_humidity: 30,
            high_humidity: 60,
            low_duration_secs: 0,
            high_duration_secs: 0,
            low_wakeup_count: 24,
            high_wakeup_count: 24,
            pump2_factor: 1.0,
        }
    }
}

impl Record for IrrigationConfig {
    const LEN: usize = 6 * 2 + 4;

    fn encode(&self, w: &mut RecordWriter) {
        w.u16(self.low_humidity);
        w.u16(self.high_humidity);
        w.u16(self.low_duration_secs);
        w.u16(self.high_duration_secs);
        w.u16(self.low_wakeup_count);
        w.u16(self.high_wakeup_count);
        w.f32(self.pump2_factor);
    }

    fn decode(r: &mut RecordReader<'_>) -> Self {
        Self {
            low_humidity: r.u16(),
            high_humidity: r.u16(),
            low_duration_secs: r.u16(),
            high_duration_secs: r.u16(),
            low_wakeup_count: r.u16(),
            high_wakeup_count: r.u16(),
            pump2_factor: r.f32(),
        }
    }
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct IrrigationPlan {
    pub needed_wakeups: f32,
    pub fire: bool,
    pub pump1: Duration,
    pub pump2: Duration,
}

pub const KEY_LOW_HUMIDITY: &str = "irrigation/lowHumidity";
pub const KEY_HIGH_HUMIDITY: &str = "irrigation/highHumidity";
pub const KEY_LOW_DURATION: &str = "irrigation/lowDurationInSeconds";
pub const KEY_HIGH_DURATION: &str = "irrigation/highDurationInSeconds";
pub const KEY_LOW_WAKEUP: &str = "irrigation/lowWakeup";
pub const KEY_HIGH_WAKEUP: &str = "irrigation/highWakeup";
pub const KEY_PUMP2_FACTOR: &str = "irrigation/pump2Factor";

/// Largest accepted pump 2 factor.
pub const MAX_PUMP2_FACTOR: f32 = 100.0;

impl IrrigationConfig {
    /// Fails when both anchors sit at the same humidity.
    pub fn validate(&self) -> Result<(), IrrigationError> {
        if self.high_humidity == self.low_humidity {
            return Err(IrrigationError::DegenerateRange {
                low: f32::from(self.low_humidity),
                high: f32::from(self.high_humidity),
            });
        }
        Ok(())
    }

    /// Fraction of the way from the low anchor to the high one, in [0, 1].
    fn position(&self, humidity: f32) -> Result<f32, IrrigationError> {
        self.validate()?;
        if !humidity.is_finite() {
            return Err(IrrigationError::InvalidHumidity(humidity));
        }
        let low = f32::from(self.low_humidity);
        let high = f32::from(self.high_humidity);
        let clamped = humidity.clamp(low.min(high), low.max(high));
        Ok((clamped - low) / (high - low))
    }

    fn lerp(low: u16, high: u16, t: f32) -> f32 {
        let low = f32::from(low);
        low + (f32::from(high) - low) * t
    }

    pub fn needed_wakeups(&self, humidity: f32) -> Result<f32, IrrigationError> {
        let t = self.position(humidity)?;
        Ok(Self::lerp(self.low_wakeup_count, self.high_wakeup_count, t))
    }

    pub fn duration_secs(&self, humidity: f32, pump: Pump) -> Result<f32, IrrigationError> {
        let t = self.position(humidity)?;
        let base = Self::lerp(self.low_duration_secs, self.high_duration_secs, t);
        Ok(match pump {
            Pump::One => base,
            Pump::Two => base * self.pump2_factor.max(0.0),
        })
    }

    /// Decide for the current humidity and wake count. Durations are computed
    /// once here, before any pump is driven.
    pub fn plan(&self, humidity: f32, wake_count: u16) -> Result<IrrigationPlan, IrrigationError> {
        let needed_wakeups = self.needed_wakeups(humidity)?;
        let secs = |pump| -> Result<Duration, IrrigationError> {
            let secs = self.duration_secs(humidity, pump)?.max(0.0);
            Duration::try_from_secs_f32(secs)
                .map_err(|_| IrrigationError::DurationOutOfRange(secs))
        };
        Ok(IrrigationPlan {
            needed_wakeups,
            fire: f32::from(wake_count) >= needed_wakeups,
            pump1: secs(Pump::One)?,
            pump2: secs(Pump::Two)?,
        })
    }

    pub fn to_config(&self) -> ConfigMap {
        ConfigMap::from([
            (KEY_LOW_HUMIDITY.into(), self.low_humidity.to_string()),
            (KEY_HIGH_HUMIDITY.into(), self.high_humidity.to_string()),
            (KEY_LOW_DURATION.into(), self.low_duration_secs.to_string()),
            (KEY_HIGH_DURATION.into(), self.high_duration_secs.to_string()),
            (KEY_LOW_WAKEUP.into(), self.low_wakeup_count.to_string()),
            (KEY_HIGH_WAKEUP.into(), self.high_wakeup_count.to_string()),
            (KEY_PUMP2_FACTOR.into(), self.pump2_factor.to_string()),
        ])
    }

    /// Keys missing from `config` keep their value.
    pub fn merge(&mut self, config: &ConfigMap) {
        merge_parsed(config, KEY_LOW_HUMIDITY, &mut self.low_humidity);
        merge_parsed(config, KEY_HIGH_HUMIDITY, &mut self.high_humidity);
        merge_parsed(config, KEY_LOW_DURATION, &mut self.low_duration_secs);
        merge_parsed(config, KEY_HIGH_DURATION, &mut self.high_duration_secs);
        merge_parsed(config, KEY_LOW_WAKEUP, &mut self.low_wakeup_count);
        merge_parsed(config, KEY_HIGH_WAKEUP, &mut self.high_wakeup_count);
        let mut factor = self.pump2_factor;
        if merge_parsed(config, KEY_PUMP2_FACTOR, &mut factor) {
            if factor.is_finite() && factor <= MAX_PUMP2_FACTOR {
                self.pump2_factor = factor;
            } else {
                warn!(factor, max = MAX_PUMP2_FACTOR, "ignoring out of range pump2 factor");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{decode, encode};

    fn tuned() -> IrrigationConfig {
        IrrigationConfig {
            low_humidity: 30,
            high_humidity: 60,
            low_duration_secs: 120,
            high_duration_secs: 20,
            low_wakeup_count: 4,
            high_wakeup_count: 24,
            pump2_factor: 0.5,
        }
    }

    #[test]
    fn midpoint_is_the_mean_of_the_anchors() {
        let c = tuned();
        assert_eq!(c.needed_wakeups(45.0).unwrap(), 14.0);
        assert_eq!(c.duration_secs(45.0, Pump::One).unwrap(), 70.0);
        assert_eq!(c.duration_secs(45.0, Pump::Two).unwrap(), 35.0);
    }

    #[test]
    fn anchors_return_their_own_values() {
        let c = tuned();
        assert_eq!(c.needed_wakeups(30.0).unwrap(), 4.0);
        assert_eq!(c.duration_secs(30.0, Pump::One).unwrap(), 120.0);
        assert_eq!(c.needed_wakeups(60.0).unwrap(), 24.0);
        assert_eq!(c.duration_secs(60.0, Pump::One).unwrap(), 20.0);
    }

    #[test]
    fn humidity_outside_the_anchors_is_clamped() {
        let c = tuned();
        assert_eq!(c.needed_wakeups(5.0).unwrap(), 4.0);
        assert_eq!(c.duration_secs(95.0, Pump::One).unwrap(), 20.0);
    }

    #[test]
    fn flat_duration_scenario() {
        let c = IrrigationConfig {
            low_humidity: 30,
            high_humidity: 50,
            low_duration_secs: 30,
            high_duration_secs: 30,
            pump2_factor: 1.0,
            ..IrrigationConfig::default()
        };
        let plan = c.plan(40.0, 0).unwrap();
        assert_eq!(plan.pump1, Duration::from_secs(30));
        assert_eq!(plan.pump2, Duration::from_secs(30));
    }

    #[test]
    fn flat_wakeup_scenario() {
        let c = IrrigationConfig::default();
        for h in [0.0, 30.0, 42.0, 60.0, 100.0] {
            assert_eq!(c.needed_wakeups(h).unwrap(), 24.0);
        }
    }

    #[test]
    fn fires_once_enough_wakeups_have_passed() {
        let c = tuned();
        assert!(!c.plan(30.0, 3).unwrap().fire);
        assert!(c.plan(30.0, 4).unwrap().fire);
    }

    #[test]
    fn degenerate_range_is_an_error() {
        let c = IrrigationConfig {
            low_humidity: 50,
            high_humidity: 50,
            ..IrrigationConfig::default()
        };
        assert_eq!(
            c.plan(50.0, 100).unwrap_err(),
            IrrigationError::DegenerateRange {
                low: 50.0,
                high: 50.0
            }
        );
    }

    #[test]
    fn inverted_anchors_interpolate_the_same_line() {
        let c = IrrigationConfig {
            low_humidity: 60,
            high_humidity: 30,
            low_duration_secs: 20,
            high_duration_secs: 120,
            low_wakeup_count: 24,
            high_wakeup_count: 4,
            pump2_factor: 1.0,
        };
        assert_eq!(c.needed_wakeups(45.0).unwrap(), 14.0);
        assert_eq!(c.needed_wakeups(10.0).unwrap(), 4.0);
        assert_eq!(c.duration_secs(90.0, Pump::One).unwrap(), 20.0);
        assert!(c.plan(45.0, 0).is_ok());
    }

    #[test]
    fn oversized_pump2_factor_is_not_merged() {
        let mut c = IrrigationConfig {
            low_duration_secs: 60,
            high_duration_secs: 60,
            ..IrrigationConfig::default()
        };
        for raw in ["1e30", "inf", "NaN", "101"] {
            c.merge(&ConfigMap::from([(KEY_PUMP2_FACTOR.into(), raw.into())]));
            assert_eq!(c.pump2_factor, 1.0, "accepted {raw}");
        }
        c.merge(&ConfigMap::from([(KEY_PUMP2_FACTOR.into(), "2.5".into())]));
        assert_eq!(c.pump2_factor, 2.5);
        assert_eq!(c.plan(40.0, 0).unwrap().pump2, Duration::from_secs(150));
    }

    #[test]
    fn overflowing_duration_is_an_error() {
        // A factor restored from a corrupt record bypasses merge.
        let c = IrrigationConfig {
            low_duration_secs: 60,
            high_duration_secs: 60,
            pump2_factor: 1e30,
            ..IrrigationConfig::default()
        };
        assert!(matches!(
            c.plan(40.0, 0),
            Err(IrrigationError::DurationOutOfRange(_))
        ));
    }

    #[test]
    fn nan_humidity_is_rejected() {
        assert!(matches!(
            tuned().needed_wakeups(f32::NAN),
            Err(IrrigationError::InvalidHumidity(_))
        ));
    }

    #[test]
    fn negative_pump2_factor_means_pump2_stays_off() {
        let mut c = tuned();
        c.pump2_factor = -2.0;
        assert_eq!(c.plan(45.0, 0).unwrap().pump2, Duration::ZERO);
    }

    #[test]
    fn record_round_trip() {
        let back: IrrigationConfig = decode(&encode(&tuned()));
        assert_eq!(back, tuned());
    }

    #[test]
    fn merge_keeps_missing_keys() {
        let mut c = tuned();
        c.merge(&ConfigMap::from([(KEY_HIGH_WAKEUP.into(), "48".into())]));
        assert_eq!(c.high_wakeup_count, 48);
        assert_eq!(c.low_wakeup_count, 4);
        assert_eq!(IrrigationConfig::default().to_config()[KEY_PUMP2_FACTOR], "1");
    }
}
