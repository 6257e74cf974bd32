//! Duty-cycle controller: one boot from wake to the next deep sleep.
//!
//! ```text
//!   boot ──► restore ──► setup ──► cycle ──► decide ──► shutdown ──► sleep
//!                                    ▲          │
//!                                    └─ serve ◄─┘  (awake window)
//! ```

use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::device::SleepPolicy;
use crate::hal::{ConfigSurface, Delay, StationSnapshot, WakeMemory};
use crate::message::{topic, ConfigMap, Message};
use crate::registry::Registry;
use crate::rtc::WakeState;

pub const KEY_START_TYPE: &str = "rtc/startType";
pub const KEY_POWER_ON: &str = "rtc/powerOn";
pub const KEY_WAKEUP_AMOUNT: &str = "rtc/wakeupAmount";
pub const KEY_RESET_WAKEUP_COUNT: &str = "rtc/resetWakeupCount";

/// Used when no device provides a sleep policy.
pub const FALLBACK_SLEEP: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutySettings {
    /// How long to serve configuration traffic between cycles when staying
    /// awake. Zero means the station never idles and always shuts down.
    pub awake_window: Duration,
    pub poll_slice: Duration,
    /// Wake counter value after a cold start.
    pub start_counter: u16,
}

impl Default for DutySettings {
    fn default() -> Self {
        Self {
            awake_window: Duration::from_secs(50),
            poll_slice: Duration::from_millis(10),
            start_counter: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Sleep(Duration),
    StayAwake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// Shut down cleanly; the caller powers off for this long.
    Sleep(Duration),
    /// Stopped after the requested number of cycles without sleeping.
    CycleLimit,
}

pub struct Controller<M: WakeMemory> {
    registry: Registry,
    wake: WakeState<M>,
    surface: Box<dyn ConfigSurface>,
    delay: Box<dyn Delay>,
    settings: DutySettings,
    cycles: u32,
}

impl<M: WakeMemory> Controller<M> {
    /// Classify the boot, restore persisted configuration and set every
    /// device up.
    pub fn start(
        mut registry: Registry,
        wake_memory: M,
        surface: Box<dyn ConfigSurface>,
        delay: Box<dyn Delay>,
        settings: DutySettings,
    ) -> anyhow::Result<Self> {
        let wake = WakeState::boot(wake_memory, settings.start_counter);
        let restored = registry.restore().context("failed to restore configuration")?;
        info!(?restored, devices = registry.len(), "registry restored");

        registry.broadcast(KEY_START_TYPE, wake.start_type().label());
        registry.broadcast(KEY_POWER_ON, &wake.is_power_on().to_string());
        registry.broadcast(KEY_WAKEUP_AMOUNT, &wake.wakeup_count().to_string());

        let mut controller = Self {
            registry,
            wake,
            surface,
            delay,
            settings,
            cycles: 0,
        };
        let delivered = controller.registry.setup_all();
        controller.handle_rtc(&delivered);
        controller.publish_snapshot();
        Ok(controller)
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn wake(&self) -> &WakeState<M> {
        &self.wake
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Broadcasts addressed to the controller itself.
    fn handle_rtc(&mut self, delivered: &[(String, String)]) {
        for (key, value) in delivered {
            match key.as_str() {
                KEY_RESET_WAKEUP_COUNT => {
                    info!("wakeup counter reset");
                    self.wake.reset_wakeup_count();
                }
                KEY_WAKEUP_AMOUNT => self.set_wakeup_count(value),
                _ => {}
            }
        }
    }

    fn set_wakeup_count(&mut self, raw: &str) {
        match raw.trim().parse::<u16>() {
            Ok(n) => self.wake.set_wakeup_count(n),
            Err(_) => warn!(value = raw, "ignoring malformed wakeup amount"),
        }
    }

    /// Sense, act and publish once.
    pub fn run_cycle(&mut self) -> Decision {
        self.cycles += 1;
        let count = self.wake.wakeup_count();
        self.registry.broadcast(KEY_WAKEUP_AMOUNT, &count.to_string());

        let delivered = self.registry.run_all();
        self.handle_rtc(&delivered);

        let count = self.wake.wakeup_count();
        let published = self
            .registry
            .publish_cycle(|base| vec![Message::new(topic(base, "wakeupAmount"), count)]);
        debug!(cycle = self.cycles, published, wakeups = count, "cycle done");

        self.drain_updates();
        self.publish_snapshot();
        self.decide()
    }

    /// Apply everything posted or delivered by the broker since the last
    /// poll.
    pub fn drain_updates(&mut self) {
        while let Some(config) = self.surface.poll_update() {
            self.apply_update(config);
        }
        while let Some(config) = self.registry.poll_broker_config(Duration::ZERO) {
            self.apply_update(config);
        }
    }

    pub fn decide(&self) -> Decision {
        let policy = self.registry.sleep_policy().unwrap_or(SleepPolicy {
            battery_mode: false,
            hold_awake: false,
            sleep_for: FALLBACK_SLEEP,
        });
        if policy.battery_mode && !policy.hold_awake && !self.wake.is_fast_reset() {
            return Decision::Sleep(policy.sleep_for);
        }
        if self.settings.awake_window.is_zero() {
            return Decision::Sleep(policy.sleep_for);
        }
        Decision::StayAwake
    }

    /// Serve configuration posts and broker config for one awake window.
    pub fn serve_window(&mut self) {
        let slice = self.settings.poll_slice.max(Duration::from_millis(1));
        let slices = (self.settings.awake_window.as_millis() / slice.as_millis()).max(1);
        debug!(slices, slice_ms = slice.as_millis() as u64, "serving configuration");
        for _ in 0..slices {
            self.drain_updates();
            self.delay.delay(slice);
        }
    }

    /// Apply externally posted configuration.
    pub fn apply_update(&mut self, config: ConfigMap) {
        if let Some(raw) = config.get(KEY_WAKEUP_AMOUNT) {
            self.set_wakeup_count(raw);
        }
        match self.registry.apply_config(&config) {
            Ok(changed) => info!(?changed, "configuration updated"),
            Err(e) => error!("failed to persist configuration: {e}"),
        }
        self.publish_snapshot();
    }

    /// Shut every device down, persist and count the sleep. Returns how long
    /// to sleep.
    pub fn shutdown(&mut self, sleep_for: Duration) -> Duration {
        let delivered = self.registry.shutdown_all();
        self.handle_rtc(&delivered);
        if let Err(e) = self.registry.persist() {
            error!("failed to persist before sleep: {e}");
        }
        self.wake.record_sleep_cycle();
        info!(
            secs = sleep_for.as_secs(),
            wakeups = self.wake.wakeup_count(),
            "going to sleep"
        );
        sleep_for
    }

    /// Cycle until a sleep decision, serving the awake window in between.
    /// `max_cycles` bounds a station that would otherwise stay awake forever.
    pub fn run_boot(&mut self, max_cycles: Option<u32>) -> BootOutcome {
        loop {
            match self.run_cycle() {
                Decision::Sleep(d) => return BootOutcome::Sleep(self.shutdown(d)),
                Decision::StayAwake => {
                    if max_cycles.is_some_and(|max| self.cycles >= max) {
                        info!(cycles = self.cycles, "cycle limit reached");
                        return BootOutcome::CycleLimit;
                    }
                    self.serve_window();
                }
            }
        }
    }

    pub fn snapshot(&mut self) -> StationSnapshot {
        StationSnapshot {
            config: self.registry.merged_config(),
            forms: self.registry.forms(),
            wakeup_count: self.wake.wakeup_count(),
            fast_reset: self.wake.is_fast_reset(),
            online: self.registry.is_online(),
        }
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.snapshot();
        self.surface.publish_snapshot(&snapshot);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
