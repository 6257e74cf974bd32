//! Contracts of the hardware and transport collaborators.
//!
//! The core never talks to a peripheral directly. The station binary wires
//! real drivers (rppal, rumqttc, files) or host stand-ins behind these
//! traits; the unit tests use in-memory doubles.

use std::time::Duration;

use crate::error::StoreError;
use crate::message::{ConfigMap, Message};

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Byte-addressed store that survives power loss (EEPROM emulation).
pub trait NonVolatileStore {
    fn capacity(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StoreError>;
    /// Flush pending writes to the medium.
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// Slots of the wake-cycle register. Survives resets, not power loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSlot {
    Magic,
    WakeupCount,
    StartType,
    FastResetCount,
}

impl WakeSlot {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            Self::Magic => 0,
            Self::WakeupCount => 1,
            Self::StartType => 2,
            Self::FastResetCount => 3,
        }
    }
}

pub trait WakeMemory {
    fn read(&self, slot: WakeSlot) -> u32;
    fn write(&mut self, slot: WakeSlot, value: u32);
}

// ---------------------------------------------------------------------------
// Pins, sensors, timing
// ---------------------------------------------------------------------------

pub trait OutputPin {
    fn set(&mut self, high: bool);
    fn is_set_high(&self) -> bool;
}

pub trait InputPin {
    fn is_high(&mut self) -> bool;
}

/// Raw analog reading (battery divider).
pub trait AnalogInput {
    fn read_raw(&mut self) -> anyhow::Result<u16>;
}

/// Temperature (°C), relative humidity (%) and pressure (hPa) source.
pub trait ClimateSensor {
    /// Returns false when nothing answers at the expected bus address.
    fn probe(&mut self) -> bool;
    fn temperature(&mut self) -> anyhow::Result<f32>;
    fn humidity(&mut self) -> anyhow::Result<f32>;
    fn pressure(&mut self) -> anyhow::Result<f32>;
}

/// Blocking suspend primitive. Nothing else runs while it waits.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

// ---------------------------------------------------------------------------
// Network collaborators
// ---------------------------------------------------------------------------

pub trait StationLink {
    /// Join `ssid`, giving up after `max_tries` polls.
    fn connect(&mut self, ssid: &str, password: &str, max_tries: u8) -> bool;
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
    fn local_ip(&self) -> String;
}

pub trait AccessPointLink {
    fn create(&mut self, ap: &AccessPointSettings) -> bool;
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub password: String,
    pub ip: String,
    pub gateway: String,
    pub subnet: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSession {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// A publish received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub trait BrokerTransport {
    fn connect(&mut self, session: &BrokerSession) -> anyhow::Result<()>;
    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()>;
    /// Fire and forget; the transport owns retry and backoff.
    fn publish(&mut self, message: &Message, retain: bool) -> anyhow::Result<()>;
    /// Service the connection for up to `wait` and hand back incoming publishes.
    fn poll(&mut self, wait: Duration) -> Vec<Incoming>;
    fn disconnect(&mut self);
}

// ---------------------------------------------------------------------------
// Configuration surface
// ---------------------------------------------------------------------------

/// What the configuration web surface gets to show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationSnapshot {
    pub config: ConfigMap,
    pub forms: Vec<crate::device::FormDescriptor>,
    pub wakeup_count: u16,
    pub fast_reset: bool,
    pub online: bool,
}

pub trait ConfigSurface {
    /// Next posted form, if any. Never blocks.
    fn poll_update(&mut self) -> Option<ConfigMap>;
    fn publish_snapshot(&mut self, snapshot: &StationSnapshot);
}
