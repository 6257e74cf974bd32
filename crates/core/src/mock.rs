//! In-memory doubles for every hardware contract.
//!
//! Handles are cheap clones sharing their state, so a test can keep one and
//! hand the other to a device. Compiled for tests and behind the `mock`
//! feature.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::error::StoreError;
use crate::hal::{
    AccessPointLink, AccessPointSettings, AnalogInput, BrokerSession, BrokerTransport,
    ClimateSensor, ConfigSurface, Delay, InputPin, Incoming, NonVolatileStore, OutputPin,
    StationLink, StationSnapshot, WakeMemory, WakeSlot,
};
use crate::message::{ConfigMap, Message};

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Store backed by a byte vector. Starts erased (0xFF) like fresh flash.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    commits: usize,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            commits: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl NonVolatileStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let src = self
            .bytes
            .get(offset..offset + buf.len())
            .ok_or(StoreError::OutOfBounds {
                offset,
                len: buf.len(),
                capacity: self.bytes.len(),
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StoreError> {
        let capacity = self.bytes.len();
        let dst = self
            .bytes
            .get_mut(offset..offset + data.len())
            .ok_or(StoreError::OutOfBounds {
                offset,
                len: data.len(),
                capacity,
            })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commits += 1;
        Ok(())
    }
}

/// Wake register shared between clones: a clone plays the next boot.
#[derive(Debug, Clone, Default)]
pub struct MemoryWakeMemory {
    slots: Rc<RefCell<[u32; WakeSlot::COUNT]>>,
}

impl MemoryWakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, as a power loss does.
    pub fn power_loss(&self) {
        *self.slots.borrow_mut() = [0; WakeSlot::COUNT];
    }
}

impl WakeMemory for MemoryWakeMemory {
    fn read(&self, slot: WakeSlot) -> u32 {
        self.slots.borrow()[slot.index()]
    }

    fn write(&mut self, slot: WakeSlot, value: u32) {
        self.slots.borrow_mut()[slot.index()] = value;
    }
}

// ---------------------------------------------------------------------------
// Pins, sensors, timing
// ---------------------------------------------------------------------------

/// Output pin remembering every level it was driven to.
#[derive(Debug, Clone)]
pub struct MockOutputPin {
    label: Rc<str>,
    history: Rc<RefCell<Vec<bool>>>,
}

impl MockOutputPin {
    pub fn new(label: &str) -> Self {
        Self {
            label: Rc::from(label),
            history: Rc::default(),
        }
    }

    pub fn history(&self) -> Vec<bool> {
        self.history.borrow().clone()
    }
}

impl OutputPin for MockOutputPin {
    fn set(&mut self, high: bool) {
        info!(pin = %self.label, high, "[mock] pin set");
        self.history.borrow_mut().push(high);
    }

    fn is_set_high(&self) -> bool {
        self.history.borrow().last().copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockInputPin {
    level: Rc<Cell<bool>>,
}

impl MockInputPin {
    pub fn new(high: bool) -> Self {
        Self {
            level: Rc::new(Cell::new(high)),
        }
    }

    pub fn drive(&self, high: bool) {
        self.level.set(high);
    }
}

impl InputPin for MockInputPin {
    fn is_high(&mut self) -> bool {
        self.level.get()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockAnalog {
    raw: Rc<Cell<Option<u16>>>,
}

impl MockAnalog {
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Rc::new(Cell::new(Some(raw))),
        }
    }

    /// `None` makes reads fail.
    pub fn set(&self, raw: Option<u16>) {
        self.raw.set(raw);
    }
}

impl AnalogInput for MockAnalog {
    fn read_raw(&mut self) -> anyhow::Result<u16> {
        self.raw
            .get()
            .ok_or_else(|| anyhow::anyhow!("analog input not responding"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
}

#[derive(Debug, Clone)]
pub struct MockClimate {
    present: bool,
    reading: Rc<Cell<ClimateReading>>,
}

impl MockClimate {
    pub fn new(reading: ClimateReading) -> Self {
        Self {
            present: true,
            reading: Rc::new(Cell::new(reading)),
        }
    }

    /// A sensor that never answers the probe.
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new(ClimateReading {
                temperature: 0.0,
                humidity: 0.0,
                pressure: 0.0,
            })
        }
    }

    pub fn set(&self, reading: ClimateReading) {
        self.reading.set(reading);
    }
}

impl ClimateSensor for MockClimate {
    fn probe(&mut self) -> bool {
        self.present
    }

    fn temperature(&mut self) -> anyhow::Result<f32> {
        Ok(self.reading.get().temperature)
    }

    fn humidity(&mut self) -> anyhow::Result<f32> {
        Ok(self.reading.get().humidity)
    }

    fn pressure(&mut self) -> anyhow::Result<f32> {
        Ok(self.reading.get().pressure)
    }
}

/// Records requested delays instead of waiting.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    calls: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.calls.borrow().iter().sum()
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.calls.borrow_mut().push(duration);
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// WiFi station that joins only `reachable_ssid`.
#[derive(Debug, Clone, Default)]
pub struct MockStationLink {
    reachable_ssid: Option<String>,
    connected: Rc<Cell<bool>>,
}

impl MockStationLink {
    pub fn reaching(ssid: &str) -> Self {
        Self {
            reachable_ssid: Some(ssid.to_string()),
            connected: Rc::default(),
        }
    }

    /// Any ssid connects.
    pub fn open() -> Self {
        Self {
            reachable_ssid: None,
            connected: Rc::default(),
        }
    }

    /// Nothing ever connects.
    pub fn unreachable() -> Self {
        Self::reaching("")
    }
}

impl StationLink for MockStationLink {
    fn connect(&mut self, ssid: &str, _password: &str, _max_tries: u8) -> bool {
        let ok = !ssid.is_empty() && self.reachable_ssid.as_deref().map_or(true, |s| s == ssid);
        self.connected.set(ok);
        ok
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn disconnect(&mut self) {
        self.connected.set(false);
    }

    fn local_ip(&self) -> String {
        if self.connected.get() {
            "192.168.1.50".to_string()
        } else {
            "0.0.0.0".to_string()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockAccessPoint {
    active: Rc<RefCell<Option<AccessPointSettings>>>,
}

impl MockAccessPoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<AccessPointSettings> {
        self.active.borrow().clone()
    }
}

impl AccessPointLink for MockAccessPoint {
    fn create(&mut self, ap: &AccessPointSettings) -> bool {
        *self.active.borrow_mut() = Some(ap.clone());
        true
    }

    fn shutdown(&mut self) {
        *self.active.borrow_mut() = None;
    }
}

#[derive(Debug, Default)]
struct TransportState {
    session: Option<BrokerSession>,
    subscriptions: Vec<String>,
    published: Vec<(Message, bool)>,
    inbox: VecDeque<Incoming>,
    refuse_connect: bool,
}

/// Broker transport that keeps published messages and replays queued input.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        let t = Self::default();
        t.state.borrow_mut().refuse_connect = true;
        t
    }

    pub fn session(&self) -> Option<BrokerSession> {
        self.state.borrow().session.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Message> {
        self.state
            .borrow()
            .published
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn inject(&self, topic: &str, payload: &str) {
        self.state.borrow_mut().inbox.push_back(Incoming {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }
}

impl BrokerTransport for MockTransport {
    fn connect(&mut self, session: &BrokerSession) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.refuse_connect {
            anyhow::bail!("connection refused by {}:{}", session.host, session.port);
        }
        state.session = Some(session.clone());
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, message: &Message, retain: bool) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.session.is_none() {
            anyhow::bail!("not connected");
        }
        state.published.push((message.clone(), retain));
        Ok(())
    }

    fn poll(&mut self, _wait: Duration) -> Vec<Incoming> {
        self.state.borrow_mut().inbox.drain(..).collect()
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().session = None;
    }
}

// ---------------------------------------------------------------------------
// Configuration surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MockSurface {
    posts: Rc<RefCell<VecDeque<ConfigMap>>>,
    snapshots: Rc<RefCell<Vec<StationSnapshot>>>,
}

impl MockSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, config: ConfigMap) {
        self.posts.borrow_mut().push_back(config);
    }

    pub fn last_snapshot(&self) -> Option<StationSnapshot> {
        self.snapshots.borrow().last().cloned()
    }
}

impl ConfigSurface for MockSurface {
    fn poll_update(&mut self) -> Option<ConfigMap> {
        self.posts.borrow_mut().pop_front()
    }

    fn publish_snapshot(&mut self, snapshot: &StationSnapshot) {
        self.snapshots.borrow_mut().push(snapshot.clone());
    }
}
