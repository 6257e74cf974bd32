//! Ordered device collection and the lifecycle that drives it.
//!
//! Registration order is the store layout: device *n*'s record starts where
//! device *n-1*'s ends. The order must therefore be identical on every boot,
//! and a device is never removed, only marked inert.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::device::{Broadcasts, Broker, Device, FormDescriptor, Priority, SleepPolicy};
use crate::error::{LayoutError, StoreError};
use crate::hal::NonVolatileStore;
use crate::message::{ConfigMap, Message};
use crate::store::{self, HEADER_LEN};

struct Entry {
    device: Box<dyn Device>,
    priority: Priority,
    /// Set when setup failed; run and messaging are skipped for the session.
    inert: bool,
}

/// Result of reading the store at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
    Stored,
    /// Fresh or stale store: every device was cleared to factory settings.
    FactoryDefaults,
}

pub struct Registry {
    entries: Vec<Entry>,
    store: Box<dyn NonVolatileStore>,
    layout_end: usize,
    bus: Broadcasts,
}

// ---------------------------------------------------------------------------
// Registration & persistence
// ---------------------------------------------------------------------------

impl Registry {
    pub fn new(store: Box<dyn NonVolatileStore>) -> Self {
        Self {
            entries: Vec::new(),
            store,
            layout_end: HEADER_LEN,
            bus: Broadcasts::default(),
        }
    }

    /// Append a device. Rejected if its record would not fit in the store.
    pub fn register(
        &mut self,
        device: Box<dyn Device>,
        priority: Priority,
    ) -> Result<(), LayoutError> {
        let end = self.layout_end + device.store_len();
        if end > self.store.capacity() {
            return Err(LayoutError::Overflow {
                device: device.name().to_string(),
                end,
                capacity: self.store.capacity(),
            });
        }
        debug!(
            device = device.name(),
            offset = self.layout_end,
            len = device.store_len(),
            "device registered"
        );
        self.layout_end = end;
        self.entries.push(Entry {
            device,
            priority,
            inert: false,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// End of the last record, i.e. bytes of store in use.
    pub fn layout_end(&self) -> usize {
        self.layout_end
    }

    pub fn is_inert(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.inert && e.device.name() == name)
    }

    /// Write every record in order. Returns the offset after each device.
    pub fn write_pass(&mut self) -> Result<Vec<usize>, StoreError> {
        let mut offset = store::write_header(self.store.as_mut())?;
        let mut offsets = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            offset = e.device.write_to_store(self.store.as_mut(), offset)?;
            offsets.push(offset);
        }
        Ok(offsets)
    }

    /// Read every record in order. Returns the offset after each device.
    pub fn read_pass(&mut self) -> Result<Vec<usize>, StoreError> {
        let mut offset = HEADER_LEN;
        let mut offsets = Vec::with_capacity(self.entries.len());
        for e in &mut self.entries {
            offset = e.device.read_from_store(self.store.as_ref(), offset)?;
            offsets.push(offset);
        }
        Ok(offsets)
    }

    /// Load persisted configuration, falling back to factory settings when
    /// the layout version or any device sentinel does not match.
    pub fn restore(&mut self) -> Result<Restore, StoreError> {
        if store::header_matches(self.store.as_ref())? {
            self.read_pass()?;
            let invalid = self.invalid_records();
            if invalid.is_empty() {
                info!(bytes = self.layout_end, "configuration restored");
                return Ok(Restore::Stored);
            }
            warn!(
                ?invalid,
                "stored configuration has no valid sentinel, every device is reset"
            );
        } else {
            info!("store layout unknown, first boot with this firmware");
        }
        for e in &mut self.entries {
            e.device.clear();
        }
        Ok(Restore::FactoryDefaults)
    }

    /// Devices whose last read record failed its sentinel check.
    pub fn invalid_records(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.device.record_is_valid())
            .map(|e| e.device.name().to_string())
            .collect()
    }

    /// Write all records and commit.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        let offsets = self.write_pass()?;
        self.store.commit()?;
        info!(
            bytes = offsets.last().copied().unwrap_or(HEADER_LEN),
            "configuration persisted"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl Registry {
    /// Deliver `key`/`value` to every device.
    pub fn broadcast(&mut self, key: &str, value: &str) {
        debug!(key, value, "broadcast");
        for e in &mut self.entries {
            e.device.handle_broadcast(key, value);
        }
    }

    /// Fan out whatever the last hook queued; returns what was delivered.
    fn dispatch(&mut self) -> Vec<(String, String)> {
        let queued = self.bus.drain();
        for (k, v) in &queued {
            self.broadcast(k, v);
        }
        queued
    }

    /// Set up `BeforeNetwork` devices first, then the rest, each group in
    /// registration order. Failing devices become inert.
    pub fn setup_all(&mut self) -> Vec<(String, String)> {
        let mut delivered = Vec::new();
        for priority in [Priority::BeforeNetwork, Priority::Normal] {
            for i in 0..self.entries.len() {
                if self.entries[i].priority != priority {
                    continue;
                }
                let entry = &mut self.entries[i];
                let name = entry.device.name().to_string();
                match entry.device.setup(&mut self.bus) {
                    Ok(()) if entry.device.is_valid() => {
                        debug!(device = %name, "setup done");
                    }
                    Ok(()) => {
                        warn!(device = %name, "hardware not detected, device inert");
                        entry.inert = true;
                    }
                    Err(e) => {
                        error!(device = %name, "setup failed, device inert: {e:#}");
                        entry.inert = true;
                    }
                }
                delivered.extend(self.dispatch());
            }
        }
        delivered
    }

    pub fn run_all(&mut self) -> Vec<(String, String)> {
        let mut delivered = Vec::new();
        for i in 0..self.entries.len() {
            let entry = &mut self.entries[i];
            if entry.inert || !entry.device.is_valid() {
                continue;
            }
            if let Err(e) = entry.device.run(&mut self.bus) {
                error!(device = entry.device.name(), "run failed: {e:#}");
            }
            delivered.extend(self.dispatch());
        }
        delivered
    }

    pub fn shutdown_all(&mut self) -> Vec<(String, String)> {
        let mut delivered = Vec::new();
        for i in 0..self.entries.len() {
            let entry = &mut self.entries[i];
            if let Err(e) = entry.device.shutdown(&mut self.bus) {
                error!(device = entry.device.name(), "shutdown failed: {e:#}");
            }
            delivered.extend(self.dispatch());
        }
        delivered
    }

    pub fn collect_messages(&mut self, base_topic: &str) -> Vec<Message> {
        self.entries
            .iter_mut()
            .filter(|e| !e.inert && e.device.is_valid())
            .flat_map(|e| e.device.outgoing_messages(base_topic))
            .collect()
    }

    pub fn broker(&mut self) -> Option<&mut dyn Broker> {
        self.entries
            .iter_mut()
            .filter(|e| !e.inert)
            .find_map(|e| e.device.as_broker())
    }

    pub fn is_online(&mut self) -> bool {
        self.broker().is_some_and(|b| b.is_online())
    }

    /// Publish every device's messages plus `extra(base_topic)`.
    /// Returns the number of messages handed to the broker; zero when offline.
    pub fn publish_cycle(&mut self, extra: impl FnOnce(&str) -> Vec<Message>) -> usize {
        let base = match self.broker() {
            Some(b) if b.is_online() => b.base_topic(),
            _ => {
                info!("no network, skipping publish");
                return 0;
            }
        };
        let mut messages = self.collect_messages(&base);
        messages.extend(extra(&base));
        if let Some(broker) = self.broker() {
            broker.publish(&messages);
        }
        messages.len()
    }

    pub fn poll_broker_config(&mut self, wait: Duration) -> Option<ConfigMap> {
        self.broker().and_then(|b| b.poll_config(wait))
    }

    pub fn merged_config(&mut self) -> ConfigMap {
        let mut merged = ConfigMap::new();
        for e in &mut self.entries {
            merged.extend(e.device.get_config());
        }
        merged
    }

    /// Hand `config` to every device, broadcast the values that changed and
    /// persist. Returns the changed keys.
    pub fn apply_config(&mut self, config: &ConfigMap) -> Result<Vec<String>, StoreError> {
        let before = self.merged_config();
        for e in &mut self.entries {
            e.device.set_config(config);
        }
        let after = self.merged_config();

        let changed: Vec<String> = config
            .keys()
            .filter(|k| after.contains_key(*k) && before.get(*k) != after.get(*k))
            .cloned()
            .collect();
        for key in &changed {
            let value = after[key].clone();
            self.broadcast(key, &value);
        }
        info!(keys = config.len(), changed = changed.len(), "configuration applied");
        self.persist()?;
        Ok(changed)
    }

    pub fn sleep_policy(&self) -> Option<SleepPolicy> {
        self.entries.iter().find_map(|e| e.device.sleep_policy())
    }

    pub fn forms(&self) -> Vec<FormDescriptor> {
        self.entries.iter().filter_map(|e| e.device.form()).collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
