//! The capability interface shared by every sensor, actuator and
//! configuration holder.

use std::borrow::Cow;
use std::time::Duration;

use serde::Serialize;

use crate::error::StoreError;
use crate::hal::NonVolatileStore;
use crate::message::{ConfigMap, Message};

/// Setup ordering. `BeforeNetwork` devices (the soft access point) run their
/// setup before anything tries to join a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    BeforeNetwork,
    Normal,
}

/// Web form shown by the configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormDescriptor {
    /// HTML with `[value]="key"` / `[checked]="key"` placeholders.
    pub markup: Cow<'static, str>,
    /// Page name, served under `/config/<route>`.
    pub route: &'static str,
    pub menu_label: &'static str,
}

impl FormDescriptor {
    pub fn new(route: &'static str, menu_label: &'static str, markup: &'static str) -> Self {
        Self {
            markup: Cow::Borrowed(markup),
            route,
            menu_label,
        }
    }
}

/// Sleep preferences of the power-management device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPolicy {
    pub battery_mode: bool,
    /// Set when the device wants the station awake for this session.
    pub hold_awake: bool,
    pub sleep_for: Duration,
}

/// Outbox for the global broadcast channel.
///
/// Hooks queue `(key, value)` pairs; the registry delivers them to every
/// device once the hook returns.
#[derive(Debug, Default)]
pub struct Broadcasts {
    queue: Vec<(String, String)>,
}

impl Broadcasts {
    pub fn send(&mut self, key: impl Into<String>, value: impl ToString) {
        self.queue.push((key.into(), value.to_string()));
    }

    pub fn drain(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Publisher capability, implemented by the broker proxy.
pub trait Broker {
    fn is_online(&self) -> bool;
    fn base_topic(&self) -> String;
    /// Best effort; failures are logged by the implementation.
    fn publish(&mut self, messages: &[Message]);
    /// Configuration received on the subscribed topic within `wait`.
    fn poll_config(&mut self, wait: Duration) -> Option<ConfigMap>;
}

/// Every method has a no-op default so a device implements only what it has.
pub trait Device {
    fn name(&self) -> &str;

    fn set_config(&mut self, _config: &ConfigMap) {}

    fn get_config(&mut self) -> ConfigMap {
        ConfigMap::new()
    }

    /// Bytes this device occupies in the store.
    fn store_len(&self) -> usize {
        0
    }

    fn write_to_store(
        &self,
        _store: &mut dyn NonVolatileStore,
        offset: usize,
    ) -> Result<usize, StoreError> {
        Ok(offset)
    }

    fn read_from_store(
        &mut self,
        _store: &dyn NonVolatileStore,
        offset: usize,
    ) -> Result<usize, StoreError> {
        Ok(offset)
    }

    /// Restore factory settings.
    fn clear(&mut self) {}

    /// False when the restored record lacks its "has been configured" sentinel.
    fn record_is_valid(&self) -> bool {
        true
    }

    /// Recomputed on every call.
    fn outgoing_messages(&mut self, _base_topic: &str) -> Vec<Message> {
        Vec::new()
    }

    fn handle_broadcast(&mut self, _key: &str, _value: &str) {}

    /// False when the backing hardware was not found.
    fn is_valid(&self) -> bool {
        true
    }

    fn setup(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        Ok(())
    }

    fn run(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        None
    }

    fn sleep_policy(&self) -> Option<SleepPolicy> {
        None
    }

    fn as_broker(&mut self) -> Option<&mut dyn Broker> {
        None
    }
}
