use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::device::{Broadcasts, Broker, Device, FormDescriptor};
use crate::error::StoreError;
use crate::hal::{BrokerSession, BrokerTransport, Incoming, NonVolatileStore};
use crate::message::{merge_string, ConfigMap, Message};
use crate::store::{read_record, write_record, Record, RecordReader, RecordWriter};

use super::wlan::KEY_CONNECTED;

const KEY_HOST: &str = "broker/host";
const KEY_PORT: &str = "broker/port";
const KEY_CLIENT: &str = "broker/clientName";
const KEY_BASE_TOPIC: &str = "broker/baseTopic";
const KEY_SUBSCRIBE_TO: &str = "broker/subscribeTo";

const FORM: &str = r#"
<form action="/config/broker" method="POST">
<label for="host">Broker host</label>
<input type="text" id="host" name="broker/host" [value]="broker/host">
<label for="port">Broker port</label>
<input type="text" id="port" name="broker/port" [value]="broker/port">
<label for="client">Client name</label>
<input type="text" id="client" name="broker/clientName" [value]="broker/clientName">
<label for="base">Base topic</label>
<input type="text" id="base" name="broker/baseTopic" [value]="broker/baseTopic">
<label for="subscribe">Subscribe to</label>
<input type="text" id="subscribe" name="broker/subscribeTo" [value]="broker/subscribeTo">
<input type="submit" value="Submit">
</form>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    /// Kept as text, validated when connecting.
    pub port: String,
    pub client_name: String,
    pub base_topic: String,
    pub subscribe_to: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.1".into(),
            port: "8183".into(),
            client_name: "ESP2688/Weather/Station".into(),
            base_topic: "outdoor/garden/main/weather".into(),
            subscribe_to: "$SYS/ESP8266/weather".into(),
        }
    }
}

impl Record for BrokerConfig {
    const LEN: usize = 32 + 8 + 24 + 64 + 64;

    fn encode(&self, w: &mut RecordWriter) {
        w.str(&self.host, 32);
        w.str(&self.port, 8);
        w.str(&self.client_name, 24);
        w.str(&self.base_topic, 64);
        w.str(&self.subscribe_to, 64);
    }

    fn decode(r: &mut RecordReader<'_>) -> Self {
        Self {
            host: r.str(32),
            port: r.str(8),
            client_name: r.str(24),
            base_topic: r.str(64),
            subscribe_to: r.str(64),
        }
    }
}

impl BrokerConfig {
    pub fn session(&self) -> anyhow::Result<BrokerSession> {
        let port = self
            .port
            .trim()
            .parse()
            .with_context(|| format!("invalid broker port '{}'", self.port))?;
        Ok(BrokerSession {
            host: self.host.clone(),
            port,
            client_id: self.client_name.clone(),
        })
    }

    /// Config key addressed by `topic` below the subscription, if any.
    fn key_for(&self, topic: &str) -> Option<String> {
        let prefix = self
            .subscribe_to
            .trim_end_matches('#')
            .trim_end_matches('/');
        let key = topic.strip_prefix(prefix)?.trim_start_matches('/');
        (!key.is_empty()).then(|| key.to_string())
    }
}

/// Parse one incoming publish into config entries.
///
/// A JSON object is a flat config map. Anything else is the value of the
/// key named by the topic suffix.
pub fn parse_incoming(config: &BrokerConfig, incoming: &Incoming) -> Option<ConfigMap> {
    let text = match std::str::from_utf8(&incoming.payload) {
        Ok(t) => t.trim(),
        Err(_) => {
            warn!(topic = %incoming.topic, "ignoring non-UTF-8 payload");
            return None;
        }
    };
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) {
        let map = obj
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect();
        return Some(map);
    }
    match config.key_for(&incoming.topic) {
        Some(key) => Some(ConfigMap::from([(key, text.to_string())])),
        None => {
            warn!(topic = %incoming.topic, "ignoring payload without config key");
            None
        }
    }
}

/// Connection to the yaha broker and the station's publisher.
pub struct BrokerProxy {
    config: BrokerConfig,
    transport: Box<dyn BrokerTransport>,
    network_up: bool,
    online: bool,
}

impl BrokerProxy {
    pub fn new(transport: Box<dyn BrokerTransport>) -> Self {
        Self {
            config: BrokerConfig::default(),
            transport,
            network_up: false,
            online: false,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

impl Device for BrokerProxy {
    fn name(&self) -> &str {
        "broker"
    }

    fn set_config(&mut self, config: &ConfigMap) {
        let c = &mut self.config;
        merge_string(config, KEY_HOST, &mut c.host, false);
        merge_string(config, KEY_PORT, &mut c.port, false);
        merge_string(config, KEY_CLIENT, &mut c.client_name, false);
        merge_string(config, KEY_BASE_TOPIC, &mut c.base_topic, false);
        merge_string(config, KEY_SUBSCRIBE_TO, &mut c.subscribe_to, false);
    }

    fn get_config(&mut self) -> ConfigMap {
        let c = &self.config;
        ConfigMap::from([
            (KEY_HOST.into(), c.host.clone()),
            (KEY_PORT.into(), c.port.clone()),
            (KEY_CLIENT.into(), c.client_name.clone()),
            (KEY_BASE_TOPIC.into(), c.base_topic.clone()),
            (KEY_SUBSCRIBE_TO.into(), c.subscribe_to.clone()),
        ])
    }

    fn store_len(&self) -> usize {
        BrokerConfig::LEN
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
        self.config = BrokerConfig::default();
    }

    fn handle_broadcast(&mut self, key: &str, value: &str) {
        if key == KEY_CONNECTED {
            self.network_up = value == "1";
        }
    }

    fn setup(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if !self.network_up {
            info!("no network, broker stays offline");
            return Ok(());
        }
        let session = self.config.session()?;
        self.transport
            .connect(&session)
            .with_context(|| format!("connect to {}:{}", session.host, session.port))?;
        if !self.config.subscribe_to.is_empty() {
            self.transport
                .subscribe(&self.config.subscribe_to)
                .context("subscribe")?;
        }
        self.online = true;
        info!(
            host = %session.host,
            port = session.port,
            client = %session.client_id,
            "broker connected"
        );
        Ok(())
    }

    fn shutdown(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        if self.online {
            self.transport.disconnect();
            self.online = false;
            info!("broker disconnected");
        }
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("broker", "Broker", FORM))
    }

    fn as_broker(&mut self) -> Option<&mut dyn Broker> {
        Some(self)
    }
}

impl Broker for BrokerProxy {
    fn is_online(&self) -> bool {
        self.online
    }

    fn base_topic(&self) -> String {
        self.config.base_topic.clone()
    }

    fn publish(&mut self, messages: &[Message]) {
        for m in messages {
            match self.transport.publish(m, false) {
                Ok(()) => debug!(topic = %m.topic, value = %m.value, "published"),
                Err(e) => error!(topic = %m.topic, "publish failed: {e:#}"),
            }
        }
    }

    fn poll_config(&mut self, wait: Duration) -> Option<ConfigMap> {
        if !self.online {
            return None;
        }
        let mut merged = ConfigMap::new();
        for incoming in self.transport.poll(wait) {
            if let Some(map) = parse_incoming(&self.config, &incoming) {
                merged.extend(map);
            }
        }
        (!merged.is_empty()).then_some(merged)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
