use tracing::{info, warn};

use crate::device::{Broadcasts, Device, FormDescriptor};
use crate::error::StoreError;
use crate::hal::{NonVolatileStore, StationLink};
use crate::message::{merge_string, ConfigMap};
use crate::store::{read_record, write_record, Record, RecordReader, RecordWriter};

/// Marks a credential record that was written by a configuration post.
pub const WLAN_UUID: &str = "11896e60-6f3a-46ef-b718-839df2380de5";
pub const KEY_CONNECTED: &str = "wlan/connected";
const KEY_SSID: &str = "wlan/ssid";
const KEY_PASSWORD: &str = "wlan/password";
const KEY_IP: &str = "wlan/ip";

/// Polls of the link before giving up on a connection.
pub const MAX_TRIES: u8 = 50;

const FORM: &str = r#"
<form action="/config/wlan" method="POST">
<label for="ssid">WLAN name (ssid)</label>
<input type="text" id="ssid" name="wlan/ssid" placeholder="ssid..." [value]="wlan/ssid">
<label for="password">WLAN password</label>
<input type="password" id="password" name="wlan/password" placeholder="password...">
<label for="ip">Station address</label>
<input type="text" id="ip" readonly [value]="wlan/ip">
<input type="submit" value="Submit">
</form>
"#;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WlanConfig {
    pub uuid: String,
    pub ssid: String,
    pub password: String,
}

impl Record for WlanConfig {
    const LEN: usize = 38 + 32 + 32;

    fn encode(&self, w: &mut RecordWriter) {
        w.str(&self.uuid, 38);
        w.str(&self.ssid, 32);
        w.str(&self.password, 32);
    }

    fn decode(r: &mut RecordReader<'_>) -> Self {
        Self {
            uuid: r.str(38),
            ssid: r.str(32),
            password: r.str(32),
        }
    }
}

impl WlanConfig {
    pub fn is_initialized(&self) -> bool {
        self.uuid == WLAN_UUID
    }
}

/// WiFi station credentials and connection.
pub struct Wlan {
    config: WlanConfig,
    link: Box<dyn StationLink>,
}

impl Wlan {
    pub fn new(link: Box<dyn StationLink>) -> Self {
        Self {
            config: WlanConfig::default(),
            link,
        }
    }

    pub fn config(&self) -> &WlanConfig {
        &self.config
    }
}

impl Device for Wlan {
    fn name(&self) -> &str {
        "wlan"
    }

    fn set_config(&mut self, config: &ConfigMap) {
        if merge_string(config, KEY_SSID, &mut self.config.ssid, false) {
            self.config.uuid = WLAN_UUID.to_string();
        }
        merge_string(config, KEY_PASSWORD, &mut self.config.password, true);
    }

    fn get_config(&mut self) -> ConfigMap {
        ConfigMap::from([
            (KEY_SSID.into(), self.config.ssid.clone()),
            (KEY_IP.into(), self.link.local_ip()),
        ])
    }

    fn store_len(&self) -> usize {
        WlanConfig::LEN
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
        self.config = WlanConfig::default();
    }

    fn record_is_valid(&self) -> bool {
        self.config.is_initialized()
    }

    fn setup(&mut self, bus: &mut Broadcasts) -> anyhow::Result<()> {
        let connected = if self.config.ssid.is_empty() {
            warn!("no WLAN configured, configure via the access point");
            false
        } else if self
            .link
            .connect(&self.config.ssid, &self.config.password, MAX_TRIES)
        {
            info!(ssid = %self.config.ssid, ip = %self.link.local_ip(), "WLAN connected");
            true
        } else {
            warn!(ssid = %self.config.ssid, tries = MAX_TRIES, "WLAN connection failed");
            false
        };
        bus.send(KEY_CONNECTED, u8::from(connected));
        Ok(())
    }

    fn shutdown(&mut self, bus: &mut Broadcasts) -> anyhow::Result<()> {
        if self.link.is_connected() {
            self.link.disconnect();
            info!("WLAN disconnected");
            bus.send(KEY_CONNECTED, 0);
        }
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("wlan", "WLAN", FORM))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryStore, MockStationLink};

    fn post(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn posting_ssid_stamps_the_sentinel() {
        let mut w = Wlan::new(Box::new(MockStationLink::open()));
        assert!(!w.record_is_valid());
        w.set_config(&post(&[(KEY_SSID, "garden"), (KEY_PASSWORD, "pw")]));
        assert!(w.record_is_valid());
        assert_eq!(w.config().uuid, WLAN_UUID);
    }

    #[test]
    fn blank_password_keeps_the_stored_one() {
        let mut w = Wlan::new(Box::new(MockStationLink::open()));
        w.set_config(&post(&[(KEY_SSID, "garden"), (KEY_PASSWORD, "pw")]));
        w.set_config(&post(&[(KEY_SSID, "garden"), (KEY_PASSWORD, "")]));
        assert_eq!(w.config().password, "pw");
        assert!(!w.get_config().contains_key(KEY_PASSWORD));
    }

    #[test]
    fn setup_broadcasts_connection_state() {
        let mut w = Wlan::new(Box::new(MockStationLink::reaching("garden")));
        w.set_config(&post(&[(KEY_SSID, "garden")]));
        let mut bus = Broadcasts::default();
        w.setup(&mut bus).unwrap();
        assert_eq!(bus.drain(), vec![(KEY_CONNECTED.to_string(), "1".to_string())]);
        assert_eq!(w.get_config()[KEY_IP], "192.168.1.50");

        w.shutdown(&mut bus).unwrap();
        assert_eq!(bus.drain(), vec![(KEY_CONNECTED.to_string(), "0".to_string())]);
    }

    #[test]
    fn unconfigured_station_stays_offline() {
        let mut w = Wlan::new(Box::new(MockStationLink::open()));
        let mut bus = Broadcasts::default();
        w.setup(&mut bus).unwrap();
        assert_eq!(bus.drain(), vec![(KEY_CONNECTED.to_string(), "0".to_string())]);
    }

    #[test]
    fn fresh_flash_has_no_sentinel() {
        let store = MemoryStore::new(128);
        let mut w = Wlan::new(Box::new(MockStationLink::open()));
        w.read_from_store(&store, 1).unwrap();
        assert!(!w.record_is_valid());
    }

    #[test]
    fn credentials_survive_store() {
        let mut w = Wlan::new(Box::new(MockStationLink::open()));
        w.set_config(&post(&[(KEY_SSID, "garden"), (KEY_PASSWORD, "secret")]));
        let mut store = MemoryStore::new(128);
        let next = w.write_to_store(&mut store, 1).unwrap();
        assert_eq!(next, 1 + WlanConfig::LEN);

        let mut fresh = Wlan::new(Box::new(MockStationLink::open()));
        fresh.read_from_store(&store, 1).unwrap();
        assert!(fresh.record_is_valid());
        assert_eq!(fresh.config(), w.config());
    }
}
