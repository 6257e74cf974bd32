use tracing::info;

use crate::device::{Broadcasts, Device, FormDescriptor};
use crate::error::StoreError;
use crate::hal::{AccessPointLink, AccessPointSettings, NonVolatileStore};
use crate::message::{merge_string, ConfigMap};
use crate::store::{read_record, write_record, Record, RecordReader, RecordWriter};

const IP_WIDTH: usize = 17;

const FORM: &str = r#"
<form action="/config/ap" method="POST">
<label for="ssid">Access point name (ssid)</label>
<input type="text" id="ssid" name="ap/ssid" placeholder="ssid..." [value]="ap/ssid">
<label for="password">Access point password</label>
<input type="password" id="password" name="ap/password" placeholder="password...">
<label for="ip">Access point IP</label>
<input type="text" id="ip" name="ap/ip" placeholder="ip..." [value]="ap/ip">
<label for="gateway">Gateway</label>
<input type="text" id="gateway" name="ap/gateway" placeholder="gateway..." [value]="ap/gateway">
<label for="subnet">Subnet mask</label>
<input type="text" id="subnet" name="ap/subnet" placeholder="subnet..." [value]="ap/subnet">
<input type="submit" value="Submit">
</form>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftApConfig(pub AccessPointSettings);

impl Default for SoftApConfig {
    fn default() -> Self {
        Self(AccessPointSettings {
            ssid: "yahasoftap".into(),
            password: "yahaadmin".into(),
            ip: "192.168.4.2".into(),
            gateway: "192.168.4.4".into(),
            subnet: "255.255.255.0".into(),
        })
    }
}

impl Record for SoftApConfig {
    const LEN: usize = 32 + 32 + 3 * IP_WIDTH;

    fn encode(&self, w: &mut RecordWriter) {
        let ap = &self.0;
        w.str(&ap.ssid, 32);
        w.str(&ap.password, 32);
        w.str(&ap.ip, IP_WIDTH);
        w.str(&ap.gateway, IP_WIDTH);
        w.str(&ap.subnet, IP_WIDTH);
    }

    fn decode(r: &mut RecordReader<'_>) -> Self {
        Self(AccessPointSettings {
            ssid: r.str(32),
            password: r.str(32),
            ip: r.str(IP_WIDTH),
            gateway: r.str(IP_WIDTH),
            subnet: r.str(IP_WIDTH),
        })
    }
}

/// Configuration access point, up before any network join is attempted.
pub struct SoftAp {
    config: SoftApConfig,
    link: Box<dyn AccessPointLink>,
}

impl SoftAp {
    pub fn new(link: Box<dyn AccessPointLink>) -> Self {
        Self {
            config: SoftApConfig::default(),
            link,
        }
    }

    pub fn settings(&self) -> &AccessPointSettings {
        &self.config.0
    }
}

impl Device for SoftAp {
    fn name(&self) -> &str {
        "softap"
    }

    fn set_config(&mut self, config: &ConfigMap) {
        let ap = &mut self.config.0;
        merge_string(config, "ap/ssid", &mut ap.ssid, true);
        merge_string(config, "ap/password", &mut ap.password, true);
        merge_string(config, "ap/ip", &mut ap.ip, true);
        merge_string(config, "ap/gateway", &mut ap.gateway, false);
        merge_string(config, "ap/subnet", &mut ap.subnet, false);
    }

    fn get_config(&mut self) -> ConfigMap {
        let ap = &self.config.0;
        ConfigMap::from([
            ("ap/ssid".into(), ap.ssid.clone()),
            ("ap/ip".into(), ap.ip.clone()),
            ("ap/gateway".into(), ap.gateway.clone()),
            ("ap/subnet".into(), ap.subnet.clone()),
        ])
    }

    fn store_len(&self) -> usize {
        SoftApConfig::LEN
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
        self.config = SoftApConfig::default();
    }

    fn setup(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        let ap = &self.config.0;
        if !self.link.create(ap) {
            anyhow::bail!("failed to create access point '{}'", ap.ssid);
        }
        info!(ssid = %ap.ssid, ip = %ap.ip, "access point up");
        Ok(())
    }

    fn shutdown(&mut self, _bus: &mut Broadcasts) -> anyhow::Result<()> {
        self.link.shutdown();
        Ok(())
    }

    fn form(&self) -> Option<FormDescriptor> {
        Some(FormDescriptor::new("ap", "Access point", FORM))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryStore, MockAccessPoint};

    #[test]
    fn setup_creates_factory_access_point() {
        let link = MockAccessPoint::new();
        let mut ap = SoftAp::new(Box::new(link.clone()));
        ap.setup(&mut Broadcasts::default()).unwrap();
        let active = link.active().unwrap();
        assert_eq!(active.ssid, "yahasoftap");
        assert_eq!(active.ip, "192.168.4.2");

        ap.shutdown(&mut Broadcasts::default()).unwrap();
        assert!(link.active().is_none());
    }

    #[test]
    fn empty_ssid_password_and_ip_are_ignored() {
        let mut ap = SoftAp::new(Box::new(MockAccessPoint::new()));
        ap.set_config(&ConfigMap::from([
            ("ap/ssid".into(), "".into()),
            ("ap/password".into(), "".into()),
            ("ap/ip".into(), "".into()),
            ("ap/gateway".into(), "10.0.0.1".into()),
        ]));
        assert_eq!(ap.settings().ssid, "yahasoftap");
        assert_eq!(ap.settings().password, "yahaadmin");
        assert_eq!(ap.settings().ip, "192.168.4.2");
        assert_eq!(ap.settings().gateway, "10.0.0.1");
    }

    #[test]
    fn password_is_not_exposed() {
        let mut ap = SoftAp::new(Box::new(MockAccessPoint::new()));
        assert!(!ap.get_config().contains_key("ap/password"));
    }

    #[test]
    fn record_is_byte_identical_after_round_trip() {
        let ap = SoftAp::new(Box::new(MockAccessPoint::new()));
        let mut store = MemoryStore::new(128);
        let next = ap.write_to_store(&mut store, 1).unwrap();
        assert_eq!(next, 1 + SoftApConfig::LEN);
        let written = store.bytes()[1..next].to_vec();

        let mut back = SoftAp::new(Box::new(MockAccessPoint::new()));
        back.clear();
        back.read_from_store(&store, 1).unwrap();
        back.write_to_store(&mut store, 1).unwrap();
        assert_eq!(store.bytes()[1..next].to_vec(), written);
    }
}
