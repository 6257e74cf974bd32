//! Host stand-ins for the radio and sensors a Linux box does not have.
//!
//! The station joins "WiFi" when the config says it is online and brings up
//! an access point that only exists in the log.

use yaha_core::hal::{AccessPointLink, AccessPointSettings, ClimateSensor, StationLink};

#[cfg(all(not(feature = "adc"), not(feature = "sim")))]
use yaha_core::hal::AnalogInput;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// WiFi station backed by the host's own network.
pub struct HostLink {
    online: bool,
    connected: bool,
}

impl HostLink {
    pub fn new(online: bool) -> Self {
        Self {
            online,
            connected: false,
        }
    }
}

impl StationLink for HostLink {
    fn connect(&mut self, ssid: &str, _password: &str, _max_tries: u8) -> bool {
        self.connected = self.online && !ssid.is_empty();
        tracing::info!(ssid, connected = self.connected, "[host-link] join");
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn local_ip(&self) -> String {
        let ip = if self.connected { "127.0.0.1" } else { "0.0.0.0" };
        ip.to_string()
    }
}

/// Access point that is only logged.
#[derive(Default)]
pub struct LoggedAccessPoint {
    ssid: Option<String>,
}

impl AccessPointLink for LoggedAccessPoint {
    fn create(&mut self, ap: &AccessPointSettings) -> bool {
        tracing::info!(ssid = %ap.ssid, ip = %ap.ip, "[host-link] access point up");
        self.ssid = Some(ap.ssid.clone());
        true
    }

    fn shutdown(&mut self) {
        if let Some(ssid) = self.ssid.take() {
            tracing::info!(%ssid, "[host-link] access point down");
        }
    }
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// No weather sensor on the bus.
pub struct NoClimate;

impl ClimateSensor for NoClimate {
    fn probe(&mut self) -> bool {
        false
    }

    fn temperature(&mut self) -> anyhow::Result<f32> {
        anyhow::bail!("no climate sensor")
    }

    fn humidity(&mut self) -> anyhow::Result<f32> {
        anyhow::bail!("no climate sensor")
    }

    fn pressure(&mut self) -> anyhow::Result<f32> {
        anyhow::bail!("no climate sensor")
    }
}

/// Battery divider that always reads the same value.
#[cfg(all(not(feature = "adc"), not(feature = "sim")))]
pub struct FixedAnalog(pub u16);

#[cfg(all(not(feature = "adc"), not(feature = "sim")))]
impl AnalogInput for FixedAnalog {
    fn read_raw(&mut self) -> anyhow::Result<u16> {
        Ok(self.0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
