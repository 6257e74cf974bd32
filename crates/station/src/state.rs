use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use yaha_core::hal::StationSnapshot;
use yaha_core::{ConfigMap, FormDescriptor};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub name: String,
    pub started_at: Instant,
    pub boots: u32,
    pub awake: bool,
    pub last_outcome: Option<String>,
    pub snapshot: StationSnapshot,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Boot,
    Sleep,
    Config,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub uptime_secs: u64,
    pub boots: u32,
    pub awake: bool,
    pub last_outcome: Option<String>,
    pub wakeup_count: u16,
    pub start_type: &'static str,
    pub online: bool,
    pub pages: Vec<PageLink>,
    pub events: Vec<SystemEvent>,
}

#[derive(Serialize)]
pub struct PageLink {
    pub route: &'static str,
    pub label: &'static str,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started_at: Instant::now(),
            boots: 0,
            awake: false,
            last_outcome: None,
            snapshot: StationSnapshot::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a firmware boot and how the wake-cycle register classified it.
    pub fn record_boot(&mut self, start_type: &str, wakeup_count: u16) {
        self.boots += 1;
        self.awake = true;
        let detail = format!(
            "boot #{} ({start_type}), wakeup count {wakeup_count}",
            self.boots
        );
        self.push_event(EventKind::Boot, detail);
    }

    /// Record the station going into deep sleep.
    pub fn record_sleep(&mut self, requested: Duration, actual: Duration) {
        self.awake = false;
        let outcome = format!("sleep {}s", requested.as_secs());
        self.push_event(
            EventKind::Sleep,
            format!("{outcome} (host {:.1}s)", actual.as_secs_f32()),
        );
        self.last_outcome = Some(outcome);
    }

    /// Record a boot that stopped without sleeping.
    pub fn record_halt(&mut self, cycles: u32) {
        self.awake = false;
        let outcome = format!("halted after {cycles} cycle(s)");
        self.push_event(EventKind::System, outcome.clone());
        self.last_outcome = Some(outcome);
    }

    /// Record a configuration post queued for the firmware.
    pub fn record_post(&mut self, page: &str, config: &ConfigMap) {
        let keys = config.keys().cloned().collect::<Vec<_>>().join(", ");
        self.push_event(EventKind::Config, format!("{page}: {keys}"));
    }

    /// Replace the latest firmware snapshot.
    pub fn record_snapshot(&mut self, snapshot: StationSnapshot) {
        self.snapshot = snapshot;
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn form(&self, route: &str) -> Option<&FormDescriptor> {
        self.snapshot.forms.iter().find(|f| f.route == route)
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            name: self.name.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            boots: self.boots,
            awake: self.awake,
            last_outcome: self.last_outcome.clone(),
            wakeup_count: self.snapshot.wakeup_count,
            start_type: if self.snapshot.fast_reset {
                "fastReset"
            } else {
                "normal"
            },
            online: self.snapshot.online,
            pages: self
                .snapshot
                .forms
                .iter()
                .map(|f| PageLink {
                    route: f.route,
                    label: f.menu_label,
                })
                .collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StationSnapshot {
        StationSnapshot {
            config: ConfigMap::from([("broker/host".into(), "10.0.0.2".into())]),
            forms: vec![FormDescriptor::new("broker", "Broker", "<form></form>")],
            wakeup_count: 7,
            fast_reset: true,
            online: true,
        }
    }

    #[test]
    fn boot_and_sleep_update_counters() {
        let mut st = SystemState::new("garden");
        st.record_boot("normal", 3);
        assert!(st.awake);
        st.record_sleep(Duration::from_secs(900), Duration::from_secs(9));
        let status = st.to_status();
        assert_eq!(status.boots, 1);
        assert!(!status.awake);
        assert_eq!(status.last_outcome.as_deref(), Some("sleep 900s"));
        assert_eq!(status.events.len(), 2);
        // newest first
        assert_eq!(status.events[0].kind, EventKind::Sleep);
    }

    #[test]
    fn status_reflects_snapshot() {
        let mut st = SystemState::new("garden");
        st.record_snapshot(snapshot());
        let status = st.to_status();
        assert_eq!(status.wakeup_count, 7);
        assert_eq!(status.start_type, "fastReset");
        assert!(status.online);
        assert_eq!(status.pages.len(), 1);
        assert_eq!(status.pages[0].route, "broker");
        assert!(st.form("broker").is_some());
        assert!(st.form("wlan").is_none());
    }

    #[test]
    fn event_ring_buffer_is_bounded() {
        let mut st = SystemState::new("garden");
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn post_lists_keys() {
        let mut st = SystemState::new("garden");
        let cfg = ConfigMap::from([
            ("wlan/ssid".into(), "home".into()),
            ("wlan/password".into(), "secret".into()),
        ]);
        st.record_post("wlan", &cfg);
        let ev = st.events.back().unwrap();
        assert_eq!(ev.kind, EventKind::Config);
        assert_eq!(ev.detail, "wlan: wlan/password, wlan/ssid");
    }

    #[test]
    fn status_serializes_event_timestamps_as_rfc3339() {
        let mut st = SystemState::new("garden");
        st.record_halt(4);
        let json = serde_json::to_value(st.to_status()).unwrap();
        let ts = json["events"][0]["ts"].as_str().unwrap();
        assert!(ts.contains('T'), "not rfc3339: {ts}");
        assert_eq!(json["events"][0]["kind"], "system");
        assert_eq!(json["last_outcome"], "halted after 4 cycle(s)");
    }
}
