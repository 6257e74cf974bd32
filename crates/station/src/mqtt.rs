//! Broker transport over rumqttc's blocking client.
//!
//! The synchronous `Connection` only makes progress while it is iterated, so
//! queued publishes go out during `poll` and are flushed on `disconnect`.

use anyhow::{bail, Context};
use rumqttc::{
    Client, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS,
    RecvTimeoutError,
};
use std::time::{Duration, Instant};

use yaha_core::hal::{BrokerSession, BrokerTransport, Incoming};
use yaha_core::Message;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 20;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

pub(crate) fn mqtt_options(session: &BrokerSession) -> MqttOptions {
    let mut opts = MqttOptions::new(&session.client_id, &session.host, session.port);
    opts.set_keep_alive(KEEP_ALIVE);
    opts
}

/// Incoming publish carried by `event`, if any.
pub(crate) fn incoming_from(event: &Event) -> Option<Incoming> {
    match event {
        Event::Incoming(Packet::Publish(p)) => Some(Incoming {
            topic: p.topic.clone(),
            payload: p.payload.to_vec(),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct Session {
    client: Client,
    connection: Connection,
}

#[derive(Default)]
pub struct MqttTransport {
    session: Option<Session>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&mut self) -> anyhow::Result<&mut Session> {
        match self.session.as_mut() {
            Some(s) => Ok(s),
            None => bail!("mqtt not connected"),
        }
    }
}

fn wait_for_connack(connection: &mut Connection) -> anyhow::Result<()> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            bail!("timed out waiting for connack");
        }
        match connection.recv_timeout(left) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => return Ok(()),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e).context("mqtt connection failed"),
            Err(RecvTimeoutError::Timeout) => bail!("timed out waiting for connack"),
            Err(RecvTimeoutError::Disconnected) => bail!("mqtt event loop closed"),
        }
    }
}

impl BrokerTransport for MqttTransport {
    fn connect(&mut self, session: &BrokerSession) -> anyhow::Result<()> {
        self.disconnect();
        let (client, mut connection) = Client::new(mqtt_options(session), CHANNEL_CAPACITY);
        wait_for_connack(&mut connection)?;
        tracing::info!(host = %session.host, port = session.port, "mqtt connected");
        self.session = Some(Session { client, connection });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        let s = self.session()?;
        s.client
            .subscribe(topic, QoS::AtMostOnce)
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        tracing::info!(topic, "mqtt subscribed");
        Ok(())
    }

    fn publish(&mut self, message: &Message, retain: bool) -> anyhow::Result<()> {
        let s = self.session()?;
        s.client
            .try_publish(
                message.topic.as_str(),
                QoS::AtMostOnce,
                retain,
                message.to_publish_json(),
            )
            .with_context(|| format!("failed to queue publish on {}", message.topic))?;
        Ok(())
    }

    fn poll(&mut self, wait: Duration) -> Vec<Incoming> {
        let Some(s) = self.session.as_mut() else {
            return Vec::new();
        };
        let mut incoming = Vec::new();
        let mut next = s.connection.recv_timeout(wait.max(Duration::from_millis(1)));
        loop {
            match next {
                Ok(Ok(event)) => incoming.extend(incoming_from(&event)),
                Ok(Err(e)) => {
                    log_connection_error(&e);
                    break;
                }
                Err(_) => break,
            }
            next = match s.connection.try_recv() {
                Ok(r) => Ok(r),
                Err(_) => break,
            };
        }
        incoming
    }

    fn disconnect(&mut self) {
        let Some(mut s) = self.session.take() else {
            return;
        };
        if let Err(e) = s.client.disconnect() {
            tracing::warn!("mqtt disconnect request failed: {e}");
            return;
        }
        // Drive the event loop until the disconnect (and everything queued
        // before it) has gone out.
        let deadline = Instant::now() + FLUSH_TIMEOUT;
        while !deadline.saturating_duration_since(Instant::now()).is_zero() {
            match s.connection.recv_timeout(FLUSH_TIMEOUT) {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
        tracing::info!("mqtt disconnected");
    }
}

fn log_connection_error(e: &ConnectionError) {
    tracing::warn!("mqtt error: {e}");
}

// ===========================================================================
// Tests
// ===========================================================================
