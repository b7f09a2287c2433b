//! Minimal start/stop/publish wrapper around any [`MqttPublish`] client.
//!
//! Used by the BLE relay, which only needs to push sensor notifications out
//! and has no command handling of its own.

use super::client::{MqQos, MqttPublish};
use super::handler::MqttEvent;
use crate::fmt::payload_str;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppError<E> {
    NotStarted,
    Client(E),
}

pub struct MqttApp<C> {
    client: Option<C>,
}

impl<C> Default for MqttApp<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MqttApp<C> {
    pub const fn new() -> Self {
        Self { client: None }
    }

    pub fn is_started(&self) -> bool {
        self.client.is_some()
    }

    /// Take ownership of a client. Returns `false` and drops `client` if a
    /// client is already running.
    pub fn start(&mut self, client: C, uri: &str) -> bool {
        if self.client.is_some() {
            return false;
        }
        self.client = Some(client);
        info!("MQTT started -> {}", uri);
        true
    }

    /// Hand the client back, if any.
    pub fn stop(&mut self) -> Option<C> {
        let client = self.client.take()?;
        info!("MQTT stopped");
        Some(client)
    }

    pub fn on_event(&self, event: &MqttEvent<'_>) {
        match event {
            MqttEvent::Connected => info!("MQTT connected"),
            MqttEvent::Disconnected => info!("MQTT disconnected"),
            MqttEvent::Data { topic, payload } => {
                info!("MQTT data: topic={} data={}", topic, payload_str(payload))
            }
            _ => {}
        }
    }
}

impl<C: MqttPublish> MqttApp<C> {
    /// Publish at QoS 1, not retained.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<u16, AppError<C::Err>> {
        let client = self.client.as_mut().ok_or(AppError::NotStarted)?;
        let msg_id = client
            .publish(topic, payload, MqQos::AtLeastOnce, false)
            .await
            .map_err(AppError::Client)?;
        info!(
            "MQTT publish id={} topic={} payload={}",
            msg_id,
            topic,
            payload_str(payload)
        );
        Ok(msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::testing::{Offline, RecordingClient};
    use embassy_futures::block_on;

    #[test]
    fn publish_requires_start() {
        let mut app = MqttApp::<RecordingClient>::new();
        assert_eq!(
            block_on(app.publish("smartsec/x", b"open")),
            Err(AppError::NotStarted)
        );
    }

    #[test]
    fn publishes_at_qos1_without_retain() {
        let mut app = MqttApp::new();
        assert!(app.start(RecordingClient::default(), "mqtt://172.20.10.10"));

        assert_eq!(block_on(app.publish("smartsec/a", b"open")), Ok(1));
        assert_eq!(block_on(app.publish("smartsec/a", b"closed")), Ok(2));

        let client = app.stop().unwrap();
        assert_eq!(client.published.len(), 2);
        assert_eq!(client.published[0].qos, MqQos::AtLeastOnce);
        assert!(!client.published[0].retain);
        assert_eq!(client.published[1].payload_str(), "closed");
    }

    #[test]
    fn second_start_is_ignored() {
        let mut app = MqttApp::new();
        assert!(app.start(RecordingClient::default(), "mqtt://a"));
        let other = RecordingClient {
            offline: true,
            ..Default::default()
        };
        assert!(!app.start(other, "mqtt://b"));

        // the first client stays in place
        assert_eq!(block_on(app.publish("t", b"x")), Ok(1));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut app = MqttApp::new();
        assert!(app.stop().is_none());
        app.start(RecordingClient::default(), "mqtt://a");
        assert!(app.stop().is_some());
        assert!(app.stop().is_none());
        assert!(!app.is_started());
    }

    #[test]
    fn client_errors_are_wrapped() {
        let mut app = MqttApp::new();
        app.start(
            RecordingClient {
                offline: true,
                ..Default::default()
            },
            "mqtt://a",
        );
        assert_eq!(
            block_on(app.publish("t", b"x")),
            Err(AppError::Client(Offline))
        );
    }
}
