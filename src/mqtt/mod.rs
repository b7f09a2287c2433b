//! MQTT module: client abstraction, the anti-theft event handler, the
//! connected-session loop, the minimal generic wrapper, and (firmware only)
//! the broker session task.

pub mod app;
pub mod client;
pub mod event_loop;
pub mod handler;

#[cfg(feature = "firmware")]
pub mod session;

// Re-exports for cleaner imports from crate::mqtt
pub use app::{AppError, MqttApp};
pub use client::{
    LoggerPublisher, MqQos, MqttPublish, MqttSession, MqttSubscribe, PacketIds,
    granted_subscribe_qos,
};
pub use event_loop::{KeepAlive, LoopError, SessionEnd, run_event_loop, serve_connection};
pub use handler::{
    AntiTheftMqtt, ArmState, DeviceEvent, DispatchOutcome, HandlerError, MqttEvent,
};

#[cfg(feature = "firmware")]
pub use client::{
    EmbassyNetTransport, MqttClientConfig, RustMqttSession, init_rust_mqtt_client,
    interpret_connack_reason,
};

#[cfg(test)]
pub(crate) mod testing {
    //! Recording broker client for handler, wrapper and session loop tests.

    use std::collections::VecDeque;

    use super::client::{MqQos, MqttPublish, MqttSession, MqttSubscribe, PacketIds};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Published {
        pub topic: String,
        pub payload: Vec<u8>,
        pub qos: MqQos,
        pub retain: bool,
    }

    impl Published {
        pub fn payload_str(&self) -> &str {
            core::str::from_utf8(&self.payload).unwrap()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Offline;

    /// Scripted broker traffic, handed out by `receive` in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Inbound {
        Message { topic: String, payload: Vec<u8> },
        /// The connection drops: `receive` fails.
        Closed,
    }

    impl Inbound {
        pub fn message(topic: &str, payload: &[u8]) -> Self {
            Inbound::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            }
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingClient {
        pub published: Vec<Published>,
        pub subscriptions: Vec<(String, MqQos)>,
        pub offline: bool,
        /// Once drained, `receive` stays pending.
        pub inbound: VecDeque<Inbound>,
        pub pings: usize,
        /// Pings answered before `ping` starts failing; `None` answers all.
        pub pings_allowed: Option<usize>,
        pub disconnected: bool,
        pub(crate) current: Option<(String, Vec<u8>)>,
        pub(crate) ids: PacketIds,
    }

    impl RecordingClient {
        pub fn with_inbound(inbound: impl IntoIterator<Item = Inbound>) -> Self {
            Self {
                inbound: inbound.into_iter().collect(),
                ..Default::default()
            }
        }

        pub fn topics(&self) -> Vec<&str> {
            self.published.iter().map(|p| p.topic.as_str()).collect()
        }
    }

    impl MqttPublish for RecordingClient {
        type Err = Offline;

        async fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: MqQos,
            retain: bool,
        ) -> Result<u16, Self::Err> {
            if self.offline {
                return Err(Offline);
            }
            self.published.push(Published {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain,
            });
            Ok(self.ids.for_qos(qos))
        }
    }

    impl MqttSubscribe for RecordingClient {
        async fn subscribe(&mut self, topic: &str, qos: MqQos) -> Result<(), Self::Err> {
            if self.offline {
                return Err(Offline);
            }
            self.subscriptions.push((topic.to_string(), qos));
            Ok(())
        }
    }

    impl MqttSession for RecordingClient {
        async fn receive(&mut self) -> Result<(&str, &[u8]), Self::Err> {
            match self.inbound.pop_front() {
                Some(Inbound::Message { topic, payload }) => {
                    let (topic, payload) = self.current.insert((topic, payload));
                    Ok((topic.as_str(), payload.as_slice()))
                }
                Some(Inbound::Closed) => Err(Offline),
                None => core::future::pending().await,
            }
        }

        async fn ping(&mut self) -> Result<(), Self::Err> {
            self.pings += 1;
            match self.pings_allowed {
                Some(allowed) if self.pings > allowed => Err(Offline),
                _ if self.offline => Err(Offline),
                _ => Ok(()),
            }
        }

        async fn disconnect(&mut self) -> Result<(), Self::Err> {
            self.disconnected = true;
            if self.offline {
                return Err(Offline);
            }
            Ok(())
        }
    }
}
