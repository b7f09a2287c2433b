//! Anti-theft MQTT event handler.
//!
//! The session loop feeds broker events and device events in; the handler
//! owns the arm state and decides what to subscribe to and publish:
//!
//! - connected: subscribe to `command` (QoS 1), announce `online` on `availability`
//! - data on `command`: apply `ARM` / `DISARM` / `LOCATE` and report on `status` / `event`
//! - disconnected: report the fixed reconnect delay
//! - motion while armed: report on `event`; sensor faults go to `debug`

use core::fmt::Write;
use core::time::Duration;
use heapless::String;

use super::client::{MqQos, MqttSubscribe};
use crate::command::Command;
use crate::config::MQTT_RECONNECT_DELAY_MS;
use crate::fmt::payload_str;
use crate::topics::{AntiTheftTopics, CATEGORY_AVAILABILITY, Topic, TopicError};

pub const PAYLOAD_ONLINE: &[u8] = b"online";
pub const PAYLOAD_OFFLINE: &[u8] = b"offline";

/// Arm state of the device. Starts disarmed after every boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmState {
    #[default]
    Disarmed,
    Armed,
}

/// Broker-side events, one per case of the session loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MqttEvent<'a> {
    Connected,
    Disconnected,
    Error,
    Data { topic: &'a str, payload: &'a [u8] },
    Published { msg_id: u16 },
    Other(i32),
}

/// Device-side events forwarded from the sensor task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceEvent {
    /// Accelerometer moved past the tamper threshold.
    Motion { peak_delta_mg: u32 },
    /// The MPU6050 stopped answering.
    SensorFault,
}

/// What [`AntiTheftMqtt::dispatch`] did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// A command arrived on the command topic and was applied.
    Command(Command),
    /// The session is down; reconnect after this delay.
    Reconnect(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerError<E> {
    /// The broker client rejected a publish or subscribe.
    Client(E),
    /// Publish attempted before the session connected.
    NotConnected,
    Topic(TopicError),
}

impl<E> From<TopicError> for HandlerError<E> {
    fn from(e: TopicError) -> Self {
        HandlerError::Topic(e)
    }
}

pub struct AntiTheftMqtt {
    topics: AntiTheftTopics,
    availability: Topic,
    state: ArmState,
    connected: bool,
}

impl AntiTheftMqtt {
    pub fn new(user_id: &str, device_id: &str) -> Result<Self, TopicError> {
        let topics = AntiTheftTopics::new(user_id, device_id)?;
        let availability = topics.build(CATEGORY_AVAILABILITY, None)?;
        Ok(Self {
            topics,
            availability,
            state: ArmState::Disarmed,
            connected: false,
        })
    }

    pub fn topics(&self) -> &AntiTheftTopics {
        &self.topics
    }

    /// Topic carrying `online` / `offline`, also used as the last will.
    pub fn availability_topic(&self) -> &str {
        &self.availability
    }

    pub fn state(&self) -> ArmState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Route a broker event to the matching `on_*` operation.
    pub async fn dispatch<C: MqttSubscribe>(
        &mut self,
        client: &mut C,
        event: MqttEvent<'_>,
    ) -> Result<DispatchOutcome, HandlerError<C::Err>> {
        match event {
            MqttEvent::Connected => {
                self.on_connected(client).await?;
                Ok(DispatchOutcome::Handled)
            }
            MqttEvent::Disconnected => Ok(DispatchOutcome::Reconnect(self.on_disconnected())),
            MqttEvent::Error => {
                self.on_error();
                Ok(DispatchOutcome::Handled)
            }
            MqttEvent::Data { topic, payload } => Ok(self
                .on_data(client, topic, payload)
                .await?
                .map_or(DispatchOutcome::Handled, DispatchOutcome::Command)),
            MqttEvent::Published { msg_id } => {
                self.on_published(msg_id);
                Ok(DispatchOutcome::Handled)
            }
            MqttEvent::Other(id) => {
                info!("mqtt: other event received with id {}", id);
                Ok(DispatchOutcome::Handled)
            }
        }
    }

    /// Subscribe to the command topic and announce availability.
    pub async fn on_connected<C: MqttSubscribe>(
        &mut self,
        client: &mut C,
    ) -> Result<(), HandlerError<C::Err>> {
        info!("mqtt: connected to broker");
        self.connected = true;

        client
            .subscribe(self.topics.command(), MqQos::AtLeastOnce)
            .await
            .map_err(HandlerError::Client)?;
        info!("mqtt: subscribed to command topic: {}", self.topics.command());

        client
            .publish(&self.availability, PAYLOAD_ONLINE, MqQos::AtLeastOnce, true)
            .await
            .map_err(HandlerError::Client)?;
        Ok(())
    }

    /// Mark the session down. Returns the delay before the next attempt,
    /// which is the same after every failure.
    pub fn on_disconnected(&mut self) -> Duration {
        error!("mqtt: disconnected");
        info!("mqtt: reconnecting in {} ms", MQTT_RECONNECT_DELAY_MS);
        self.connected = false;
        Duration::from_millis(MQTT_RECONNECT_DELAY_MS)
    }

    pub fn on_error(&self) {
        error!("mqtt: client error");
    }

    pub fn on_published(&self, msg_id: u16) {
        info!("mqtt: message published, id={}", msg_id);
    }

    /// Handle an inbound message. Only the exact command topic is acted upon.
    pub async fn on_data<C: MqttSubscribe>(
        &mut self,
        client: &mut C,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<Command>, HandlerError<C::Err>> {
        if topic != self.topics.command() {
            debug!("mqtt: ignoring message on '{}'", topic);
            return Ok(None);
        }

        let Some(command) = Command::parse(payload) else {
            warn!("mqtt: unknown command '{}'", payload_str(payload));
            return Ok(None);
        };

        match command {
            Command::Arm => {
                info!("mqtt: device is being armed");
                self.state = ArmState::Armed;
            }
            Command::Disarm => {
                info!("mqtt: device is being disarmed");
                self.state = ArmState::Disarmed;
            }
            Command::Locate => {
                info!("mqtt: locating the device");
                let msg_id = self
                    .publish_to(client, EventTopic::Event, command.as_str().as_bytes(), MqQos::AtLeastOnce)
                    .await?;
                self.on_published(msg_id);
            }
        }

        if let Some(reply) = command.status_reply() {
            self.publish_status(client, reply).await?;
        }

        Ok(Some(command))
    }

    /// Publish `status_msg` on the status topic (QoS 1, not retained).
    pub async fn publish_status<C: MqttSubscribe>(
        &mut self,
        client: &mut C,
        status_msg: &str,
    ) -> Result<u16, HandlerError<C::Err>> {
        let msg_id = self
            .publish_to(client, EventTopic::Status, status_msg.as_bytes(), MqQos::AtLeastOnce)
            .await?;
        info!("mqtt: published status '{}' (msg_id={})", status_msg, msg_id);
        Ok(msg_id)
    }

    /// Report a device event. Motion is only reported while armed.
    /// Returns whether anything was published.
    pub async fn on_device_event<C: MqttSubscribe>(
        &mut self,
        client: &mut C,
        event: DeviceEvent,
    ) -> Result<bool, HandlerError<C::Err>> {
        match event {
            DeviceEvent::Motion { peak_delta_mg } => {
                if self.state != ArmState::Armed {
                    debug!("mqtt: motion {} mg while disarmed", peak_delta_mg);
                    return Ok(false);
                }

                warn!("mqtt: motion detected while armed ({} mg)", peak_delta_mg);
                let mut payload = String::<32>::new();
                write!(payload, "MOTION:{}", peak_delta_mg).ok();
                self.publish_to(client, EventTopic::Event, payload.as_bytes(), MqQos::AtLeastOnce)
                    .await?;
                Ok(true)
            }
            DeviceEvent::SensorFault => {
                self.publish_to(
                    client,
                    EventTopic::Debug,
                    b"mpu6050: read failed",
                    MqQos::AtMostOnce,
                )
                .await?;
                Ok(true)
            }
        }
    }

    async fn publish_to<C: MqttSubscribe>(
        &self,
        client: &mut C,
        target: EventTopic,
        payload: &[u8],
        qos: MqQos,
    ) -> Result<u16, HandlerError<C::Err>> {
        if !self.connected {
            error!("mqtt: cannot publish, client not connected");
            return Err(HandlerError::NotConnected);
        }

        let topic = match target {
            EventTopic::Status => self.topics.status(),
            EventTopic::Event => self.topics.event(),
            EventTopic::Debug => self.topics.debug(),
        };
        client
            .publish(topic, payload, qos, false)
            .await
            .map_err(HandlerError::Client)
    }
}

#[derive(Clone, Copy)]
enum EventTopic {
    Status,
    Event,
    Debug,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::testing::{Offline, RecordingClient};
    use embassy_futures::block_on;

    fn connected_handler(client: &mut RecordingClient) -> AntiTheftMqtt {
        let mut handler = AntiTheftMqtt::new("daniel", "device01").unwrap();
        block_on(handler.on_connected(client)).unwrap();
        client.published.clear();
        handler
    }

    #[test]
    fn connect_subscribes_to_command_and_announces_online() {
        let mut client = RecordingClient::default();
        let mut handler = AntiTheftMqtt::new("daniel", "device01").unwrap();
        assert!(!handler.is_connected());

        block_on(handler.dispatch(&mut client, MqttEvent::Connected)).unwrap();

        assert!(handler.is_connected());
        assert_eq!(
            client.subscriptions,
            vec![(
                "anti_theft/daniel/device01/command".to_string(),
                MqQos::AtLeastOnce
            )]
        );
        let online = &client.published[0];
        assert_eq!(online.topic, "anti_theft/daniel/device01/availability");
        assert_eq!(online.payload_str(), "online");
        assert!(online.retain);
    }

    #[test]
    fn arm_and_disarm_update_state_and_report_status() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);
        let command_topic = handler.topics().command().to_string();

        let applied = block_on(handler.dispatch(
            &mut client,
            MqttEvent::Data {
                topic: &command_topic,
                payload: b"ARM",
            },
        ))
        .unwrap();
        assert_eq!(applied, DispatchOutcome::Command(Command::Arm));
        assert_eq!(handler.state(), ArmState::Armed);

        block_on(handler.on_data(&mut client, &command_topic, b"DISARM")).unwrap();
        assert_eq!(handler.state(), ArmState::Disarmed);

        assert_eq!(client.published.len(), 2);
        assert!(
            client
                .published
                .iter()
                .all(|p| p.topic == "anti_theft/daniel/device01/status"
                    && p.qos == MqQos::AtLeastOnce
                    && !p.retain)
        );
        assert_eq!(client.published[0].payload_str(), "ARMED");
        assert_eq!(client.published[1].payload_str(), "DISARMED");
    }

    #[test]
    fn locate_reports_on_event_topic_without_changing_state() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);
        let command_topic = handler.topics().command().to_string();

        let applied = block_on(handler.on_data(&mut client, &command_topic, b"LOCATE")).unwrap();

        assert_eq!(applied, Some(Command::Locate));
        assert_eq!(handler.state(), ArmState::Disarmed);
        assert_eq!(client.topics(), vec!["anti_theft/daniel/device01/event"]);
        assert_eq!(client.published[0].payload_str(), "LOCATE");
    }

    #[test]
    fn ignores_other_topics_and_unknown_payloads() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);
        let command_topic = handler.topics().command().to_string();

        let other = block_on(handler.on_data(
            &mut client,
            "anti_theft/daniel/device01/command/extra",
            b"ARM",
        ))
        .unwrap();
        let prefix = block_on(handler.on_data(&mut client, "anti_theft/daniel/device01/comm", b"ARM"))
            .unwrap();
        let unknown = block_on(handler.on_data(&mut client, &command_topic, b"SELF_DESTRUCT")).unwrap();
        let empty = block_on(handler.on_data(&mut client, &command_topic, b"")).unwrap();

        assert_eq!((other, prefix, unknown, empty), (None, None, None, None));
        assert_eq!(handler.state(), ArmState::Disarmed);
        assert!(client.published.is_empty());
    }

    #[test]
    fn motion_is_reported_only_while_armed() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);
        let command_topic = handler.topics().command().to_string();
        let motion = DeviceEvent::Motion { peak_delta_mg: 420 };

        assert!(!block_on(handler.on_device_event(&mut client, motion)).unwrap());
        assert!(client.published.is_empty());

        block_on(handler.on_data(&mut client, &command_topic, b"ARM")).unwrap();
        client.published.clear();

        assert!(block_on(handler.on_device_event(&mut client, motion)).unwrap());
        assert_eq!(client.topics(), vec!["anti_theft/daniel/device01/event"]);
        assert_eq!(client.published[0].payload_str(), "MOTION:420");
    }

    #[test]
    fn sensor_faults_go_to_debug_topic() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);

        assert!(block_on(handler.on_device_event(&mut client, DeviceEvent::SensorFault)).unwrap());
        assert_eq!(client.topics(), vec!["anti_theft/daniel/device01/debug"]);
        assert_eq!(client.published[0].qos, MqQos::AtMostOnce);
    }

    #[test]
    fn disconnect_reports_fixed_delay_and_blocks_publishing() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);

        assert_eq!(handler.on_disconnected(), Duration::from_secs(2));
        assert_eq!(handler.on_disconnected(), Duration::from_secs(2));
        assert!(!handler.is_connected());

        let result = block_on(handler.publish_status(&mut client, "ARMED"));
        assert_eq!(result, Err(HandlerError::NotConnected));
        assert!(client.published.is_empty());
    }

    #[test]
    fn dispatched_disconnect_carries_reconnect_delay() {
        let mut client = RecordingClient::default();
        let mut handler = connected_handler(&mut client);

        let error = block_on(handler.dispatch(&mut client, MqttEvent::Error)).unwrap();
        assert_eq!(error, DispatchOutcome::Handled);
        assert!(handler.is_connected());

        let down = block_on(handler.dispatch(&mut client, MqttEvent::Disconnected)).unwrap();
        assert_eq!(down, DispatchOutcome::Reconnect(Duration::from_secs(2)));
        assert!(!handler.is_connected());
        assert!(client.published.is_empty());
    }

    #[test]
    fn client_failures_surface_as_errors() {
        let mut client = RecordingClient {
            offline: true,
            ..Default::default()
        };
        let mut handler = AntiTheftMqtt::new("daniel", "device01").unwrap();

        let result = block_on(handler.on_connected(&mut client));
        assert_eq!(result, Err(HandlerError::Client(Offline)));
    }

    #[test]
    fn status_publish_returns_message_id() {
        let mut client = RecordingClient::default();
        let mut handler = AntiTheftMqtt::new("daniel", "device01").unwrap();
        // online announcement takes id 1
        block_on(handler.on_connected(&mut client)).unwrap();

        assert_eq!(block_on(handler.publish_status(&mut client, "ARMED")), Ok(2));
    }
}
