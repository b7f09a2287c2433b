//! MQTT client abstraction and rust-mqtt integration.
//!
//! The handler and the generic wrapper talk to a broker only through
//! [`MqttPublish`] / [`MqttSubscribe`]; the firmware plugs in
//! [`RustMqttSession`], host tests plug in recording fakes, and builds
//! without a broker use [`LoggerPublisher`].

/// Delivery guarantee requested for a publish or subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqQos {
    /// QoS 0, at most once
    AtMostOnce,
    /// QoS 1, at least once
    AtLeastOnce,
}

impl MqQos {
    pub fn as_str(&self) -> &'static str {
        match self {
            MqQos::AtMostOnce => "QoS0",
            MqQos::AtLeastOnce => "QoS1",
        }
    }
}

/// Outbound half of a broker client. The handler and the relay only see this.
#[allow(async_fn_in_trait)]
pub trait MqttPublish {
    type Err;
    /// Returns a message id for logs: 0 for QoS 0, otherwise a non-zero id
    /// counted by the caller's [`PacketIds`]. It is not the packet id on the
    /// wire, which the client crate assigns on its own.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<u16, Self::Err>;
}

/// Topic subscription on top of [`MqttPublish`].
#[allow(async_fn_in_trait)]
pub trait MqttSubscribe: MqttPublish {
    async fn subscribe(&mut self, topic: &str, qos: MqQos) -> Result<(), Self::Err>;
}

/// Inbound side of a live broker session, driven by the session loop.
#[allow(async_fn_in_trait)]
pub trait MqttSession: MqttSubscribe {
    /// Wait for the next PUBLISH from the broker.
    async fn receive(&mut self) -> Result<(&str, &[u8]), Self::Err>;
    /// Send PINGREQ and wait for PINGRESP.
    async fn ping(&mut self) -> Result<(), Self::Err>;
    async fn disconnect(&mut self) -> Result<(), Self::Err>;
}

/// QoS a subscription actually gets when the client can only subscribe at
/// the session-wide `session_qos`. Warns when the two differ.
pub fn granted_subscribe_qos(topic: &str, requested: MqQos, session_qos: MqQos) -> MqQos {
    if requested != session_qos {
        warn!(
            "mqtt: '{}' requested {} but the session subscribes at {}",
            topic,
            requested.as_str(),
            session_qos.as_str()
        );
    }
    session_qos
}

/// Packet identifier allocator. Identifiers wrap and skip 0, which MQTT reserves.
#[derive(Debug, Default)]
pub struct PacketIds {
    last: u16,
}

impl PacketIds {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.checked_add(1).unwrap_or(1);
        self.last
    }

    /// Message id for a publish at `qos`.
    pub fn for_qos(&mut self, qos: MqQos) -> u16 {
        match qos {
            MqQos::AtMostOnce => 0,
            MqQos::AtLeastOnce => self.next_id(),
        }
    }
}

/// Log-only client used when no broker is available.
/// Lets the handler and BLE relay run end to end without a network.
#[derive(Debug, Default)]
pub struct LoggerPublisher {
    ids: PacketIds,
}

impl LoggerPublisher {
    pub const fn new() -> Self {
        Self {
            ids: PacketIds::new(),
        }
    }
}

impl MqttPublish for LoggerPublisher {
    type Err = core::convert::Infallible;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<u16, Self::Err> {
        info!(
            "mqtt(log-only): {} <- {} bytes ({}, retain={})",
            topic,
            payload.len(),
            qos.as_str(),
            retain
        );
        Ok(self.ids.for_qos(qos))
    }
}

impl MqttSubscribe for LoggerPublisher {
    async fn subscribe(&mut self, topic: &str, qos: MqQos) -> Result<(), Self::Err> {
        info!("mqtt(log-only): subscribing to '{}' {}", topic, qos.as_str());
        Ok(())
    }
}

#[cfg(feature = "firmware")]
use embedded_io_async::{ErrorType, Read, Write as IoWrite};

/// embassy-net TCP socket as the byte stream rust-mqtt runs on.
#[cfg(feature = "firmware")]
pub struct EmbassyNetTransport<'a> {
    socket: embassy_net::tcp::TcpSocket<'a>,
}

#[cfg(feature = "firmware")]
impl<'a> EmbassyNetTransport<'a> {
    pub fn new(socket: embassy_net::tcp::TcpSocket<'a>) -> Self {
        Self { socket }
    }
}

#[cfg(feature = "firmware")]
impl<'a> ErrorType for EmbassyNetTransport<'a> {
    type Error = embassy_net::tcp::Error;
}

#[cfg(feature = "firmware")]
impl<'a> Read for EmbassyNetTransport<'a> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await
    }
}

#[cfg(feature = "firmware")]
impl<'a> IoWrite for EmbassyNetTransport<'a> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await
    }
}

#[cfg(feature = "firmware")]
use rust_mqtt::client::client::MqttClient;
#[cfg(feature = "firmware")]
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
#[cfg(feature = "firmware")]
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
#[cfg(feature = "firmware")]
use rust_mqtt::utils::rng_generator::CountingRng;

#[cfg(feature = "firmware")]
fn to_rust_mqtt_qos(qos: MqQos) -> QualityOfService {
    match qos {
        MqQos::AtMostOnce => QualityOfService::QoS0,
        MqQos::AtLeastOnce => QualityOfService::QoS1,
    }
}

/// rust-mqtt v5 session implementing the publish/subscribe traits, plus the
/// receive and keep-alive calls the session loop needs.
#[cfg(feature = "firmware")]
pub struct RustMqttSession<'a, T: Read + IoWrite> {
    client: MqttClient<'a, T, 5, CountingRng>,
    ids: PacketIds,
    subscribe_qos: MqQos,
}

#[cfg(feature = "firmware")]
impl<'a, T: Read + IoWrite> MqttSession for RustMqttSession<'a, T> {
    async fn receive(&mut self) -> Result<(&str, &[u8]), ReasonCode> {
        self.client.receive_message().await
    }

    async fn ping(&mut self) -> Result<(), ReasonCode> {
        self.client.send_ping().await
    }

    async fn disconnect(&mut self) -> Result<(), ReasonCode> {
        self.client.disconnect().await
    }
}

#[cfg(feature = "firmware")]
impl<'a, T: Read + IoWrite> MqttPublish for RustMqttSession<'a, T> {
    type Err = ReasonCode;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<u16, Self::Err> {
        info!(
            "mqtt: {} <- {} bytes ({}, retain={})",
            topic,
            payload.len(),
            qos.as_str(),
            retain
        );

        match self
            .client
            .send_message(topic, payload, to_rust_mqtt_qos(qos), retain)
            .await
        {
            Ok(()) => Ok(self.ids.for_qos(qos)),
            // Published, nobody listening
            Err(ReasonCode::NoMatchingSubscribers) => Ok(self.ids.for_qos(qos)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(feature = "firmware")]
impl<'a, T: Read + IoWrite> MqttSubscribe for RustMqttSession<'a, T> {
    /// rust-mqtt subscribes at the `max_subscribe_qos` set at connect time.
    async fn subscribe(&mut self, topic: &str, qos: MqQos) -> Result<(), Self::Err> {
        let granted = granted_subscribe_qos(topic, qos, self.subscribe_qos);
        info!("mqtt: subscribing to '{}' {}", topic, granted.as_str());
        self.client.subscribe_to_topic(topic).await
    }
}

/// Short text for the CONNACK reason codes a small device is likely to see.
#[cfg(feature = "firmware")]
pub fn interpret_connack_reason(reason: &ReasonCode) -> &'static str {
    match *reason {
        ReasonCode::Success => "accepted",
        ReasonCode::BadUserNameOrPassword => "bad username or password",
        ReasonCode::NotAuthorized => "not authorized",
        ReasonCode::ClientIdNotValid => "client id rejected",
        ReasonCode::Banned => "client banned",
        ReasonCode::ServerUnavailable | ReasonCode::ServerBusy => "broker unavailable",
        ReasonCode::UseAnotherServer | ReasonCode::ServerMoved => "broker redirected",
        ReasonCode::UnsupportedProtocolVersion => "MQTT v5 not supported by broker",
        ReasonCode::ConnectionRateExceeded | ReasonCode::QuotaExceeded => "rate limited",
        ReasonCode::MalformedPacket | ReasonCode::ProtocolError => "protocol error",
        _ => "rejected",
    }
}

/// Connect-time parameters for [`init_rust_mqtt_client`].
#[cfg(feature = "firmware")]
pub struct MqttClientConfig<'a> {
    pub client_id: &'a str,
    pub keep_alive_secs: u16,
    pub username: &'a str,
    pub password: &'a str,
    pub subscribe_qos: MqQos,
    pub lwt_topic: &'a str,
    pub lwt_payload: &'a [u8],
    pub lwt_retain: bool,
}

/// Connect rust-mqtt over `transport` and return a ready session.
///
/// `recv_buffer` and `write_buffer` back the client's packet encoding and
/// must outlive the session.
#[cfg(feature = "firmware")]
pub async fn init_rust_mqtt_client<'a>(
    transport: EmbassyNetTransport<'a>,
    config: MqttClientConfig<'a>,
    recv_buffer: &'a mut [u8],
    write_buffer: &'a mut [u8],
) -> Result<RustMqttSession<'a, EmbassyNetTransport<'a>>, ReasonCode> {
    use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};

    let mut client_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(0));

    client_config.add_client_id(config.client_id);
    client_config.keep_alive = config.keep_alive_secs;
    client_config.add_max_subscribe_qos(to_rust_mqtt_qos(config.subscribe_qos));

    if !config.username.is_empty() {
        client_config.add_username(config.username);
        if !config.password.is_empty() {
            client_config.add_password(config.password);
        }
    }

    // rust-mqtt 0.3 has no will QoS setting
    client_config.add_will(config.lwt_topic, config.lwt_payload, config.lwt_retain);

    let write_len = write_buffer.len();
    let recv_len = recv_buffer.len();
    let mut client = MqttClient::<_, 5, _>::new(
        transport,
        write_buffer,
        write_len,
        recv_buffer,
        recv_len,
        client_config,
    );

    match client.connect_to_broker().await {
        Ok(()) => {
            info!("rust-mqtt: connected to broker as '{}'", config.client_id);
            Ok(RustMqttSession {
                client,
                ids: PacketIds::new(),
                subscribe_qos: config.subscribe_qos,
            })
        }
        Err(e) => {
            error!("rust-mqtt: connection failed: {}", interpret_connack_reason(&e));
            Err(e)
        }
    }
}
