//! Broker session task: resolve, connect, serve, and reconnect after a fixed
//! delay.
//!
//! Lifecycle of one attempt:
//! 1. Resolve the broker host (IPv4 literal, else DNS A query)
//! 2. TCP connect (10 s timeout)
//! 3. MQTT v5 CONNECT with an `offline` last will on the availability topic
//! 4. [`serve_connection`]: subscribe, announce `online`, then serve inbound
//!    commands, device events and keep-alive pings until any client call fails
//!
//! Every failure, at any stage, ends in the handler's disconnect handling and
//! the same fixed pause before the next attempt.

use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use rust_mqtt::packet::v5::reason_codes::ReasonCode;

use super::client::{
    EmbassyNetTransport, MqQos, MqttClientConfig, init_rust_mqtt_client, interpret_connack_reason,
};
use super::event_loop::{KeepAlive, serve_connection};
use super::handler::{AntiTheftMqtt, DeviceEvent, PAYLOAD_OFFLINE};
use crate::config::{
    BrokerUri, DEVICE_ID, MQTT_BROKER_PORT, MQTT_BROKER_URI, MQTT_CLIENT_ID, MQTT_KEEP_ALIVE_SECS,
    USER_ID,
};
use crate::topics::{CATEGORY_AVAILABILITY, TopicError};

/// Set by the WiFi task once DHCP has handed out an address.
pub static NETWORK_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub const DEVICE_EVENT_CAPACITY: usize = 8;
pub type DeviceEventChannel = Channel<CriticalSectionRawMutex, DeviceEvent, DEVICE_EVENT_CAPACITY>;
pub type DeviceEventReceiver =
    Receiver<'static, CriticalSectionRawMutex, DeviceEvent, DEVICE_EVENT_CAPACITY>;

/// Sensor task to session task. Events queue up while the broker is unreachable.
pub static DEVICE_EVENTS: DeviceEventChannel = Channel::new();

const TCP_TIMEOUT_SECS: u64 = 10;

/// Broker credentials; empty strings disable authentication.
#[derive(Clone, Copy)]
pub struct MqttCredentials {
    pub username: &'static str,
    pub password: &'static str,
}

/// Failure before a broker session was established.
#[derive(defmt::Format)]
pub enum MqttSessionError {
    /// DNS query errored
    DnsResolutionFailed,
    /// DNS returned no addresses
    DnsNoAddresses,
    TcpConnectionFailed,
    /// MQTT CONNECT handshake failed with a reason code
    MqttConnectFailed(ReasonCode),
    Topic(TopicError),
}

impl From<TopicError> for MqttSessionError {
    fn from(e: TopicError) -> Self {
        MqttSessionError::Topic(e)
    }
}

/// Resolve the broker host to an IPv4 address. Literal addresses skip DNS.
async fn resolve_broker_address(
    stack: &Stack<'static>,
    broker_host: &str,
) -> Result<smoltcp::wire::Ipv4Address, MqttSessionError> {
    if let Ok(ip) = broker_host.parse::<smoltcp::wire::Ipv4Address>() {
        return Ok(ip);
    }

    info!("mqtt: resolving broker hostname '{}'...", broker_host);
    match stack
        .dns_query(broker_host, embassy_net::dns::DnsQueryType::A)
        .await
    {
        Ok(addrs) => {
            let Some(&addr) = addrs.first() else {
                error!("mqtt: DNS resolution returned no addresses");
                return Err(MqttSessionError::DnsNoAddresses);
            };
            info!("mqtt: resolved '{}' to {}", broker_host, addr);
            let smoltcp::wire::IpAddress::Ipv4(ipv4) = addr;
            Ok(ipv4)
        }
        Err(e) => {
            error!("mqtt: DNS resolution failed: {:?}", defmt::Debug2Format(&e));
            Err(MqttSessionError::DnsResolutionFailed)
        }
    }
}

async fn establish_tcp_connection<'a>(
    stack: &'a Stack<'static>,
    broker_addr: smoltcp::wire::Ipv4Address,
    broker_port: u16,
    tcp_rx_buffer: &'a mut [u8],
    tcp_tx_buffer: &'a mut [u8],
) -> Result<embassy_net::tcp::TcpSocket<'a>, MqttSessionError> {
    let mut tcp_socket = embassy_net::tcp::TcpSocket::new(*stack, tcp_rx_buffer, tcp_tx_buffer);
    tcp_socket.set_timeout(Some(Duration::from_secs(TCP_TIMEOUT_SECS)));

    info!("mqtt: connecting TCP to {}:{}...", broker_addr, broker_port);
    match tcp_socket.connect((broker_addr, broker_port)).await {
        Ok(()) => {
            info!("mqtt: TCP connected");
            Ok(tcp_socket)
        }
        Err(e) => {
            error!("mqtt: TCP connection failed: {:?}", defmt::Debug2Format(&e));
            Err(MqttSessionError::TcpConnectionFailed)
        }
    }
}

/// Keep-alive pings at half the negotiated keep-alive.
struct PingTimer {
    period: Duration,
    next: Instant,
}

impl PingTimer {
    fn new(keep_alive_secs: u16) -> Self {
        let period = Duration::from_secs(keep_alive_secs as u64 / 2);
        Self {
            period,
            next: Instant::now() + period,
        }
    }
}

impl KeepAlive for PingTimer {
    async fn due(&mut self) {
        Timer::at(self.next).await
    }

    fn reset(&mut self) {
        self.next = Instant::now() + self.period;
    }
}

/// One connection attempt. Returns the delay before the next attempt once a
/// session has run; errors are the stages that failed before that.
async fn run_session(
    stack: &'static Stack<'static>,
    broker: &BrokerUri<'_>,
    credentials: MqttCredentials,
    handler: &mut AntiTheftMqtt,
    events: &DeviceEventReceiver,
) -> Result<core::time::Duration, MqttSessionError> {
    let broker_addr = resolve_broker_address(stack, broker.host()).await?;

    // Owned copy: the client keeps the will topic for its whole lifetime.
    let lwt_topic = handler.topics().build(CATEGORY_AVAILABILITY, None)?;

    let mut tcp_rx_buffer = [0u8; 1024];
    let mut tcp_tx_buffer = [0u8; 1024];
    let mut mqtt_recv_buffer = [0u8; 1024];
    let mut mqtt_write_buffer = [0u8; 1024];

    let tcp_socket = establish_tcp_connection(
        stack,
        broker_addr,
        broker.port(),
        &mut tcp_rx_buffer,
        &mut tcp_tx_buffer,
    )
    .await?;

    let config = MqttClientConfig {
        client_id: MQTT_CLIENT_ID,
        keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
        username: credentials.username,
        password: credentials.password,
        subscribe_qos: MqQos::AtLeastOnce,
        lwt_topic: lwt_topic.as_str(),
        lwt_payload: PAYLOAD_OFFLINE,
        lwt_retain: true,
    };

    let mut client = init_rust_mqtt_client(
        EmbassyNetTransport::new(tcp_socket),
        config,
        &mut mqtt_recv_buffer,
        &mut mqtt_write_buffer,
    )
    .await
    .map_err(|e| {
        match e {
            ReasonCode::BadUserNameOrPassword => {
                error!("mqtt: check MQTT_USERNAME and MQTT_PASSWORD configuration");
            }
            ReasonCode::ClientIdNotValid => {
                error!("mqtt: broker rejected client id '{}'", MQTT_CLIENT_ID);
            }
            _ => warn!("mqtt: CONNACK {}", interpret_connack_reason(&e)),
        }
        MqttSessionError::MqttConnectFailed(e)
    })?;

    let mut keep_alive = PingTimer::new(MQTT_KEEP_ALIVE_SECS);
    let end = serve_connection(&mut client, handler, events, &mut keep_alive).await;
    if let Err(e) = end.result {
        error!("mqtt: session ended: {:?}", e);
    }
    Ok(end.reconnect_after)
}

/// MQTT connection task: owns the handler and keeps a broker session alive.
///
/// Device events from [`DEVICE_EVENTS`] are served while connected and queue
/// up otherwise. Reconnects use the fixed delay returned by
/// [`AntiTheftMqtt::on_disconnected`], with no backoff.
#[embassy_executor::task]
pub async fn mqtt_session_task(stack: &'static Stack<'static>, credentials: MqttCredentials) {
    info!("mqtt: connection task started, waiting for network...");
    NETWORK_READY.wait().await;
    info!("mqtt: network ready");

    let broker = match BrokerUri::parse(MQTT_BROKER_URI, MQTT_BROKER_PORT) {
        Ok(broker) => broker,
        Err(e) => {
            error!("mqtt: invalid broker URI '{}': {:?}", MQTT_BROKER_URI, e);
            return;
        }
    };
    let mut handler = match AntiTheftMqtt::new(USER_ID, DEVICE_ID) {
        Ok(handler) => handler,
        Err(e) => {
            error!("mqtt: cannot build topics: {:?}", e);
            return;
        }
    };

    info!(
        "mqtt: broker {}:{}, client id {}, keep-alive {}s",
        broker.host(),
        broker.port(),
        MQTT_CLIENT_ID,
        MQTT_KEEP_ALIVE_SECS
    );
    if credentials.username.is_empty() {
        info!("mqtt: no authentication configured");
    } else {
        info!(
            "mqtt: authentication enabled (username='{}', password=*** len={})",
            credentials.username,
            credentials.password.len()
        );
    }

    let events = DEVICE_EVENTS.receiver();
    loop {
        info!("mqtt: attempting connection...");
        let delay = match run_session(stack, &broker, credentials, &mut handler, &events).await {
            Ok(delay) => delay,
            Err(e) => {
                error!("mqtt: connection attempt failed: {:?}", e);
                handler.on_disconnected()
            }
        };
        Timer::after(Duration::from_millis(delay.as_millis() as u64)).await;
    }
}
