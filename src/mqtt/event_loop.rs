//! One connected broker session: announce, serve, and hand back the
//! reconnect delay.
//!
//! The loop waits on three sources at once: inbound PUBLISHes, device events
//! from the sensor task and the keep-alive timer. Inbound data is copied out
//! of the client's buffers before the handler uses the client again.

use core::time::Duration;

use embassy_futures::select::{Either3, select3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;

use super::client::MqttSession;
use super::handler::{AntiTheftMqtt, DeviceEvent, DispatchOutcome, HandlerError, MqttEvent};
use crate::topics::Topic;

/// Largest inbound payload the loop copies out of the client buffer.
pub const MAX_INBOUND_PAYLOAD: usize = 256;

/// Keep-alive schedule of a session.
#[allow(async_fn_in_trait)]
pub trait KeepAlive {
    /// Resolves once the next ping is due.
    async fn due(&mut self);
    /// Start a new period, after connecting and after every ping.
    fn reset(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopError<E> {
    Receive(E),
    Ping(E),
    Handler(HandlerError<E>),
}

impl<E> From<HandlerError<E>> for LoopError<E> {
    fn from(e: HandlerError<E>) -> Self {
        LoopError::Handler(e)
    }
}

/// How a connected session ended.
#[derive(Debug, PartialEq, Eq)]
pub struct SessionEnd<E> {
    pub reconnect_after: Duration,
    pub result: Result<(), LoopError<E>>,
}

enum Wake<E> {
    Message {
        topic: Topic,
        payload: heapless::Vec<u8, MAX_INBOUND_PAYLOAD>,
    },
    Oversized(usize),
    ReceiveFailed(E),
    Device(DeviceEvent),
    Ping,
}

/// Serve inbound commands, device events and pings until a client call
/// fails. Oversized messages are dropped without ending the session.
pub async fn run_event_loop<C, K, M, const N: usize>(
    client: &mut C,
    handler: &mut AntiTheftMqtt,
    events: &Receiver<'_, M, DeviceEvent, N>,
    keep_alive: &mut K,
) -> Result<(), LoopError<C::Err>>
where
    C: MqttSession,
    K: KeepAlive,
    M: RawMutex,
{
    keep_alive.reset();

    loop {
        let wake = match select3(client.receive(), events.receive(), keep_alive.due()).await {
            Either3::First(Ok((topic, payload))) => {
                match (Topic::try_from(topic), heapless::Vec::from_slice(payload)) {
                    (Ok(topic), Ok(payload)) => Wake::Message { topic, payload },
                    _ => Wake::Oversized(payload.len()),
                }
            }
            Either3::First(Err(e)) => Wake::ReceiveFailed(e),
            Either3::Second(event) => Wake::Device(event),
            Either3::Third(()) => Wake::Ping,
        };

        match wake {
            Wake::Message { topic, payload } => {
                info!("mqtt: data received on '{}'", topic.as_str());
                handler
                    .dispatch(
                        client,
                        MqttEvent::Data {
                            topic: &topic,
                            payload: &payload,
                        },
                    )
                    .await?;
            }
            Wake::Oversized(len) => {
                warn!("mqtt: dropping oversized message ({} byte payload)", len);
            }
            Wake::ReceiveFailed(e) => {
                error!("mqtt: receive failed");
                handler.dispatch(client, MqttEvent::Error).await?;
                return Err(LoopError::Receive(e));
            }
            Wake::Device(event) => {
                handler.on_device_event(client, event).await?;
            }
            Wake::Ping => {
                if let Err(e) = client.ping().await {
                    error!("mqtt: keep-alive ping failed");
                    handler.dispatch(client, MqttEvent::Error).await?;
                    return Err(LoopError::Ping(e));
                }
                keep_alive.reset();
            }
        }
    }
}

/// Run a freshly connected session to its end: announce, serve, send
/// DISCONNECT, then report the disconnect to the handler.
pub async fn serve_connection<C, K, M, const N: usize>(
    client: &mut C,
    handler: &mut AntiTheftMqtt,
    events: &Receiver<'_, M, DeviceEvent, N>,
    keep_alive: &mut K,
) -> SessionEnd<C::Err>
where
    C: MqttSession,
    K: KeepAlive,
    M: RawMutex,
{
    let result = match handler.dispatch(client, MqttEvent::Connected).await {
        Ok(_) => run_event_loop(client, handler, events, keep_alive).await,
        Err(e) => Err(e.into()),
    };

    if client.disconnect().await.is_err() {
        debug!("mqtt: DISCONNECT not delivered");
    }

    let reconnect_after = match handler.dispatch(client, MqttEvent::Disconnected).await {
        Ok(DispatchOutcome::Reconnect(delay)) => delay,
        _ => handler.on_disconnected(),
    };
    SessionEnd {
        reconnect_after,
        result,
    }
}
