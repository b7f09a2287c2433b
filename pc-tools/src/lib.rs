//! Host-side companions for the anti-theft device: an alarm relay that
//! watches the `smartsec/#` tree and a console that talks to one device.

pub mod console;
pub mod relay;

use std::time::Duration;

use rumqttc::{Client, Connection, MqttOptions};

/// Keepalive used by both host tools.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
/// Pause before polling the event loop again after a connection error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Local time format used on screen and in the alarm log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Open a clean MQTT session. The connection is established lazily when the
/// returned [`Connection`] is first iterated.
pub fn connect(client_name: &str, host: &str, port: u16) -> (Client, Connection) {
    let client_id = format!("{client_name}-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    Client::new(options, 10)
}

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
