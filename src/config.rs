//! Device configuration.
//!
//! Identity, broker and bus settings are compile-time constants. WiFi and
//! broker credentials come from a local, git-ignored `src/bin/secrets.rs` when
//! built with `--features local_secrets`, otherwise from the `WIFI_SSID` /
//! `WIFI_PASS` / `MQTT_BROKER_URI` build-time environment variables.

/// User segment of every MQTT topic.
pub const USER_ID: &str = "daniel";
/// Device segment of every MQTT topic.
pub const DEVICE_ID: &str = "device01";

/// Broker URI used when `MQTT_BROKER_URI` is not set at build time.
pub const DEFAULT_MQTT_BROKER_URI: &str = "mqtt://172.20.10.10";
pub const MQTT_BROKER_URI: &str = match option_env!("MQTT_BROKER_URI") {
    Some(uri) => uri,
    None => DEFAULT_MQTT_BROKER_URI,
};
pub const MQTT_BROKER_PORT: u16 = 1883;
pub const MQTT_CLIENT_ID: &str = "anti_theft_device_01";
pub const MQTT_KEEP_ALIVE_SECS: u16 = 15;
/// Fixed pause between a lost session and the next connection attempt.
pub const MQTT_RECONNECT_DELAY_MS: u64 = 2000;

// I2C bus wiring for the MPU6050
pub const I2C_SDA_GPIO: u8 = 21;
pub const I2C_SCL_GPIO: u8 = 22;
pub const I2C_FREQUENCY_HZ: u32 = 100_000;

pub const SENSOR_POLL_INTERVAL_MS: u64 = 1000;

/// Accelerometer delta (milli-g, any axis) between two samples that counts as tamper motion.
pub const MOTION_THRESHOLD_MG: u32 = 150;
/// Samples to stay quiet after reporting motion.
pub const MOTION_COOLDOWN_SAMPLES: u8 = 5;

/// MQTT broker endpoint parsed from an `mqtt://host[:port]` URI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrokerUri<'a> {
    host: &'a str,
    port: u16,
}

/// Why a broker URI was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UriError {
    /// Scheme other than `mqtt://` (TLS and websockets are not supported).
    UnsupportedScheme,
    MissingHost,
    InvalidPort,
}

impl<'a> BrokerUri<'a> {
    /// Parse `mqtt://host`, `mqtt://host:port` or a bare `host[:port]`.
    /// `default_port` applies when the URI carries none.
    pub fn parse(uri: &'a str, default_port: u16) -> Result<Self, UriError> {
        let rest = match uri.split_once("://") {
            Some(("mqtt", rest)) => rest,
            Some(_) => return Err(UriError::UnsupportedScheme),
            None => uri,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| UriError::InvalidPort)?;
                if port == 0 {
                    return Err(UriError::InvalidPort);
                }
                (host, port)
            }
            None => (rest, default_port),
        };

        if host.is_empty() {
            return Err(UriError::MissingHost);
        }

        Ok(Self { host, port })
    }

    pub fn host(&self) -> &'a str {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_broker() {
        let uri = BrokerUri::parse(DEFAULT_MQTT_BROKER_URI, MQTT_BROKER_PORT).unwrap();
        assert_eq!(uri.host(), "172.20.10.10");
        assert_eq!(uri.port(), 1883);
    }

    #[test]
    fn explicit_port_wins_over_default() {
        let uri = BrokerUri::parse("mqtt://broker.local:8883", 1883).unwrap();
        assert_eq!(uri.host(), "broker.local");
        assert_eq!(uri.port(), 8883);
    }

    #[test]
    fn bare_host_is_accepted() {
        let uri = BrokerUri::parse("192.168.0.245", 1883).unwrap();
        assert_eq!(uri.host(), "192.168.0.245");
        assert_eq!(uri.port(), 1883);
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            BrokerUri::parse("mqtts://broker:8883", 1883),
            Err(UriError::UnsupportedScheme)
        );
        assert_eq!(
            BrokerUri::parse("ws://broker", 1883),
            Err(UriError::UnsupportedScheme)
        );
    }

    #[test]
    fn rejects_bad_ports_and_empty_hosts() {
        assert_eq!(
            BrokerUri::parse("mqtt://broker:abc", 1883),
            Err(UriError::InvalidPort)
        );
        assert_eq!(
            BrokerUri::parse("mqtt://broker:0", 1883),
            Err(UriError::InvalidPort)
        );
        assert_eq!(BrokerUri::parse("mqtt://", 1883), Err(UriError::MissingHost));
        assert_eq!(
            BrokerUri::parse("mqtt://:1883", 1883),
            Err(UriError::MissingHost)
        );
    }
}
