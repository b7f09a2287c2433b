//! BLE alarm service shared by the GATT server and the GATT client relay.
//!
//! Service `0x00FF` carries three characteristics:
//!
//! | UUID     | Name    | Properties | Value                          |
//! |----------|---------|------------|--------------------------------|
//! | `0xFF01` | state   | read/write | `armed` / `disarmed`           |
//! | `0xFF02` | sensor  | notify     | free-form text, < 64 bytes     |
//! | `0xFF03` | battery | read       | percentage as text, e.g. `99`  |

pub mod client;
pub mod server;

pub const DEVICE_NAME: &str = "ESP32_ALARM";

pub const ALARM_SERVICE_UUID: u16 = 0x00FF;
pub const STATE_CHAR_UUID: u16 = 0xFF01;
pub const SENSOR_CHAR_UUID: u16 = 0xFF02;
pub const BATTERY_CHAR_UUID: u16 = 0xFF03;

/// Writes at or above this length are never relayed as sensor notifications.
pub const SENSOR_VALUE_MAX: usize = 64;
/// Capacity of the state characteristic value. Every write the server relays
/// lands here first, so it must hold anything shorter than [`SENSOR_VALUE_MAX`].
pub const STATE_VALUE_LEN: usize = SENSOR_VALUE_MAX;

/// Advertising interval bounds in 0.625 ms units (20 ms to 40 ms).
pub const ADV_INTERVAL_MIN: u16 = 0x20;
pub const ADV_INTERVAL_MAX: u16 = 0x40;

pub use client::{
    NotifyText, SensorTopic, find_complete_local_name, is_alarm_advertisement, notification_text,
};
pub use server::{AlarmServerState, AlarmState, WriteOutcome};
