//! Anti-theft device library.
//!
//! The device arms and disarms over MQTT, watches an MPU6050 for tamper
//! motion while armed, and exposes the alarm state over a BLE GATT service.
//! Everything outside the `firmware` feature is platform independent and is
//! exercised by the host test suite; the `firmware` modules bind it to
//! esp-radio, embassy-net and rust-mqtt.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod command;
pub mod config;
pub mod gatt;
pub mod link;
pub mod motion;
pub mod mpu6050;
pub mod mqtt;
pub mod topics;

#[cfg(feature = "firmware")]
pub mod net;
#[cfg(feature = "firmware")]
pub mod sensor;
