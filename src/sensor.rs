//! MPU-6050 polling task.
//!
//! Logs the accelerometer once per poll, runs tamper detection and forwards
//! motion and sensor faults to the MQTT session as [`DeviceEvent`]s.

use embassy_executor::task;
use embassy_time::{Duration, Timer};

use crate::config::{MOTION_COOLDOWN_SAMPLES, MOTION_THRESHOLD_MG, SENSOR_POLL_INTERVAL_MS};
use crate::motion::MotionDetector;
use crate::mpu6050::Mpu6050;
use crate::mqtt::handler::DeviceEvent;
use crate::mqtt::session::DEVICE_EVENTS;

pub type SensorI2c = esp_hal::i2c::master::I2c<'static, esp_hal::Async>;

fn report(event: DeviceEvent) {
    if DEVICE_EVENTS.try_send(event).is_err() {
        warn!("sensor: event channel full, dropping {:?}", event);
    }
}

/// Sensor task: wakes the MPU-6050, then samples it every poll interval.
///
/// A failed read is reported once per fault streak and restarts detection
/// from a fresh baseline once the chip answers again.
#[task]
pub async fn motion_sensor_task(mut mpu: Mpu6050<SensorI2c>) {
    info!("sensor: task started");
    let poll = Duration::from_millis(SENSOR_POLL_INTERVAL_MS);

    while let Err(e) = mpu.init().await {
        error!("sensor: MPU6050 init failed: {:?}", e);
        Timer::after(poll).await;
    }

    let mut detector = MotionDetector::new(MOTION_THRESHOLD_MG, MOTION_COOLDOWN_SAMPLES);
    let mut faulted = false;

    loop {
        match mpu.read_raw().await {
            Ok(raw) => {
                faulted = false;
                let data = raw.scaled();
                info!(
                    "sensor: accel x={} y={} z={} g, temp={} C",
                    data.accel_g[0], data.accel_g[1], data.accel_g[2], data.temp_c
                );

                if let Some(motion) = detector.update(&raw) {
                    report(DeviceEvent::Motion {
                        peak_delta_mg: motion.peak_delta_mg,
                    });
                }
            }
            Err(e) => {
                error!("sensor: MPU6050 read failed: {:?}", e);
                detector.reset();
                if !faulted {
                    faulted = true;
                    report(DeviceEvent::SensorFault);
                }
            }
        }

        Timer::after(poll).await;
    }
}
