#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use defmt::{error, info, warn};
use esp_hal::clock::CpuClock;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use panic_rtt_target as _;

use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, Stack, StackResources};
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;

use anti_theft::config::{
    DEVICE_ID, I2C_FREQUENCY_HZ, I2C_SCL_GPIO, I2C_SDA_GPIO, MQTT_BROKER_URI, USER_ID,
};
use anti_theft::mpu6050::Mpu6050;
use anti_theft::mqtt::session::{MqttCredentials, mqtt_session_task};
use anti_theft::net::{net_runner_task, wifi_task};
use anti_theft::sensor::motion_sensor_task;

// WiFi and broker credentials kept out of git
#[cfg(feature = "local_secrets")]
mod secrets;
#[cfg(feature = "local_secrets")]
use secrets::{
    MQTT_PASSWORD as LOCAL_MQTT_PASSWORD, MQTT_USERNAME as LOCAL_MQTT_USERNAME,
    WIFI_PASS as LOCAL_PASS, WIFI_SSID as LOCAL_SSID,
};

extern crate alloc;

// App descriptor expected by the ESP-IDF second-stage bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

// 3 sockets: DHCP, DNS, MQTT
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static NET_STACK: StaticCell<Stack<'static>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_defmt!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_interrupt =
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_interrupt.software_interrupt0);

    info!("anti-theft: device {}/{} starting", USER_ID, DEVICE_ID);

    // --- WiFi station + MQTT session --------------------------------------------------------
    // `src/bin/secrets.rs` under `local_secrets`, build-time env vars otherwise.
    #[cfg(feature = "local_secrets")]
    let (ssid, pass) = (LOCAL_SSID, LOCAL_PASS);
    #[cfg(not(feature = "local_secrets"))]
    let (ssid, pass) = (
        option_env!("WIFI_SSID").unwrap_or(""),
        option_env!("WIFI_PASS").unwrap_or(""),
    );

    #[cfg(feature = "local_secrets")]
    let credentials = MqttCredentials {
        username: LOCAL_MQTT_USERNAME,
        password: LOCAL_MQTT_PASSWORD,
    };
    #[cfg(not(feature = "local_secrets"))]
    let credentials = MqttCredentials {
        username: option_env!("MQTT_USERNAME").unwrap_or(""),
        password: option_env!("MQTT_PASSWORD").unwrap_or(""),
    };

    if ssid.is_empty() {
        warn!("wifi: no SSID configured, running offline (motion is logged only)");
    } else {
        match esp_radio::init() {
            Ok(radio_init) => {
                use alloc::boxed::Box;
                let radio_init: &'static _ = Box::leak(Box::new(radio_init));

                match esp_radio::wifi::new(
                    radio_init,
                    peripherals.WIFI,
                    esp_radio::wifi::Config::default(),
                ) {
                    Ok((wifi, ifaces)) => {
                        let client = esp_radio::wifi::ClientConfig::default()
                            .with_ssid(ssid.into())
                            .with_password(pass.into());

                        let resources = STACK_RESOURCES.init(StackResources::new());
                        let (stack, runner) = embassy_net::new(
                            ifaces.sta,
                            NetConfig::dhcpv4(Default::default()),
                            resources,
                            embassy_time::Instant::now().as_ticks(),
                        );
                        let stack = NET_STACK.init(stack);

                        spawner.spawn(net_runner_task(runner)).ok();
                        spawner.spawn(wifi_task(wifi, client, stack)).ok();
                        info!("wifi: connecting to '{}'", ssid);

                        spawner.spawn(mqtt_session_task(stack, credentials)).ok();
                        info!("mqtt: broker {}", MQTT_BROKER_URI);
                    }
                    Err(e) => error!("wifi: new() failed: {:?}", e),
                }
            }
            Err(e) => error!("esp_radio init failed: {:?}", e),
        }
    }

    // --- MPU-6050 on I2C0 ------------------------------------------------------------------
    info!(
        "sensor: I2C SDA=GPIO{} SCL=GPIO{} @ {} Hz",
        I2C_SDA_GPIO, I2C_SCL_GPIO, I2C_FREQUENCY_HZ
    );
    let i2c_config = I2cConfig::default().with_frequency(Rate::from_hz(I2C_FREQUENCY_HZ));
    match I2c::new(peripherals.I2C0, i2c_config) {
        Ok(i2c) => {
            let i2c = i2c
                .with_sda(peripherals.GPIO21)
                .with_scl(peripherals.GPIO22)
                .into_async();
            spawner.spawn(motion_sensor_task(Mpu6050::new(i2c))).ok();
        }
        Err(e) => error!("sensor: I2C config rejected: {:?}", e),
    }

    info!("anti-theft: running");

    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}
