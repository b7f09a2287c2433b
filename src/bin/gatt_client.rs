#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

//! BLE alarm relay: finds `ESP32_ALARM`, subscribes to its sensor
//! characteristic and publishes every notification on the smartsec topic.

use defmt::{error, info, warn};
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::ble::controller::BleConnector;
use panic_rtt_target as _;
use trouble_host::prelude::*;

use anti_theft::config::MQTT_BROKER_URI;
use anti_theft::gatt::{
    ALARM_SERVICE_UUID, DEVICE_NAME, SENSOR_CHAR_UUID, SENSOR_VALUE_MAX, SensorTopic,
    is_alarm_advertisement, notification_text,
};
use anti_theft::mqtt::{LoggerPublisher, MqttApp, MqttEvent};

extern crate alloc;

esp_bootloader_esp_idf::esp_app_desc!();

const CONNECTIONS_MAX: usize = 1;
/// Signal + att
const L2CAP_CHANNELS_MAX: usize = 2;
const COMMAND_SLOTS: usize = 20;
const SCAN_WINDOW: Duration = Duration::from_secs(30);

type BleController = ExternalController<BleConnector<'static>, COMMAND_SLOTS>;

/// Address of the first matching advertiser in the current scan window.
static TARGET_FOUND: Signal<CriticalSectionRawMutex, Address> = Signal::new();

struct AlarmScanHandler;

impl EventHandler for AlarmScanHandler {
    fn on_adv_reports(&self, reports: bt_hci::param::LeAdvReportsIter) {
        for report in reports {
            let Ok(report) = report else { continue };
            if is_alarm_advertisement(report.data) {
                TARGET_FOUND.signal(Address {
                    kind: report.addr_kind,
                    addr: report.addr,
                });
            }
        }
    }
}

#[esp_rtos::main]
async fn main(_spawner: embassy_executor::Spawner) -> ! {
    rtt_target::rtt_init_defmt!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_interrupt =
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_interrupt.software_interrupt0);

    let radio_init = match esp_radio::init() {
        Ok(radio_init) => {
            use alloc::boxed::Box;
            let radio_init: &'static _ = Box::leak(Box::new(radio_init));
            radio_init
        }
        Err(e) => {
            error!("esp_radio init failed: {:?}", e);
            idle().await
        }
    };
    let connector = match BleConnector::new(radio_init, peripherals.BT, Default::default()) {
        Ok(connector) => connector,
        Err(e) => {
            error!("ble: connector init failed: {:?}", e);
            idle().await
        }
    };
    let controller: BleController = ExternalController::new(connector);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
        HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(ble_addr());
    let Host {
        central, runner, ..
    } = stack.build();

    // No broker on this board: the relay publishes through the log-only client.
    let mut app = MqttApp::new();
    app.start(LoggerPublisher::new(), MQTT_BROKER_URI);

    info!("gatt: client ready, scanning for '{}'", DEVICE_NAME);
    match select(ble_task(runner), run_central(&stack, central, &mut app)).await {
        Either::First(never) => never,
        Either::Second(never) => never,
    }
}

async fn idle() -> ! {
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

fn ble_addr() -> Address {
    let mut addr = Efuse::read_base_mac_address();
    addr.reverse();
    let mut raw = [0u8; 6];
    raw.copy_from_slice(&addr[..6]);
    Address::random(raw)
}

async fn ble_task<C: Controller, P: PacketPool>(mut runner: Runner<'_, C, P>) -> ! {
    loop {
        if let Err(e) = runner.run_with_handler(&AlarmScanHandler).await {
            error!("ble: runner error: {:?}", e);
        }
    }
}

/// Scan in fixed windows until the alarm shows up. Hands the central role
/// back together with the advertiser's address.
async fn find_alarm<'d, C: Controller>(
    central: Central<'d, C, DefaultPacketPool>,
) -> (Central<'d, C, DefaultPacketPool>, Address) {
    let config = ScanConfig {
        active: true,
        timeout: SCAN_WINDOW,
        ..Default::default()
    };
    let mut scanner = Scanner::new(central);

    loop {
        TARGET_FOUND.reset();
        let session = match scanner.scan(&config).await {
            Ok(session) => session,
            Err(e) => {
                error!("gatt: scan start failed: {:?}", e);
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };

        let found = select(TARGET_FOUND.wait(), Timer::after(SCAN_WINDOW)).await;
        drop(session);
        match found {
            Either::First(addr) => {
                info!("gatt: found target {}, connecting...", DEVICE_NAME);
                return (scanner.into_inner(), addr);
            }
            Either::Second(()) => info!("gatt: scan window elapsed, rescanning"),
        }
    }
}

/// Scan, connect, relay notifications, and start over after every disconnect.
async fn run_central<'d, C: Controller>(
    stack: &'d Stack<'d, C, DefaultPacketPool>,
    mut central: Central<'d, C, DefaultPacketPool>,
    app: &mut MqttApp<LoggerPublisher>,
) -> ! {
    let topic = SensorTopic::default();

    loop {
        let (returned, target) = find_alarm(central).await;
        central = returned;

        let config = ConnectConfig {
            connect_params: Default::default(),
            scan_config: ScanConfig {
                filter_accept_list: &[(target.kind, &target.addr)],
                ..Default::default()
            },
        };
        let conn = match central.connect(&config).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("gatt: connect failed: {:?}", e);
                continue;
            }
        };
        info!("gatt: connected");
        app.on_event(&MqttEvent::Connected);

        let client = match GattClient::<C, DefaultPacketPool, 10>::new(stack, &conn).await {
            Ok(client) => client,
            Err(e) => {
                warn!("gatt: client setup failed: {:?}", e);
                app.on_event(&MqttEvent::Disconnected);
                continue;
            }
        };

        match select(client.task(), relay_notifications(&client, &topic, app)).await {
            Either::First(result) => {
                if let Err(e) = result {
                    warn!("gatt: connection ended: {:?}", e);
                }
            }
            Either::Second(result) => {
                if let Err(e) = result {
                    warn!("gatt: discovery failed: {:?}", e);
                }
            }
        }
        warn!("gatt: disconnected, rescanning");
        app.on_event(&MqttEvent::Disconnected);
    }
}

/// Discover the sensor characteristic, subscribe, and publish each notification.
async fn relay_notifications<C: Controller>(
    client: &GattClient<'_, C, DefaultPacketPool, 10>,
    topic: &SensorTopic,
    app: &mut MqttApp<LoggerPublisher>,
) -> Result<(), BleHostError<C::Error>> {
    let services = client
        .services_by_uuid(&Uuid::new_short(ALARM_SERVICE_UUID))
        .await?;
    let Some(service) = services.first() else {
        warn!("gatt: service {=u16:#x} not found", ALARM_SERVICE_UUID);
        return Ok(());
    };
    info!("gatt: found service {=u16:#x}", ALARM_SERVICE_UUID);

    let sensor: Characteristic<[u8; SENSOR_VALUE_MAX]> = client
        .characteristic_by_uuid(service, &Uuid::new_short(SENSOR_CHAR_UUID))
        .await?;
    info!("gatt: sensor characteristic found, subscribing");

    // Writes the CCC descriptor on the server.
    let mut listener = client.subscribe(&sensor, false).await?;
    loop {
        let notification = listener.next().await;
        let text = notification_text(notification.as_ref());
        info!("gatt: NOTIFY: {=[u8]:a}", text.as_slice());
        if let Err(e) = app.publish(topic.as_str(), &text).await {
            warn!("gatt: relay publish failed: {:?}", e);
        }
    }
}
