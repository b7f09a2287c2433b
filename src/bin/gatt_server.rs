#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

//! BLE alarm peripheral: advertises as `ESP32_ALARM`, serves the alarm
//! service and relays simulated sensor writes as notifications.

use defmt::{error, info, warn};
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::ble::controller::BleConnector;
use panic_rtt_target as _;
use trouble_host::prelude::*;

use anti_theft::gatt::{
    ADV_INTERVAL_MAX, ADV_INTERVAL_MIN, ALARM_SERVICE_UUID, AlarmServerState, DEVICE_NAME,
    SENSOR_VALUE_MAX, STATE_VALUE_LEN, WriteOutcome,
};

extern crate alloc;

esp_bootloader_esp_idf::esp_app_desc!();

const CONNECTIONS_MAX: usize = 1;
/// Signal + att
const L2CAP_CHANNELS_MAX: usize = 2;
const COMMAND_SLOTS: usize = 20;

type BleController = ExternalController<BleConnector<'static>, COMMAND_SLOTS>;

type StateValue = heapless::Vec<u8, STATE_VALUE_LEN>;
type SensorValue = heapless::Vec<u8, SENSOR_VALUE_MAX>;

#[gatt_server]
struct Server {
    alarm: AlarmService,
}

#[gatt_service(uuid = "00ff")]
struct AlarmService {
    #[characteristic(uuid = "ff01", read, write)]
    state: StateValue,
    #[characteristic(uuid = "ff02", notify)]
    sensor: SensorValue,
    #[characteristic(uuid = "ff03", read)]
    battery: heapless::Vec<u8, 4>,
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
        mut peripheral,
        runner,
        ..
    } = stack.build();

    let server = match Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: DEVICE_NAME,
        appearance: &appearance::UNKNOWN,
    })) {
        Ok(server) => server,
        Err(e) => {
            error!("gatt: server init failed: {:?}", e);
            idle().await
        }
    };

    let mut state = AlarmServerState::new();
    set_value(&server, &server.alarm.state, state.state_value());
    set_value(&server, &server.alarm.battery, state.battery_value());

    info!("gatt: server started, advertising as '{}'", DEVICE_NAME);
    match select(
        ble_task(runner),
        run_peripheral(&mut peripheral, &server, &mut state),
    )
    .await
    {
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

fn set_value<const N: usize>(
    server: &Server<'_>,
    characteristic: &Characteristic<heapless::Vec<u8, N>>,
    value: &[u8],
) {
    let Ok(value) = heapless::Vec::<u8, N>::from_slice(value) else {
        warn!("gatt: value of {} bytes does not fit", value.len());
        return;
    };
    if let Err(e) = characteristic.set(server, &value) {
        warn!("gatt: set value failed: {:?}", e);
    }
}

async fn ble_task<C: Controller, P: PacketPool>(mut runner: Runner<'_, C, P>) -> ! {
    loop {
        if let Err(e) = runner.run().await {
            error!("ble: runner error: {:?}", e);
        }
    }
}

/// Advertise, serve one client, re-advertise after it leaves.
async fn run_peripheral<'values, C: Controller>(
    peripheral: &mut Peripheral<'values, C, DefaultPacketPool>,
    server: &Server<'values>,
    state: &mut AlarmServerState,
) -> ! {
    loop {
        match advertise(peripheral, server).await {
            Ok(conn) => serve(server, &conn, state).await,
            Err(e) => {
                error!("gatt: advertising failed: {:?}", e);
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn advertise<'values, 'server, C: Controller>(
    peripheral: &mut Peripheral<'values, C, DefaultPacketPool>,
    server: &'server Server<'values>,
) -> Result<GattConnection<'values, 'server, DefaultPacketPool>, BleHostError<C::Error>> {
    let mut adv_data = [0; 31];
    let adv_len = AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids16(&[ALARM_SERVICE_UUID.to_le_bytes()]),
            AdStructure::CompleteLocalName(DEVICE_NAME.as_bytes()),
        ],
        &mut adv_data[..],
    )?;

    let params = AdvertisementParameters {
        interval_min: Duration::from_micros(ADV_INTERVAL_MIN as u64 * 625),
        interval_max: Duration::from_micros(ADV_INTERVAL_MAX as u64 * 625),
        ..Default::default()
    };

    let advertiser = peripheral
        .advertise(
            &params,
            Advertisement::ConnectableScannableUndirected {
                adv_data: &adv_data[..adv_len],
                scan_data: &[],
            },
        )
        .await?;
    info!("gatt: advertising");
    let conn = advertiser.accept().await?.with_attribute_server(server)?;
    info!("gatt: client connected");
    Ok(conn)
}

/// Serve one connection until the client goes away.
async fn serve<P: PacketPool>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, P>,
    state: &mut AlarmServerState,
) {
    let alarm = &server.alarm;
    loop {
        match conn.next().await {
            GattConnectionEvent::Disconnected { reason } => {
                info!("gatt: client disconnected: {:?}", reason);
                break;
            }
            GattConnectionEvent::Gatt { event } => {
                let mut relay: Option<SensorValue> = None;
                let mut wrote = false;
                if let GattEvent::Write(write) = &event {
                    info!("gatt: write handle {} len {}", write.handle(), write.data().len());
                    wrote = true;
                    if let WriteOutcome::NotifySensor(payload) = state.on_write(write.data()) {
                        relay = SensorValue::from_slice(payload).ok();
                    }
                }

                match event.accept() {
                    Ok(reply) => reply.send().await,
                    Err(e) => {
                        warn!("gatt: response error: {:?}", e);
                        // The stack rejected the write; nothing to relay.
                        relay = None;
                    }
                }

                // The stack stores whatever was written; keep the state characteristic canonical.
                if wrote {
                    set_value(server, &alarm.state, state.state_value());
                }

                if let Some(payload) = relay
                    && let Err(e) = alarm.sensor.notify(conn, &payload).await
                {
                    warn!("gatt: sensor notify failed (no subscriber?): {:?}", e);
                }
            }
            _ => {}
        }
    }
}
