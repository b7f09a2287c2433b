use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rumqttc::{ConnectReturnCode, Event, Packet, QoS};

use pc_tools::relay::{AlarmLog, handle_message};
use pc_tools::{RECONNECT_DELAY, connect, timestamp};

/// Subscribe to the smartsec tree, echo every message and log sensor alerts.
#[derive(Parser)]
#[command(name = "alarm-relay", version)]
struct Args {
    /// Broker host
    #[arg(default_value = "127.0.0.1", env = "ALARM_RELAY_HOST")]
    host: String,
    /// Broker port
    #[arg(default_value_t = 1883, env = "ALARM_RELAY_PORT")]
    port: u16,
    /// Subscription filter
    #[arg(long, default_value = "smartsec/#", env = "ALARM_RELAY_TOPIC")]
    topic: String,
    /// File that receives one line per alert
    #[arg(long, default_value = "alarm_log.txt", env = "ALARM_RELAY_LOG")]
    log_file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let log = AlarmLog::new(args.log_file);

    let (client, mut connection) = connect("alarm-relay", &args.host, args.port);
    println!("alarm-relay: broker {}:{}", args.host, args.port);

    let stdout = io::stdout();
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    log::error!("connect refused: {:?}", ack.code);
                    continue;
                }
                println!("alarm-relay: connected, subscribing to {}", args.topic);
                client.try_subscribe(args.topic.as_str(), QoS::AtMostOnce)?;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let mut out = stdout.lock();
                if let Err(e) = handle_message(
                    &log,
                    &timestamp(),
                    &publish.topic,
                    &publish.payload,
                    &mut out,
                ) {
                    log::warn!("relay: {e:#}");
                }
                out.flush()?;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("mqtt connection error: {e}");
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    Ok(())
}
