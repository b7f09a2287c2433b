use anti_theft::command::Command;
use anti_theft::config::{DEVICE_ID, USER_ID};
use anyhow::Result;
use clap::Parser;
use rumqttc::{ConnectReturnCode, Event, Packet, QoS};

use pc_tools::console::{ConsoleTopics, DEFAULT_BROKER_HOST, console_line, parse_command};
use pc_tools::{RECONNECT_DELAY, connect};

/// Watch one device's topics and optionally send it a command.
#[derive(Parser)]
#[command(name = "command-console", version)]
struct Args {
    #[arg(long, default_value = DEFAULT_BROKER_HOST, env = "ANTI_THEFT_BROKER_HOST")]
    host: String,
    #[arg(long, default_value_t = 1883, env = "ANTI_THEFT_BROKER_PORT")]
    port: u16,
    #[arg(long, default_value = USER_ID, env = "ANTI_THEFT_USER")]
    user: String,
    #[arg(long, default_value = DEVICE_ID, env = "ANTI_THEFT_DEVICE")]
    device: String,
    /// Command to publish once connected: ARM, DISARM or LOCATE
    #[arg(long, value_parser = parse_command)]
    send: Option<Command>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let topics = ConsoleTopics::new(&args.user, &args.device)?;
    let mut pending = args.send;

    let (client, mut connection) = connect("command-console", &args.host, args.port);
    log::info!("connecting to {}:{}", args.host, args.port);

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    log::error!("connect refused: {:?}", ack.code);
                    continue;
                }
                println!("connected, listening on {}", topics.wildcard);
                client.try_subscribe(topics.wildcard.as_str(), QoS::AtLeastOnce)?;

                if let Some(command) = pending.take() {
                    client.try_publish(
                        topics.command.as_str(),
                        QoS::AtLeastOnce,
                        false,
                        command.as_str(),
                    )?;
                    println!("sent {} to {}", command.as_str(), topics.command);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                println!("{}", console_line(&publish.topic, &publish.payload));
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
