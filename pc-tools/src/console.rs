//! Command console helpers: command-line parsing and output for one device.

use anti_theft::command::Command;
use anti_theft::topics::AntiTheftTopics;
use anyhow::{Result, anyhow};

/// Broker the console talks to when none is given.
pub const DEFAULT_BROKER_HOST: &str = "172.20.10.10";

/// `clap` value parser for `--send`.
pub fn parse_command(value: &str) -> Result<Command, String> {
    Command::parse(value.as_bytes())
        .ok_or_else(|| format!("unknown command '{value}', expected ARM, DISARM or LOCATE"))
}

/// Topics the console needs: the device wildcard and its command topic.
#[derive(Clone, Debug)]
pub struct ConsoleTopics {
    pub wildcard: String,
    pub command: String,
}

impl ConsoleTopics {
    pub fn new(user_id: &str, device_id: &str) -> Result<Self> {
        let topics = AntiTheftTopics::new(user_id, device_id)
            .map_err(|e| anyhow!("invalid user/device id: {e:?}"))?;
        let wildcard = topics
            .wildcard()
            .map_err(|e| anyhow!("device wildcard: {e:?}"))?;
        Ok(Self {
            wildcard: wildcard.as_str().to_owned(),
            command: topics.command().to_owned(),
        })
    }
}

pub fn console_line(topic: &str, payload: &[u8]) -> String {
    format!("[{topic}] {}", String::from_utf8_lossy(payload))
}
