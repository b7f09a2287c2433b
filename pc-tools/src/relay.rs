//! Alarm relay: prints every `smartsec` message and appends sensor alerts to
//! a log file.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Longest payload the relay prints or logs.
pub const MAX_PAYLOAD_LEN: usize = 255;
/// Topics with more levels than this are only split this far.
pub const MAX_TOPIC_SEGMENTS: usize = 8;
const MIN_TOPIC_SEGMENTS: usize = 5;

const SENSOR_KIND: &str = "sensor";

/// `smartsec/<user>/<type>/<id>/<kind>[/...]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmartsecTopic<'a> {
    pub root: &'a str,
    pub user: &'a str,
    pub device_type: &'a str,
    pub device_id: &'a str,
    pub kind: &'a str,
}

impl<'a> SmartsecTopic<'a> {
    /// Split on `/`, ignoring empty levels. Needs at least five levels.
    pub fn parse(topic: &'a str) -> Option<Self> {
        let fields: Vec<&str> = topic
            .split('/')
            .filter(|part| !part.is_empty())
            .take(MAX_TOPIC_SEGMENTS)
            .collect();
        if fields.len() < MIN_TOPIC_SEGMENTS {
            return None;
        }
        Some(Self {
            root: fields[0],
            user: fields[1],
            device_type: fields[2],
            device_id: fields[3],
            kind: fields[4],
        })
    }

    pub fn is_sensor(&self) -> bool {
        self.kind == SENSOR_KIND
    }
}

/// Payload as text, cut at [`MAX_PAYLOAD_LEN`] bytes.
pub fn payload_text(payload: &[u8]) -> Cow<'_, str> {
    let end = payload.len().min(MAX_PAYLOAD_LEN);
    String::from_utf8_lossy(&payload[..end])
}

/// A sensor payload counts as an alert when it mentions `trigger` or is
/// exactly `open`.
pub fn is_alert(payload: &str) -> bool {
    payload.contains("trigger") || payload == "open"
}

pub fn message_line(timestamp: &str, topic: &str, payload: &str) -> String {
    format!("[{timestamp}] Topic: {topic} | Message: {payload}")
}

pub fn alert_line(timestamp: &str, device_id: &str, payload: &str) -> String {
    format!("{timestamp} ALERT device={device_id} payload={payload}")
}

/// Append-only alarm log. The file is opened per line so it can be rotated
/// while the relay runs.
#[derive(Clone, Debug)]
pub struct AlarmLog {
    path: PathBuf,
}

impl AlarmLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening alarm log {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("writing alarm log {}", self.path.display()))
    }
}

/// Handle one message: echo it to `out` and log it when it is a sensor
/// alert. Returns whether an alert was logged.
pub fn handle_message(
    log: &AlarmLog,
    timestamp: &str,
    topic: &str,
    payload: &[u8],
    out: &mut impl Write,
) -> Result<bool> {
    let text = payload_text(payload);
    writeln!(out, "{}", message_line(timestamp, topic, &text))?;

    let Some(parsed) = SmartsecTopic::parse(topic) else {
        return Ok(false);
    };
    if !parsed.is_sensor() || !is_alert(&text) {
        return Ok(false);
    }

    log.append(&alert_line(timestamp, parsed.device_id, &text))?;
    writeln!(out, " -> logged alert")?;
    Ok(true)
}
