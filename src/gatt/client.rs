//! Alarm GATT client helpers: advertisement matching, relay topic and
//! notification capture.

use core::fmt::Write;

use super::DEVICE_NAME;
use crate::topics::{Topic, TopicError};

/// GAP AD type "Complete Local Name".
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Longest notification kept for logging and relaying.
pub const NOTIFY_TEXT_MAX: usize = 127;

pub type NotifyText = heapless::Vec<u8, NOTIFY_TEXT_MAX>;

/// Find the complete local name in raw advertising data.
///
/// Each AD structure is `len, type, data[len - 1]`. A zero length ends the
/// data early; a length running past the buffer is treated as malformed.
pub fn find_complete_local_name(adv_data: &[u8]) -> Option<&[u8]> {
    let mut rest = adv_data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || len > tail.len() {
            return None;
        }
        let (structure, next) = tail.split_at(len);
        if structure[0] == AD_TYPE_COMPLETE_LOCAL_NAME {
            return Some(&structure[1..]);
        }
        rest = next;
    }
    None
}

pub fn is_alarm_advertisement(adv_data: &[u8]) -> bool {
    find_complete_local_name(adv_data) == Some(DEVICE_NAME.as_bytes())
}

/// Copy a notification value, keeping at most [`NOTIFY_TEXT_MAX`] bytes.
pub fn notification_text(value: &[u8]) -> NotifyText {
    let keep = value.len().min(NOTIFY_TEXT_MAX);
    if keep < value.len() {
        warn!("gatt: notification of {} bytes truncated", value.len());
    }
    let mut text = NotifyText::new();
    // keep <= capacity
    let _ = text.extend_from_slice(&value[..keep]);
    text
}

/// `smartsec/{user}/{kind}/{id}/sensor`, the topic the relay publishes on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorTopic(Topic);

impl SensorTopic {
    pub fn new(user: &str, kind: &str, id: &str) -> Result<Self, TopicError> {
        let mut topic = Topic::new();
        write!(topic, "smartsec/{}/{}/{}/sensor", user, kind, id)
            .map_err(|_| TopicError::TopicTooLong)?;
        Ok(Self(topic))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SensorTopic {
    fn default() -> Self {
        Self(Topic::try_from("smartsec/user123/esp32_alarm/door_01/sensor").unwrap_or_default())
    }
}
