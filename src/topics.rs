//! MQTT topic namespace for the anti-theft device.
//!
//! Every topic follows `anti_theft/{user}/{device}/{category}[/{subcategory}]`.
//! The four fixed categories are precomputed once; anything else is built on
//! demand with [`AntiTheftTopics::build`].

use core::fmt::Write;
use heapless::String;

/// Capacity of a formatted topic.
pub const TOPIC_BUFFER_SIZE: usize = 128;
/// Capacity of the user and device identifiers.
pub const ID_BUFFER_SIZE: usize = 31;

pub const TOPIC_ROOT: &str = "anti_theft";

pub const CATEGORY_COMMAND: &str = "command";
pub const CATEGORY_STATUS: &str = "status";
pub const CATEGORY_EVENT: &str = "event";
pub const CATEGORY_DEBUG: &str = "debug";
pub const CATEGORY_AVAILABILITY: &str = "availability";

pub type Topic = String<TOPIC_BUFFER_SIZE>;
type Id = String<ID_BUFFER_SIZE>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopicError {
    /// User or device identifier longer than [`ID_BUFFER_SIZE`].
    IdTooLong,
    /// Formatted topic longer than [`TOPIC_BUFFER_SIZE`].
    TopicTooLong,
}

/// Topic set for one user/device pair.
#[derive(Clone, Debug)]
pub struct AntiTheftTopics {
    user_id: Id,
    device_id: Id,
    command: Topic,
    status: Topic,
    event: Topic,
    debug: Topic,
}

impl AntiTheftTopics {
    pub fn new(user_id: &str, device_id: &str) -> Result<Self, TopicError> {
        let user_id = Id::try_from(user_id).map_err(|_| TopicError::IdTooLong)?;
        let device_id = Id::try_from(device_id).map_err(|_| TopicError::IdTooLong)?;

        let command = format_topic(&user_id, &device_id, CATEGORY_COMMAND, None)?;
        let status = format_topic(&user_id, &device_id, CATEGORY_STATUS, None)?;
        let event = format_topic(&user_id, &device_id, CATEGORY_EVENT, None)?;
        let debug = format_topic(&user_id, &device_id, CATEGORY_DEBUG, None)?;

        Ok(Self {
            user_id,
            device_id,
            command,
            status,
            event,
            debug,
        })
    }

    /// Build `anti_theft/{user}/{device}/{category}[/{subcategory}]`.
    pub fn build(&self, category: &str, subcategory: Option<&str>) -> Result<Topic, TopicError> {
        format_topic(&self.user_id, &self.device_id, category, subcategory)
    }

    /// Filter matching every topic of this device.
    pub fn wildcard(&self) -> Result<Topic, TopicError> {
        self.build("#", None)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn debug(&self) -> &str {
        &self.debug
    }
}

fn format_topic(
    user_id: &str,
    device_id: &str,
    category: &str,
    subcategory: Option<&str>,
) -> Result<Topic, TopicError> {
    let mut topic = Topic::new();
    let written = match subcategory {
        Some(sub) => write!(
            topic,
            "{}/{}/{}/{}/{}",
            TOPIC_ROOT, user_id, device_id, category, sub
        ),
        None => write!(topic, "{}/{}/{}/{}", TOPIC_ROOT, user_id, device_id, category),
    };
    written.map_err(|_| TopicError::TopicTooLong)?;
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precomputes_fixed_categories() {
        let topics = AntiTheftTopics::new("daniel", "device01").unwrap();
        assert_eq!(topics.command(), "anti_theft/daniel/device01/command");
        assert_eq!(topics.status(), "anti_theft/daniel/device01/status");
        assert_eq!(topics.event(), "anti_theft/daniel/device01/event");
        assert_eq!(topics.debug(), "anti_theft/daniel/device01/debug");
        assert_eq!(topics.user_id(), "daniel");
        assert_eq!(topics.device_id(), "device01");
    }

    #[test]
    fn builds_with_and_without_subcategory() {
        let topics = AntiTheftTopics::new("daniel", "device01").unwrap();
        assert_eq!(
            topics.build("command", None).unwrap().as_str(),
            topics.command()
        );
        assert_eq!(
            topics.build("event", Some("motion")).unwrap().as_str(),
            "anti_theft/daniel/device01/event/motion"
        );
        assert_eq!(
            topics.wildcard().unwrap().as_str(),
            "anti_theft/daniel/device01/#"
        );
    }

    #[test]
    fn rejects_identifiers_over_capacity() {
        let long = "u".repeat(ID_BUFFER_SIZE + 1);
        assert_eq!(
            AntiTheftTopics::new(&long, "device01").unwrap_err(),
            TopicError::IdTooLong
        );
        assert_eq!(
            AntiTheftTopics::new("daniel", &long).unwrap_err(),
            TopicError::IdTooLong
        );

        let max = "u".repeat(ID_BUFFER_SIZE);
        assert!(AntiTheftTopics::new(&max, &max).is_ok());
    }

    #[test]
    fn reports_overflow_instead_of_truncating() {
        let topics = AntiTheftTopics::new("daniel", "device01").unwrap();
        let sub = "s".repeat(TOPIC_BUFFER_SIZE);
        assert_eq!(
            topics.build("event", Some(&sub)).unwrap_err(),
            TopicError::TopicTooLong
        );
    }
}
