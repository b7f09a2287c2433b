//! Remote commands delivered on the device's `command` topic.

/// Command understood by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Arm,
    Disarm,
    Locate,
}

impl Command {
    /// Decode a command payload.
    ///
    /// Matching is exact and case-sensitive after trimming ASCII whitespace,
    /// so `"ARM\n"` from a shell publisher is accepted while `""`, `"AR"` and
    /// `"arm"` are not.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload.trim_ascii() {
            b"ARM" => Some(Self::Arm),
            b"DISARM" => Some(Self::Disarm),
            b"LOCATE" => Some(Self::Locate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm => "ARM",
            Self::Disarm => "DISARM",
            Self::Locate => "LOCATE",
        }
    }

    /// Payload published on the `status` topic once the command is applied.
    pub fn status_reply(&self) -> Option<&'static str> {
        match self {
            Self::Arm => Some("ARMED"),
            Self::Disarm => Some("DISARMED"),
            Self::Locate => None,
        }
    }
}
