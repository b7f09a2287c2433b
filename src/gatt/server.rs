//! Alarm GATT server state and write routing.

use super::SENSOR_VALUE_MAX;

/// Value of the state characteristic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmState {
    Armed,
    #[default]
    Disarmed,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Armed => "armed",
            AlarmState::Disarmed => "disarmed",
        }
    }

    /// Exact, case-sensitive match on the characteristic text.
    pub fn from_value(value: &[u8]) -> Option<Self> {
        match value {
            b"armed" => Some(AlarmState::Armed),
            b"disarmed" => Some(AlarmState::Disarmed),
            _ => None,
        }
    }
}

/// What the connection loop should do after a characteristic write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome<'a> {
    Ignored,
    StateChanged(AlarmState),
    /// Relay the written bytes to the subscribed client on the sensor characteristic.
    NotifySensor(&'a [u8]),
}

#[derive(Clone, Debug)]
pub struct AlarmServerState {
    state: AlarmState,
    battery: &'static str,
}

impl Default for AlarmServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmServerState {
    pub const fn new() -> Self {
        Self {
            state: AlarmState::Disarmed,
            battery: "99",
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn state_value(&self) -> &'static [u8] {
        self.state.as_str().as_bytes()
    }

    pub fn battery_value(&self) -> &'static [u8] {
        self.battery.as_bytes()
    }

    /// Route a client write. `armed`/`disarmed` switch the state, any other
    /// short payload is treated as a simulated sensor trigger.
    pub fn on_write<'a>(&mut self, value: &'a [u8]) -> WriteOutcome<'a> {
        if value.is_empty() {
            return WriteOutcome::Ignored;
        }

        if let Some(state) = AlarmState::from_value(value) {
            info!("gatt: state -> {}", state.as_str());
            self.state = state;
            return WriteOutcome::StateChanged(state);
        }

        if value.len() < SENSOR_VALUE_MAX {
            info!("gatt: simulated sensor write, notifying subscribers");
            WriteOutcome::NotifySensor(value)
        } else {
            warn!("gatt: write of {} bytes dropped", value.len());
            WriteOutcome::Ignored
        }
    }
}
