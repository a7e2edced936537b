use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    /// Maps the API's `value` field onto a relay state. Returns `None` for
    /// anything other than `"on"` and `"off"`.
    pub fn from_wire(value: &str) -> Option<RelayState> {
        match value {
            "on" => Some(RelayState::On),
            "off" => Some(RelayState::Off),
            _ => None,
        }
    }
}

impl Display for RelayState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RelayState::On => write!(f, "on"),
            RelayState::Off => write!(f, "off"),
        }
    }
}

/// Desired heater state as reported by the API for one relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaterStatus {
    pub value: String,
    pub version: i64,
}

impl HeaterStatus {
    pub fn new<S: Into<String>>(value: S, version: i64) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }

    pub fn state(&self) -> Option<RelayState> {
        RelayState::from_wire(&self.value)
    }
}

impl Display for HeaterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "'{}' (version {})", self.value, self.version)
    }
}
