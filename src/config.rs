use std::collections::HashSet;
use thiserror::Error;

/// One configured relay: the BCM GPIO pin driving it and the heater id the
/// API knows it by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub pin: u8,
    pub id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RELAYS must not be empty")]
    Empty,

    #[error("RELAYS must be specified as CSV alternating GPIO pin and identifier, got {0} entries")]
    OddEntryCount(usize),

    #[error("Could not parse GPIO pin integer from \"{0}\"")]
    InvalidPin(String),

    #[error("Relay on GPIO pin {0} has an empty identifier")]
    EmptyId(u8),

    #[error("Relay identifier '{0}' is configured more than once")]
    DuplicateId(String),

    #[error("GPIO pin {0} is configured more than once")]
    DuplicatePin(u8),
}

/// Parses `pin,id,pin,id,...` into relay configs, in the order given.
pub fn parse_relays(relays: &str) -> Result<Vec<RelayConfig>, ConfigError> {
    if relays.trim().is_empty() {
        return Err(ConfigError::Empty);
    }

    let parts: Vec<&str> = relays.split(',').map(str::trim).collect();
    if parts.len() % 2 != 0 {
        return Err(ConfigError::OddEntryCount(parts.len()));
    }

    let mut result = Vec::with_capacity(parts.len() / 2);
    let mut ids = HashSet::new();
    let mut pins = HashSet::new();

    for pair in parts.chunks(2) {
        let pin = pair[0]
            .parse::<u8>()
            .map_err(|_| ConfigError::InvalidPin(pair[0].to_string()))?;
        let id = pair[1];

        if id.is_empty() {
            return Err(ConfigError::EmptyId(pin));
        }
        if !pins.insert(pin) {
            return Err(ConfigError::DuplicatePin(pin));
        }
        if !ids.insert(id) {
            return Err(ConfigError::DuplicateId(id.to_string()));
        }

        result.push(RelayConfig {
            pin,
            id: id.to_string(),
        });
    }

    Ok(result)
}
