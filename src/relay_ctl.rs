use log::info;
use rppal::gpio::Gpio;
use rppal::gpio::Level;
use rppal::gpio::OutputPin;

use crate::relay_types::RelayState;

/// Hardware side of a watcher. Implementations must be cheap and idempotent;
/// the watcher calls them on every recognized status, changed or not.
pub trait Relay: Send {
    /// Heater id this relay is wired to.
    fn id(&self) -> &str;

    fn set(&mut self, state: RelayState);

    fn set_on(&mut self) {
        self.set(RelayState::On)
    }

    fn set_off(&mut self) {
        self.set(RelayState::Off)
    }
}

impl<R: Relay + ?Sized> Relay for Box<R> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn set(&mut self, state: RelayState) {
        (**self).set(state)
    }
}

pub struct GpioRelay {
    id: String,
    pin: OutputPin,
    inverted: bool,
}

impl GpioRelay {
    /// Claims `pin` as an output, starting at the level that means off.
    pub fn open(
        gpio: &Gpio,
        pin: u8,
        id: &str,
        inverted: bool,
    ) -> Result<GpioRelay, rppal::gpio::Error> {
        let pin = match level_for(RelayState::Off, inverted) {
            Level::High => gpio.get(pin)?.into_output_high(),
            Level::Low => gpio.get(pin)?.into_output_low(),
        };
        Ok(GpioRelay {
            id: id.to_string(),
            pin,
            inverted,
        })
    }
}

impl Relay for GpioRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set(&mut self, state: RelayState) {
        let level = level_for(state, self.inverted);
        info!(
            "Set relay '{}' (GPIO {}) to '{}' ({:?})",
            self.id,
            self.pin.pin(),
            state,
            level
        );
        self.pin.write(level);
    }
}

/// Stand-in used for dry runs: logs instead of driving a pin.
pub struct LoggingRelay {
    id: String,
    pin: u8,
}

impl LoggingRelay {
    pub fn new(pin: u8, id: &str) -> LoggingRelay {
        LoggingRelay {
            id: id.to_string(),
            pin,
        }
    }
}

impl Relay for LoggingRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set(&mut self, state: RelayState) {
        info!(
            "Set relay '{}' (GPIO {}, dry run) to '{}'",
            self.id, self.pin, state
        );
    }
}

// Relay boards are typically active-low, hence inverted by default.
fn level_for(state: RelayState, inverted: bool) -> Level {
    match (state, inverted) {
        (RelayState::On, false) | (RelayState::Off, true) => Level::High,
        (RelayState::Off, false) | (RelayState::On, true) => Level::Low,
    }
}
