use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Signals;
use std::io;

/// Registers for SIGINT and SIGTERM. Call before spawning watchers so that an
/// early signal is not lost.
pub fn termination_signals() -> io::Result<Signals> {
    Signals::new([SIGINT, SIGTERM])
}

/// Blocks until SIGINT or SIGTERM arrives and returns its number.
pub fn wait_for_termination(signals: &mut Signals) -> Option<i32> {
    signals.forever().next()
}

pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        _ => "signal",
    }
}
