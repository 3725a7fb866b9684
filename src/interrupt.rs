//! Soft-interrupt handling.
//!
//! SIGINT, SIGTERM, and SIGHUP increment a process-wide counter. Below the
//! limit, a flag is considered set and sync loops stop cleanly at the next
//! part boundary; at the limit the process exits immediately. The counter
//! lives behind this narrow API rather than a bare global.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::consts::SOFT_INTERRUPT_LIMIT;
use crate::error::{Error, Result};

static SIGNAL_COUNT: AtomicUsize = AtomicUsize::new(0);
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "signal",
    }
}

/// Install the signal handler thread. Idempotent; later calls are no-ops.
pub fn enable_soft_interruption() {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP]) {
        Ok(signals) => signals,
        Err(e) => {
            log::warn!("could not install signal handlers: {e}");
            HANDLER_INSTALLED.store(false, Ordering::SeqCst);
            return;
        }
    };
    std::thread::spawn(move || {
        for signal in signals.forever() {
            let count = SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
            if count < SOFT_INTERRUPT_LIMIT {
                eprintln!(
                    "WARNING: {} received ({count}/{SOFT_INTERRUPT_LIMIT}) — \
                     will stop after the current operation.",
                    signal_name(signal)
                );
            } else {
                eprintln!(
                    "{} received {SOFT_INTERRUPT_LIMIT} times — exiting immediately.",
                    signal_name(signal)
                );
                signal_hook::low_level::exit(1);
            }
        }
    });
}

/// Whether a soft interrupt has been requested.
pub fn check_interrupted() -> bool {
    SIGNAL_COUNT.load(Ordering::SeqCst) > 0
}

/// Fail with `Error::Interrupted` if a soft interrupt is pending. Called at
/// part boundaries.
pub fn bail_if_interrupted() -> Result<()> {
    if check_interrupted() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

/// Clear the pending-interrupt state. For tests and long-lived embedders.
pub fn reset_interrupted() {
    SIGNAL_COUNT.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_api_round_trip() {
        reset_interrupted();
        assert!(!check_interrupted());
        assert!(bail_if_interrupted().is_ok());
        SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst);
        assert!(check_interrupted());
        assert!(matches!(bail_if_interrupted(), Err(Error::Interrupted)));
        reset_interrupted();
        assert!(!check_interrupted());
    }
}
