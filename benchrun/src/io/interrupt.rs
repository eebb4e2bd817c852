//! Operator interrupts (SIGINT, SIGTERM, SIGHUP).
//!
//! The handler only records that a signal arrived. A waiting parent relays
//! the signal to its running child (see `process::run_status`), and the
//! orchestrator checks the flag between steps so the lock and jail guards
//! unwind normally.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{Context, Result};
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

static REQUESTED: AtomicBool = AtomicBool::new(false);
static RECEIVED: AtomicI32 = AtomicI32::new(0);

/// Signals that request an orderly stop.
pub const HANDLED: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Install the flag-setting handler. Call once, early in `main`.
#[allow(unsafe_code)]
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in HANDLED {
        // SAFETY: the handler only stores into atomics, which is async-signal-safe.
        unsafe { signal::sigaction(sig, &action) }
            .with_context(|| format!("install {sig} handler"))?;
    }
    debug!("interrupt handlers installed");
    Ok(())
}

extern "C" fn on_signal(sig: libc::c_int) {
    RECEIVED.store(sig, Ordering::SeqCst);
    REQUESTED.store(true, Ordering::SeqCst);
}

/// Whether an interrupt has been received.
pub fn requested() -> bool {
    REQUESTED.load(Ordering::SeqCst)
}

/// The last signal received, if any.
pub fn received() -> Option<Signal> {
    match RECEIVED.load(Ordering::SeqCst) {
        0 => None,
        raw => Signal::try_from(raw).ok(),
    }
}

/// Clear the recorded interrupt.
#[cfg(any(test, feature = "test-support"))]
pub fn reset() {
    REQUESTED.store(false, Ordering::SeqCst);
    RECEIVED.store(0, Ordering::SeqCst);
}
