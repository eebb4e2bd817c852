//! Stable exit codes for benchrun CLI commands.

use crate::bench::RunError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Generic failure: bad config, failed git or vagrant command, failed publish.
pub const INVALID: i32 = 1;
/// Preflight failed (host identity missing); nothing was touched.
pub const PRECONDITION: i32 = 3;
/// Another process holds the lock.
pub const CONTENDED: i32 = 4;
/// Stopped by SIGINT, SIGTERM or SIGHUP.
pub const INTERRUPTED: i32 = 130;

/// Map an error chain to the exit code reported to the caller.
///
/// A failed workload propagates its own code (or [`INVALID`] if it was killed
/// by a signal).
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(run) = cause.downcast_ref::<RunError>() {
            return match run {
                RunError::MissingHostIdentity { .. } => PRECONDITION,
                RunError::LockContended { .. } => CONTENDED,
                RunError::WorkloadFailed { .. } => run.workload_code().unwrap_or(INVALID),
                RunError::Interrupted => INTERRUPTED,
            };
        }
    }
    INVALID
}
