//! Benchmark and documentation runner for a dedicated benchmark host.
//!
//! Runs an opaque workload inside a jail (a Vagrant VM or the host itself),
//! serializes runs with a crash-aware filesystem lock and records the output
//! in a git results repository, optionally publishing the generated report
//! to a history-less branch.
//!
//! - **[`core`]**: Pure logic (workload command composition, quoting, upload
//!   decisions). No I/O.
//! - **[`io`]**: Side effects (lock, jails, git, processes, signals).
//!
//! Orchestration modules ([`bench`], [`schedule`], [`docs`]) combine the two
//! to implement CLI commands.

pub mod bench;
pub mod core;
pub mod docs;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod schedule;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
