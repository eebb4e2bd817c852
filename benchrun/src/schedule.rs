//! Fixed selections: the scheduled job and the historical backfill.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument};

use crate::bench::{Bench, BenchOutcome, BenchRequest, checkpoint, preflight};
use crate::io::jail::Jail;
use crate::io::redirect::LogRedirect;
use crate::io::results::ResultsRepository;

/// Benchmark new commits with all output going to `log_path`.
///
/// Host identity and the lock are checked on the caller's streams, so a
/// refused start leaves the previous log intact. Once the lock is held the log
/// is truncated; failures are written to it before the streams are restored,
/// then returned to the caller as usual.
pub fn run_cron<J, R>(
    bench: &Bench<'_, J, R>,
    selection: &[String],
    log_path: &Path,
) -> Result<BenchOutcome>
where
    J: Jail + ?Sized,
    R: ResultsRepository + ?Sized,
{
    preflight(bench.paths(), false)?;
    let _lock = bench.hold_lock()?;
    let redirect = LogRedirect::to_file(log_path)?;
    let result = bench.run_benchmarks(&BenchRequest::new(selection.to_vec(), true));
    if let Err(err) = &result {
        eprintln!("ERROR: {err:#}");
    }
    drop(redirect);
    result
}

/// Run each selection in order under a single lock hold.
///
/// Stops at the first failing pass.
#[instrument(skip_all, fields(passes = selections.len()))]
pub fn populate<J, R>(
    bench: &Bench<'_, J, R>,
    selections: &[Vec<String>],
    upload: bool,
) -> Result<Vec<BenchOutcome>>
where
    J: Jail + ?Sized,
    R: ResultsRepository + ?Sized,
{
    // Host identity only; each pass reports its own upload decision.
    preflight(bench.paths(), false)?;
    let _lock = bench.hold_lock()?;
    let mut outcomes = Vec::with_capacity(selections.len());
    for (index, selection) in selections.iter().enumerate() {
        checkpoint()?;
        info!(pass = index + 1, ?selection, "populate pass");
        outcomes.push(bench.run_benchmarks(&BenchRequest::new(selection.clone(), upload))?);
    }
    Ok(outcomes)
}
