//! Documentation build inside the jail. Output lands in `doc/`.

use anyhow::Result;
use tracing::instrument;

use crate::bench::{Bench, checkpoint};
use crate::core::selection::docs_command;
use crate::io::jail::{Jail, activate};
use crate::io::results::ResultsRepository;

/// Build the documentation at `reference` (a tag or commit).
///
/// Nothing is committed or published; the host identity is not required.
#[instrument(skip(bench))]
pub fn build_docs<J, R>(bench: &Bench<'_, J, R>, reference: &str) -> Result<()>
where
    J: Jail + ?Sized,
    R: ResultsRepository + ?Sized,
{
    let _lock = bench.hold_lock()?;
    checkpoint()?;
    bench.prepare_workspace()?;
    let active = activate(bench.jail())?;
    checkpoint()?;
    println!("-- Building documentation at {reference}");
    bench.execute(&active, &docs_command(reference))
}
