//! Workload command composition.
//!
//! The workload tool is opaque: the runner only decides which argument vector
//! reaches the jail entrypoint.

/// Entrypoint verb for benchmark passes.
pub const BENCHMARKS_VERB: &str = "benchmarks";
/// Entrypoint verb for documentation builds.
pub const DOCS_VERB: &str = "docs";
/// Revision used by `docs` when none is given.
pub const DEFAULT_DOCS_REF: &str = "master";

/// Normalize user-supplied `run` arguments into a benchmark tool invocation.
///
/// A single leading `--` separator is dropped so `benchrun run -- -k` and
/// `benchrun run -k` are equivalent.
pub fn run_selection(args: &[String]) -> Vec<String> {
    let rest = match args.first() {
        Some(first) if first == "--" => &args[1..],
        _ => args,
    };
    let mut selection = Vec::with_capacity(rest.len() + 1);
    selection.push("run".to_string());
    selection.extend(rest.iter().cloned());
    selection
}

/// Full command handed to the jail for a benchmark pass.
pub fn benchmark_command(selection: &[String]) -> Vec<String> {
    let mut command = Vec::with_capacity(selection.len() + 1);
    command.push(BENCHMARKS_VERB.to_string());
    command.extend(selection.iter().cloned());
    command
}

/// Full command handed to the jail for a documentation build.
pub fn docs_command(reference: &str) -> Vec<String> {
    vec![DOCS_VERB.to_string(), reference.to_string()]
}

/// Narrow selection benchmarked by the scheduled job: new commits only.
pub fn default_cron_selection() -> Vec<String> {
    to_strings(&["run", "-k", "-e", "NEW", "--steps", "5"])
}

/// Historical selections used to backfill a fresh results repository.
pub fn default_populate_selections() -> Vec<Vec<String>> {
    vec![
        to_strings(&["run", "-k", "--steps", "11", "v0.5.0^..master"]),
        to_strings(&["run", "-k", "--steps", "11", "v0.7.0^..master"]),
        to_strings(&["run", "-k", "--steps", "21", "v0.9.0^..master"]),
        to_strings(&["run", "-k", "--steps", "51", "v0.5.0^..master"]),
    ]
}

fn to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}
