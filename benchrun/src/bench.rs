//! Orchestration for a single benchmark pass.
//!
//! Sequence: preflight, lock, workspace reset, jail up, sync-in, workload,
//! jail down, record results, and (when allowed) upload and publish. The lock
//! and the jail are held by guards, so every exit path releases them.

use std::path::PathBuf;
use std::process::ExitStatus;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::selection::benchmark_command;
use crate::core::types::UploadDecision;
use crate::io::interrupt;
use crate::io::jail::{ActiveJail, Jail, RunEnv, activate};
use crate::io::lock::{LockFile, LockGuard};
use crate::io::results::ResultsRepository;
use crate::io::workspace::{BenchPaths, ensure_results_link, reset_output_dirs};

/// Failures the CLI maps to distinct exit codes.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("create a file '{}' with the desired hostname", path.display())]
    MissingHostIdentity { path: PathBuf },

    #[error(
        "another process is currently running; wait until it is done, or remove '{}'",
        path.display()
    )]
    LockContended { path: PathBuf },

    #[error("workload failed with {status}")]
    WorkloadFailed { status: ExitStatus },

    #[error("interrupted")]
    Interrupted,
}

impl RunError {
    /// Exit code the workload itself reported, if this is a workload failure.
    pub fn workload_code(&self) -> Option<i32> {
        match self {
            Self::WorkloadFailed { status } => status.code(),
            _ => None,
        }
    }
}

/// Outcome of the host checks made before anything is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub upload: UploadDecision,
    pub warnings: Vec<String>,
}

/// Check the host files a benchmark pass depends on.
///
/// A missing host identity aborts; a missing deploy key only disables upload.
pub fn preflight(paths: &BenchPaths, upload_requested: bool) -> Result<Preflight, RunError> {
    if !paths.hostname.is_file() {
        return Err(RunError::MissingHostIdentity {
            path: paths.hostname.clone(),
        });
    }
    let upload = UploadDecision::decide(upload_requested, paths.deploy_key.is_file());
    let mut warnings = Vec::new();
    if upload == UploadDecision::MissingCredential {
        let message = format!(
            "SSH deployment key for uploads is missing; run ssh-keygen -f {}",
            paths.deploy_key.display()
        );
        println!("WARNING: {message}");
        println!("Upload will not be performed on this run!");
        warn!(deploy_key = %paths.deploy_key.display(), "upload disabled");
        warnings.push(message);
    }
    Ok(Preflight { upload, warnings })
}

/// One benchmark pass as requested by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchRequest {
    /// Arguments for the benchmark tool, e.g. `["run", "-k", "NEW"]`.
    pub selection: Vec<String>,
    /// Upload intent; preflight may still veto it.
    pub upload: bool,
}

impl BenchRequest {
    pub fn new(selection: Vec<String>, upload: bool) -> Self {
        Self { selection, upload }
    }
}

/// Result of a completed benchmark pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchOutcome {
    /// A results commit was created on the data branch.
    pub committed: bool,
    /// Results were pushed and the report published.
    pub uploaded: bool,
    pub warnings: Vec<String>,
}

/// Collaborators for one invocation of the runner.
pub struct Bench<'a, J: Jail + ?Sized, R: ResultsRepository + ?Sized> {
    paths: &'a BenchPaths,
    lock: &'a LockFile,
    jail: &'a J,
    results: &'a R,
    env: RunEnv,
}

impl<'a, J: Jail + ?Sized, R: ResultsRepository + ?Sized> Bench<'a, J, R> {
    pub fn new(paths: &'a BenchPaths, lock: &'a LockFile, jail: &'a J, results: &'a R) -> Self {
        Self {
            paths,
            lock,
            jail,
            results,
            env: RunEnv::from_paths(paths),
        }
    }

    pub fn paths(&self) -> &BenchPaths {
        self.paths
    }

    pub fn jail(&self) -> &J {
        self.jail
    }

    /// Take the machine lock without waiting.
    ///
    /// Reentrant: succeeds immediately while this process already holds it.
    pub fn hold_lock(&self) -> Result<LockGuard<'a>> {
        match self.lock.guard(false)? {
            Some(guard) => Ok(guard),
            None => Err(RunError::LockContended {
                path: self.lock.path().to_path_buf(),
            }
            .into()),
        }
    }

    /// Clone the results repository if needed and reset generated output.
    pub fn prepare_workspace(&self) -> Result<()> {
        self.results.ensure_clone()?;
        reset_output_dirs(self.paths)?;
        ensure_results_link(self.paths)?;
        Ok(())
    }

    /// Run `command` in the active jail; a non-zero exit is an error.
    pub fn execute(&self, active: &ActiveJail<'_, J>, command: &[String]) -> Result<()> {
        let status = active.run(command, &self.env)?;
        if status.success() {
            return Ok(());
        }
        if interrupt::requested() {
            return Err(RunError::Interrupted.into());
        }
        warn!(exit_code = ?status.code(), "workload failed");
        Err(RunError::WorkloadFailed { status }.into())
    }

    /// Bring the jail backing image into existence under the lock.
    pub fn setup_jail(&self, force: bool) -> Result<()> {
        let _lock = self.hold_lock()?;
        self.jail.prepare(force)
    }

    /// Execute one full benchmark pass.
    #[instrument(skip_all, fields(jail = %self.jail.kind(), upload = request.upload))]
    pub fn run_benchmarks(&self, request: &BenchRequest) -> Result<BenchOutcome> {
        let preflight = preflight(self.paths, request.upload)?;
        let _lock = self.hold_lock()?;
        checkpoint()?;
        self.prepare_workspace()?;

        {
            let active = activate(self.jail)?;
            checkpoint()?;
            println!("-- Doing a benchmark run");
            self.results.sync_in()?;
            checkpoint()?;
            self.execute(&active, &benchmark_command(&request.selection))?;
        }
        checkpoint()?;

        println!("-- Adding results");
        let committed = self.results.record_results()?;

        let uploaded = preflight.upload.upload();
        if uploaded {
            checkpoint()?;
            println!("-- Uploading results");
            self.results.push_results(&self.env)?;
            self.results
                .publish_report(&self.paths.html_dir, &self.env)?;
        }

        info!(committed, uploaded, "benchmark pass complete");
        Ok(BenchOutcome {
            committed,
            uploaded,
            warnings: preflight.warnings,
        })
    }
}

/// Stop between steps once an interrupt has arrived.
pub fn checkpoint() -> Result<(), RunError> {
    if interrupt::requested() {
        return Err(RunError::Interrupted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::process::ExitStatusExt;

    use super::*;
    use crate::io::config::BenchConfig;

    #[test]
    fn preflight_requires_hostname() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = BenchPaths::new(temp.path(), &BenchConfig::default());
        let err = preflight(&paths, true).unwrap_err();
        assert!(matches!(err, RunError::MissingHostIdentity { .. }));
        assert!(err.to_string().contains("hostname"));
    }

    #[test]
    fn preflight_without_deploy_key_disables_upload() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = BenchPaths::new(temp.path(), &BenchConfig::default());
        fs::write(&paths.hostname, "bench-host\n").expect("hostname");

        let checked = preflight(&paths, true).expect("preflight");
        assert_eq!(checked.upload, UploadDecision::MissingCredential);
        assert_eq!(checked.warnings.len(), 1);
        assert!(checked.warnings[0].contains("deploy-key"));
    }

    #[test]
    fn preflight_honours_no_upload_silently() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = BenchPaths::new(temp.path(), &BenchConfig::default());
        fs::write(&paths.hostname, "bench-host\n").expect("hostname");

        let checked = preflight(&paths, false).expect("preflight");
        assert_eq!(checked.upload, UploadDecision::NotRequested);
        assert!(checked.warnings.is_empty());
    }

    #[test]
    fn workload_code_reports_exit_status() {
        let err = RunError::WorkloadFailed {
            status: ExitStatus::from_raw(2 << 8),
        };
        assert_eq!(err.workload_code(), Some(2));
        assert_eq!(RunError::Interrupted.workload_code(), None);
    }
}
