//! Shared deterministic types for the benchmark runner.
//!
//! These types define stable contracts between the orchestrator, the jail
//! backends and the configuration layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Jail backend used to execute the workload.
///
/// Selected once at startup from configuration (or `--jail`), never
/// discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JailKind {
    /// Vagrant-managed virtual machine; commands run over `vagrant ssh`.
    Vagrant,
    /// Direct execution as a local subprocess.
    Cmd,
}

impl fmt::Display for JailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JailKind::Vagrant => f.write_str("vagrant"),
            JailKind::Cmd => f.write_str("cmd"),
        }
    }
}

/// Outcome of the upload preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    /// Upload was requested and the deploy key is present.
    Enabled,
    /// Upload was not requested by the caller.
    NotRequested,
    /// Upload was requested but the deploy key is missing.
    MissingCredential,
}

impl UploadDecision {
    pub fn decide(requested: bool, credential_present: bool) -> Self {
        match (requested, credential_present) {
            (false, _) => UploadDecision::NotRequested,
            (true, true) => UploadDecision::Enabled,
            (true, false) => UploadDecision::MissingCredential,
        }
    }

    pub fn upload(&self) -> bool {
        matches!(self, UploadDecision::Enabled)
    }
}
