//! Direct execution on the host, without isolation.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use anyhow::Result;
use tracing::debug;

use super::{Jail, RunEnv};
use crate::core::types::JailKind;
use crate::io::config::DirectConfig;
use crate::io::process::{command_from_argv, run_status};
use crate::io::workspace::BenchPaths;

/// Runs the workload as a local child process from the workspace root.
///
/// There is no lifecycle: prepare, up and down are no-ops.
#[derive(Debug, Clone)]
pub struct DirectJail {
    entrypoint: Vec<String>,
    root: PathBuf,
}

impl DirectJail {
    pub fn new(config: &DirectConfig, paths: &BenchPaths) -> Self {
        Self {
            entrypoint: resolve_entrypoint(&config.entrypoint, &paths.root),
            root: paths.root.clone(),
        }
    }

    pub fn argv(&self, command: &[String]) -> Vec<String> {
        let mut argv = self.entrypoint.clone();
        argv.extend(command.iter().cloned());
        argv
    }
}

impl Jail for DirectJail {
    fn kind(&self) -> JailKind {
        JailKind::Cmd
    }

    fn prepare(&self, _force: bool) -> Result<()> {
        Ok(())
    }

    fn up(&self) -> Result<()> {
        Ok(())
    }

    fn down(&self) -> Result<()> {
        Ok(())
    }

    fn exec(&self, command: &[String], env: &RunEnv) -> Result<ExitStatus> {
        let argv = self.argv(command);
        debug!(?argv, "running on host");
        let mut cmd = command_from_argv(&argv)?;
        cmd.current_dir(&self.root);
        env.apply(&mut cmd);
        run_status(cmd)
    }
}

/// A relative program path (one containing `/`) is taken relative to the
/// root; bare program names are left for `PATH` lookup.
fn resolve_entrypoint(entrypoint: &[String], root: &Path) -> Vec<String> {
    let mut resolved = entrypoint.to_vec();
    if let Some(program) = resolved.first_mut() {
        let path = Path::new(program.as_str());
        if path.is_relative() && program.contains('/') {
            *program = root.join(path).display().to_string();
        }
    }
    resolved
}
