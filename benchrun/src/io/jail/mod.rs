//! Jail abstraction: where the workload command actually runs.
//!
//! Both backends expose the same capability set so the orchestrator is
//! written once:
//!
//! - [`Jail::prepare`]: idempotent setup of whatever the backend needs.
//! - [`activate`]: scoped bring-up. Returns an [`ActiveJail`] guard; `run` is
//!   only reachable through it, and dropping it tears the backend down on
//!   every exit path.
//!
//! The backend is picked once at startup ([`build_jail`]).

mod direct;
mod vagrant;

use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use anyhow::Result;
use tracing::{debug, error};

use crate::core::types::JailKind;
use crate::io::config::BenchConfig;
use crate::io::workspace::BenchPaths;

pub use direct::DirectJail;
pub use vagrant::VagrantJail;

/// Variable carrying the workspace root into the workload.
pub const WORKDIR_VAR: &str = "WORKDIR";
/// Variable carrying the credential wrapper into the workload and git.
pub const GIT_SSH_VAR: &str = "GIT_SSH";

/// Environment injected into the workload and into authenticated git calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEnv {
    pub workdir: PathBuf,
    pub git_ssh: PathBuf,
}

impl RunEnv {
    pub fn from_paths(paths: &BenchPaths) -> Self {
        Self {
            workdir: paths.root.clone(),
            git_ssh: paths.git_ssh.clone(),
        }
    }

    pub fn vars(&self) -> [(&'static str, String); 2] {
        [
            (WORKDIR_VAR, self.workdir.display().to_string()),
            (GIT_SSH_VAR, self.git_ssh.display().to_string()),
        ]
    }

    pub fn apply(&self, cmd: &mut Command) {
        for (key, value) in self.vars() {
            cmd.env(key, value);
        }
    }
}

/// Isolated execution backend.
pub trait Jail {
    fn kind(&self) -> JailKind;

    /// Make the backend usable at all. No-op when already prepared unless
    /// `force` is set, in which case existing state is rebuilt.
    fn prepare(&self, force: bool) -> Result<()>;

    /// Bring the backend up. Call through [`activate`].
    fn up(&self) -> Result<()>;

    /// Return the backend to its idle state. Called by [`ActiveJail`] on drop.
    fn down(&self) -> Result<()>;

    /// Execute `command`, blocking until it exits. Call through
    /// [`ActiveJail::run`].
    fn exec(&self, command: &[String], env: &RunEnv) -> Result<ExitStatus>;
}

/// Prepare and bring up `jail`; the guard brings it down again.
pub fn activate<J: Jail + ?Sized>(jail: &J) -> Result<ActiveJail<'_, J>> {
    jail.prepare(false)?;
    jail.up()?;
    debug!(jail = %jail.kind(), "jail up");
    Ok(ActiveJail { jail })
}

/// A jail in the `Up` state.
#[derive(Debug)]
pub struct ActiveJail<'a, J: Jail + ?Sized> {
    jail: &'a J,
}

impl<J: Jail + ?Sized> ActiveJail<'_, J> {
    /// Run the workload. A non-zero exit is reported, never swallowed.
    pub fn run(&self, command: &[String], env: &RunEnv) -> Result<ExitStatus> {
        self.jail.exec(command, env)
    }
}

impl<J: Jail + ?Sized> Drop for ActiveJail<'_, J> {
    fn drop(&mut self) {
        match self.jail.down() {
            Ok(()) => debug!(jail = %self.jail.kind(), "jail down"),
            Err(err) => error!(err = %format!("{err:#}"), "failed to tear down jail"),
        }
    }
}

/// Construct the configured backend.
pub fn build_jail(kind: JailKind, config: &BenchConfig, paths: &BenchPaths) -> Box<dyn Jail> {
    match kind {
        JailKind::Vagrant => Box::new(VagrantJail::new(&config.vagrant, paths)),
        JailKind::Cmd => Box::new(DirectJail::new(&config.direct, paths)),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::anyhow;

    use super::*;

    #[derive(Default)]
    struct FlakyJail {
        calls: RefCell<Vec<&'static str>>,
        fail_exec: bool,
    }

    impl Jail for FlakyJail {
        fn kind(&self) -> JailKind {
            JailKind::Cmd
        }
        fn prepare(&self, _force: bool) -> Result<()> {
            self.calls.borrow_mut().push("prepare");
            Ok(())
        }
        fn up(&self) -> Result<()> {
            self.calls.borrow_mut().push("up");
            Ok(())
        }
        fn down(&self) -> Result<()> {
            self.calls.borrow_mut().push("down");
            Ok(())
        }
        fn exec(&self, _command: &[String], _env: &RunEnv) -> Result<ExitStatus> {
            self.calls.borrow_mut().push("exec");
            if self.fail_exec {
                return Err(anyhow!("ssh connection lost"));
            }
            Command::new("true").status().map_err(Into::into)
        }
    }

    fn env() -> RunEnv {
        RunEnv {
            workdir: PathBuf::from("/srv/bench"),
            git_ssh: PathBuf::from("/srv/bench/git-ssh"),
        }
    }

    #[test]
    fn activate_prepares_then_brings_up_and_down() {
        let jail = FlakyJail::default();
        {
            let active = activate(&jail).expect("activate");
            assert!(active.run(&[], &env()).expect("run").success());
        }
        assert_eq!(*jail.calls.borrow(), vec!["prepare", "up", "exec", "down"]);
    }

    #[test]
    fn teardown_runs_when_body_fails() {
        let jail = FlakyJail {
            fail_exec: true,
            ..FlakyJail::default()
        };
        let result = (|| -> Result<()> {
            let active = activate(&jail)?;
            active.run(&["benchmarks".to_string()], &env())?;
            Ok(())
        })();

        assert!(result.is_err());
        assert_eq!(jail.calls.borrow().last(), Some(&"down"));
    }

    #[test]
    fn run_env_exports_workdir_and_git_ssh() {
        let vars = env().vars();
        assert_eq!(vars[0], ("WORKDIR", "/srv/bench".to_string()));
        assert_eq!(vars[1], ("GIT_SSH", "/srv/bench/git-ssh".to_string()));
    }

    #[test]
    fn build_jail_respects_kind() {
        let config = BenchConfig::default();
        let paths = BenchPaths::new("/srv/bench", &config);
        assert_eq!(build_jail(JailKind::Cmd, &config, &paths).kind(), JailKind::Cmd);
        assert_eq!(
            build_jail(JailKind::Vagrant, &config, &paths).kind(),
            JailKind::Vagrant
        );
    }
}
