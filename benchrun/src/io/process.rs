//! Helpers for running child processes the way an operator would see them.
//!
//! Every command is echoed as `$ cmd` (prefixed by its working directory when
//! one is set) before it runs, and inherits stdout/stderr so its output lands
//! in the terminal or the cron log. There are no timeouts, but the wait
//! watches the interrupt flag: once an interrupt arrives the signal is passed
//! on to the child, and the child is killed if it outlives the grace period.

use std::ffi::OsStr;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use super::interrupt;
use crate::core::shell;

/// How often a waiting parent looks at the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);
/// Time a child gets to exit after the forwarded signal before it is killed.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// Build a `Command` from an argument vector (`argv[0]` is the program).
pub fn command_from_argv<S: AsRef<OsStr>>(argv: &[S]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Render a command as an operator-facing, shell-quoted line.
pub fn describe(cmd: &Command) -> String {
    let mut argv = vec![cmd.get_program().to_string_lossy().into_owned()];
    argv.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    let line = shell::join(&argv);
    match cmd.get_current_dir() {
        Some(dir) => format!("{} $ {}", dir.display(), line),
        None => format!("$ {line}"),
    }
}

/// Echo and run a command with inherited stdio, returning its exit status.
#[instrument(skip_all)]
pub fn run_status(mut cmd: Command) -> Result<ExitStatus> {
    let line = describe(&cmd);
    println!("{line}");
    cmd.stdin(Stdio::null());
    debug!(command = %line, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(err = %e, command = %line, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {line}"));
        }
    };
    let status = wait_interruptible(&mut child).with_context(|| format!("wait for {line}"))?;
    debug!(exit_code = ?status.code(), "command finished");
    Ok(status)
}

/// Wait for `child`, relaying an operator interrupt to it.
///
/// A `kill` aimed at the runner alone never reaches the child on its own.
fn wait_interruptible(child: &mut Child) -> Result<ExitStatus> {
    let mut forwarded_at: Option<Instant> = None;
    loop {
        if let Some(status) = child.wait_timeout(INTERRUPT_POLL).context("wait for command")? {
            return Ok(status);
        }
        match forwarded_at {
            None if interrupt::requested() => {
                let sig = interrupt::received().unwrap_or(Signal::SIGTERM);
                warn!(pid = child.id(), signal = %sig, "forwarding interrupt to command");
                forward(child, sig)?;
                forwarded_at = Some(Instant::now());
            }
            Some(at) if at.elapsed() >= KILL_GRACE => {
                warn!(pid = child.id(), "command ignored interrupt; killing");
                child.kill().context("kill command")?;
                return child.wait().context("wait command after kill");
            }
            _ => {}
        }
    }
}

fn forward(child: &Child, sig: Signal) -> Result<()> {
    let pid = i32::try_from(child.id()).context("child pid out of range")?;
    match kill(Pid::from_raw(pid), sig) {
        // Exited between the poll and the signal; the next wait reaps it.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno).with_context(|| format!("send {sig} to {pid}")),
    }
}

/// Echo and run a command, failing on a non-zero exit.
pub fn run_checked(cmd: Command) -> Result<()> {
    let line = describe(&cmd);
    let status = run_status(cmd)?;
    if !status.success() {
        warn!(exit_code = ?status.code(), command = %line, "command failed");
        return Err(anyhow!("command failed with {status}: {line}"));
    }
    Ok(())
}

/// Echo and run a command, capturing stdout; stderr stays inherited.
#[instrument(skip_all)]
pub fn capture(mut cmd: Command) -> Result<String> {
    let line = describe(&cmd);
    println!("{line}");
    cmd.stdin(Stdio::null()).stderr(Stdio::inherit());
    let output = cmd.output().with_context(|| format!("spawn {line}"))?;
    if !output.status.success() {
        warn!(exit_code = ?output.status.code(), command = %line, "command failed");
        return Err(anyhow!("command failed with {}: {line}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
