//! Process-wide stdout/stderr redirection into a log file.
//!
//! Works at the descriptor level so child processes (git, vagrant, the
//! workload) write into the same file. The previous descriptors are restored
//! when the guard drops.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use anyhow::{Context, Result};
use nix::libc;
use nix::unistd::{close, dup, dup2};
use tracing::{debug, error};

/// Active redirection of both standard streams.
#[derive(Debug)]
pub struct LogRedirect {
    saved_stdout: RawFd,
    saved_stderr: RawFd,
}

impl LogRedirect {
    /// Truncate `path` and point stdout and stderr at it.
    pub fn to_file(path: &Path) -> Result<Self> {
        let log = File::create(path).with_context(|| format!("create {}", path.display()))?;
        flush_std();

        let saved_stdout = dup(libc::STDOUT_FILENO).context("dup stdout")?;
        let saved_stderr = dup(libc::STDERR_FILENO).context("dup stderr")?;
        let redirect = Self {
            saved_stdout,
            saved_stderr,
        };
        dup2(log.as_raw_fd(), libc::STDOUT_FILENO).context("redirect stdout")?;
        dup2(log.as_raw_fd(), libc::STDERR_FILENO).context("redirect stderr")?;
        debug!(path = %path.display(), "output redirected");
        Ok(redirect)
    }
}

impl Drop for LogRedirect {
    fn drop(&mut self) {
        flush_std();
        for (saved, target, name) in [
            (self.saved_stdout, libc::STDOUT_FILENO, "stdout"),
            (self.saved_stderr, libc::STDERR_FILENO, "stderr"),
        ] {
            if let Err(err) = dup2(saved, target) {
                error!(err = %err, stream = name, "failed to restore stream");
            }
            let _ = close(saved);
        }
    }
}

fn flush_std() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
