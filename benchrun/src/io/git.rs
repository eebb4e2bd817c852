//! Git adapter for the results repository.
//!
//! The runner only ever drives `git` as a subprocess, so we keep a small,
//! explicit wrapper around the handful of commands the sync protocol needs.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    envs: Vec<(String, String)>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            envs: Vec::new(),
        }
    }

    /// Add an environment variable to every command (e.g. `GIT_SSH`).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Clone `url` into `dest` (resolved against the workdir).
    #[instrument(skip_all, fields(url = url))]
    pub fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
        debug!(dest = %dest.display(), ?branch, "cloning");
        let mut args: Vec<&OsStr> = vec![OsStr::new("clone")];
        if let Some(branch) = branch {
            args.push(OsStr::new("-b"));
            args.push(OsStr::new(branch));
        }
        args.push(OsStr::new(url));
        args.push(dest.as_os_str());
        self.run_checked(&args)?;
        Ok(())
    }

    pub fn remote_add(&self, name: &str, url: &str) -> Result<()> {
        self.run_checked(&["remote", "add", name, url])?;
        Ok(())
    }

    pub fn remote_remove(&self, name: &str) -> Result<()> {
        self.run_checked(&["remote", "rm", name])?;
        Ok(())
    }

    pub fn remote_set_url(&self, name: &str, url: &str) -> Result<()> {
        self.run_checked(&["remote", "set-url", name, url])?;
        Ok(())
    }

    /// Names of the configured remotes.
    pub fn remote_names(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["remote"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fast-forward the current branch from `remote/branch`.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "pulling");
        self.run_checked(&["pull", "--ff-only", remote, branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "pushing");
        self.run_checked(&["push", remote, branch])?;
        Ok(())
    }

    /// Force-push `branch`, discarding whatever history the remote had.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push_force(&self, remote: &str, branch: &str) -> Result<()> {
        warn!(remote, branch, "force pushing");
        self.run_checked(&["push", "-f", remote, branch])?;
        Ok(())
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD in {}", self.workdir.display()));
        }
        Ok(name)
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let status = self
            .run(&["show-ref", "--verify", "--quiet", reference.as_str()])?
            .status;
        Ok(status.success())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Start a branch with no parent commit.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_orphan(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating orphan branch");
        self.run_checked(&["checkout", "--orphan", branch])?;
        Ok(())
    }

    /// Delete a local branch if it exists.
    pub fn delete_branch_if_exists(&self, branch: &str) -> Result<()> {
        if self.branch_exists(branch)? {
            self.run_checked(&["branch", "-D", branch])?;
        }
        Ok(())
    }

    /// Unstage every tracked path, leaving the worktree untouched.
    pub fn unstage_all(&self) -> Result<()> {
        self.run_checked(&["rm", "-r", "-q", "--cached", "--ignore-unmatch", "."])?;
        Ok(())
    }

    /// Stage additions, modifications and deletions under `path`.
    pub fn add_path(&self, path: &str) -> Result<()> {
        self.run_checked(&["add", "-A", "--", path])?;
        Ok(())
    }

    /// Stage everything, including ignored files.
    pub fn add_all_force(&self) -> Result<()> {
        self.run_checked(&["add", "-A", "-f", "."])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Commit whatever is staged, even if that is nothing.
    pub fn commit_allow_empty(&self, message: &str) -> Result<()> {
        self.run_checked(&["commit", "--allow-empty", "-m", message])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed: {}",
                display_args(args),
                stderr.trim()
            ));
        }
        Ok(output)
    }

    fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Output> {
        println!("{} $ git {}", self.workdir.display(), display_args(args));
        Command::new("git")
            .args(args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", display_args(args)))
    }
}

fn display_args<S: AsRef<OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| arg.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_args_joins_with_spaces() {
        assert_eq!(display_args(&["push", "-f", "origin"]), "push -f origin");
    }
}
