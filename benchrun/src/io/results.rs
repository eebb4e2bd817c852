//! Results repository: the durable data branch and the publication branch.
//!
//! [`ResultsRepository`] decouples the run protocol from git so the
//! orchestrator can be exercised with recording fakes. [`GitResultsRepo`] is
//! the real implementation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use super::config::ResultsConfig;
use super::git::Git;
use super::jail::RunEnv;
use super::workspace::{BenchPaths, remove_dir_if_exists};

/// Remote the clone fetches from.
pub const FETCH_REMOTE: &str = "origin";
/// Remote the clone pushes results to.
pub const PUSH_REMOTE: &str = "upload";

/// Operations the run protocol performs on the results repository.
pub trait ResultsRepository {
    /// Clone on first use. Every call makes sure the push remote exists and
    /// points at the configured upload url.
    fn ensure_clone(&self) -> Result<()>;
    /// Fast-forward the data branch from the fetch remote.
    fn sync_in(&self) -> Result<()>;
    /// Stage and commit new results. `Ok(false)` when there was nothing to
    /// commit.
    fn record_results(&self) -> Result<bool>;
    /// Push the data branch to the push remote.
    fn push_results(&self, env: &RunEnv) -> Result<()>;
    /// Replace the publication branch with a single commit holding `report_dir`.
    fn publish_report(&self, report_dir: &Path, env: &RunEnv) -> Result<()>;
}

/// Git-backed results repository.
#[derive(Debug, Clone)]
pub struct GitResultsRepo {
    root: PathBuf,
    clone_dir: PathBuf,
    publish_dir: PathBuf,
    config: ResultsConfig,
}

impl GitResultsRepo {
    pub fn new(config: &ResultsConfig, paths: &BenchPaths) -> Self {
        Self {
            root: paths.root.clone(),
            clone_dir: paths.clone_dir.clone(),
            publish_dir: paths.publish_dir.clone(),
            config: config.clone(),
        }
    }

    fn git(&self, workdir: &Path) -> Git {
        let mut git = Git::new(workdir);
        if let Some(name) = &self.config.author_name {
            git = git
                .with_env("GIT_AUTHOR_NAME", name)
                .with_env("GIT_COMMITTER_NAME", name);
        }
        if let Some(email) = &self.config.author_email {
            git = git
                .with_env("GIT_AUTHOR_EMAIL", email)
                .with_env("GIT_COMMITTER_EMAIL", email);
        }
        git
    }

    fn authenticated(&self, workdir: &Path, env: &RunEnv) -> Git {
        let mut git = self.git(workdir);
        for (key, value) in env.vars() {
            git = git.with_env(key, value);
        }
        git
    }
}

impl ResultsRepository for GitResultsRepo {
    #[instrument(skip_all, fields(clone_dir = %self.clone_dir.display()))]
    fn ensure_clone(&self) -> Result<()> {
        if !self.clone_dir.is_dir() {
            info!(url = %self.config.clone_url, "cloning results repository");
            self.git(&self.root)
                .clone_repo(&self.config.clone_url, &self.clone_dir, None)?;
        }
        let git = self.git(&self.clone_dir);
        if git.remote_names()?.iter().any(|name| name == PUSH_REMOTE) {
            debug!(remote = PUSH_REMOTE, "refreshing push remote url");
            git.remote_set_url(PUSH_REMOTE, &self.config.upload_url)?;
        } else {
            git.remote_add(PUSH_REMOTE, &self.config.upload_url)?;
        }
        Ok(())
    }

    fn sync_in(&self) -> Result<()> {
        self.git(&self.clone_dir)
            .pull_ff_only(FETCH_REMOTE, &self.config.data_branch)
            .context("sync results clone")
    }

    #[instrument(skip_all)]
    fn record_results(&self) -> Result<bool> {
        let git = self.git(&self.clone_dir);
        if git.current_branch()? != self.config.data_branch {
            git.checkout_branch(&self.config.data_branch)?;
        }
        git.add_path(&self.config.results_dir)?;
        let committed = git.commit_staged(&self.config.commit_message)?;
        if committed {
            info!(sha = %git.head_short_sha(8)?, "recorded results");
        } else {
            info!("no new results to record");
        }
        Ok(committed)
    }

    fn push_results(&self, env: &RunEnv) -> Result<()> {
        self.authenticated(&self.clone_dir, env)
            .push(PUSH_REMOTE, &self.config.data_branch)
            .context("push results")
    }

    #[instrument(skip_all, fields(branch = %self.config.publish_branch))]
    fn publish_report(&self, report_dir: &Path, env: &RunEnv) -> Result<()> {
        if !report_dir.is_dir() {
            return Err(anyhow!("report directory {} missing", report_dir.display()));
        }
        remove_dir_if_exists(&self.publish_dir)?;
        self.git(&self.root).clone_repo(
            &self.clone_dir.display().to_string(),
            &self.publish_dir,
            Some(&self.config.data_branch),
        )?;

        let git = self.authenticated(&self.publish_dir, env);
        git.remote_remove(FETCH_REMOTE)?;
        git.remote_add(FETCH_REMOTE, &self.config.upload_url)?;
        git.delete_branch_if_exists(&self.config.publish_branch)?;
        git.checkout_orphan(&self.config.publish_branch)?;
        git.unstage_all()?;
        clear_worktree(&self.publish_dir)?;
        copy_tree(report_dir, &self.publish_dir)?;
        git.add_all_force()?;
        git.commit_allow_empty(&self.config.publish_message)?;
        git.push_force(FETCH_REMOTE, &self.config.publish_branch)?;

        remove_dir_if_exists(&self.publish_dir)?;
        info!("published report");
        Ok(())
    }
}

/// Remove everything in a worktree except `.git`.
fn clear_worktree(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().context("stat entry")?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// Copy the contents of `src` into `dest` (like `rsync -a src/ dest/`).
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("strip report prefix")?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create directory {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_mirrors_nested_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("html");
        let dest = temp.path().join("out");
        fs::create_dir_all(src.join("graphs/numpy")).expect("mkdir");
        fs::create_dir_all(&dest).expect("mkdir");
        fs::write(src.join("index.html"), "<html>").expect("write");
        fs::write(src.join("graphs/numpy/a.json"), "{}").expect("write");

        copy_tree(&src, &dest).expect("copy");

        assert_eq!(
            fs::read_to_string(dest.join("index.html")).expect("read"),
            "<html>"
        );
        assert!(dest.join("graphs/numpy/a.json").is_file());
    }

    #[test]
    fn clear_worktree_keeps_git_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::create_dir_all(dir.join(".git/objects")).expect("mkdir");
        fs::create_dir_all(dir.join("results")).expect("mkdir");
        fs::write(dir.join("results/a.json"), "{}").expect("write");
        fs::write(dir.join("README"), "x").expect("write");

        clear_worktree(dir).expect("clear");

        let names: Vec<_> = fs::read_dir(dir)
            .expect("read")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(".git")]);
    }
}
