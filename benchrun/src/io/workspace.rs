//! Workspace layout and per-run reset of transient output directories.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::config::BenchConfig;

/// All canonical paths for a benchmark workspace root.
///
/// Built once at startup so no component consults the process working
/// directory.
#[derive(Debug, Clone)]
pub struct BenchPaths {
    pub root: PathBuf,
    pub lockfile: PathBuf,
    pub hostname: PathBuf,
    pub deploy_key: PathBuf,
    pub git_ssh: PathBuf,
    pub cron_log: PathBuf,
    pub clone_dir: PathBuf,
    pub publish_dir: PathBuf,
    /// `results` link in the root.
    pub results_link: PathBuf,
    /// Link target, relative to the root.
    pub results_target: PathBuf,
    pub html_dir: PathBuf,
    pub doc_dir: PathBuf,
}

impl BenchPaths {
    pub fn new(root: impl Into<PathBuf>, config: &BenchConfig) -> Self {
        let root = root.into();
        let resolve = |name: &str| root.join(name);
        let results = &config.results;
        Self {
            lockfile: resolve(&config.lockfile),
            hostname: resolve(&config.files.hostname),
            deploy_key: resolve(&config.files.deploy_key),
            git_ssh: resolve(&config.files.git_ssh),
            cron_log: resolve(&config.files.cron_log),
            clone_dir: resolve(&results.clone_dir),
            publish_dir: resolve(&results.publish_dir),
            results_link: resolve(&results.results_dir),
            results_target: Path::new(&results.clone_dir).join(&results.results_dir),
            html_dir: resolve(&results.html_dir),
            doc_dir: resolve(&results.doc_dir),
            root,
        }
    }

    /// `<box>.box` archive consumed by `vagrant box add`.
    pub fn box_archive(&self, box_name: &str) -> PathBuf {
        self.root.join(format!("{box_name}.box"))
    }
}

/// Remove and recreate the generated output directories so nothing from a
/// previous (possibly aborted) run leaks into this one.
pub fn reset_output_dirs(paths: &BenchPaths) -> Result<()> {
    recreate_dir(&paths.html_dir)?;
    recreate_dir(&paths.doc_dir)?;
    Ok(())
}

/// Ensure `results` in the root points into the results clone.
///
/// An existing directory or symlink is left alone.
pub fn ensure_results_link(paths: &BenchPaths) -> Result<()> {
    if paths.results_link.is_dir() {
        return Ok(());
    }
    match fs::symlink_metadata(&paths.results_link) {
        // Dangling until the clone grows a results directory.
        Ok(meta) if meta.file_type().is_symlink() => return Ok(()),
        Ok(_) => {
            return Err(anyhow!(
                "{} exists but does not lead to a directory",
                paths.results_link.display()
            ));
        }
        Err(_) => {}
    }
    debug!(link = %paths.results_link.display(), target = %paths.results_target.display(), "linking results");
    symlink(&paths.results_target, &paths.results_link)
        .with_context(|| format!("link {}", paths.results_link.display()))
}

/// Remove `path` recursively if it exists.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn recreate_dir(path: &Path) -> Result<()> {
    remove_dir_if_exists(path)?;
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
