//! Runner configuration stored in `benchrun.toml` at the workspace root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::selection::{default_cron_selection, default_populate_selections};
use crate::core::types::JailKind;

/// File name looked up in the root when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "benchrun.toml";

/// Benchmark runner configuration (TOML).
///
/// Edited by operators on the benchmark host. Missing fields default to the
/// values the numpy benchmark machine has always used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BenchConfig {
    /// Jail backend used unless `--jail` overrides it.
    pub jail: JailKind,

    /// Lock token path, relative to the root unless absolute.
    pub lockfile: String,

    /// Delay between attempts while waiting on a held lock.
    pub lock_poll_interval_ms: u64,

    pub files: FilesConfig,
    pub results: ResultsConfig,
    pub vagrant: VagrantConfig,
    pub direct: DirectConfig,
    pub schedule: ScheduleConfig,
}

/// Host-local files consulted by preflight and exported to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilesConfig {
    /// Host identity file; its absence aborts every benchmark run.
    pub hostname: String,
    /// SSH deploy key; its absence disables upload.
    pub deploy_key: String,
    /// `GIT_SSH` wrapper that authenticates with the deploy key.
    pub git_ssh: String,
    /// Log file written by `benchrun cron`.
    pub cron_log: String,
}

/// Results repository layout and remotes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResultsConfig {
    /// Fetch URL (registered as `origin`).
    pub clone_url: String,
    /// Push URL (registered as `upload`).
    pub upload_url: String,
    /// Local clone directory.
    pub clone_dir: String,
    /// Scratch clone used to assemble the publication branch.
    pub publish_dir: String,
    /// Branch holding the durable result history.
    pub data_branch: String,
    /// History-less branch serving the generated report.
    pub publish_branch: String,
    /// Results directory inside the clone; also linked from the root.
    pub results_dir: String,
    /// Generated report directory (recreated every run, published).
    pub html_dir: String,
    /// Generated documentation directory (recreated every run).
    pub doc_dir: String,
    pub commit_message: String,
    pub publish_message: String,
    /// Commit identity for hosts without a global git identity.
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

/// Vagrant backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VagrantConfig {
    /// Program (plus leading args) used to invoke vagrant.
    pub command: Vec<String>,
    /// Registered box name.
    pub box_name: String,
    /// Command prefix executed inside the guest.
    pub remote_entrypoint: Vec<String>,
    /// External image builder producing `<box_name>.box` in the root.
    pub build_command: Option<Vec<String>>,
}

/// Direct (no isolation) backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DirectConfig {
    /// Command prefix executed on the host; a relative first element is
    /// resolved against the root.
    pub entrypoint: Vec<String>,
}

/// Fixed benchmark selections for `cron` and `populate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cron: Vec<String>,
    pub populate: Vec<Vec<String>>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            hostname: "hostname".to_string(),
            deploy_key: "deploy-key".to_string(),
            git_ssh: "git-ssh".to_string(),
            cron_log: "benchmark.log".to_string(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            clone_url: "https://github.com/pv/numpy-bench.git".to_string(),
            upload_url: "git@github.com:pv/numpy-bench.git".to_string(),
            clone_dir: "numpy-bench".to_string(),
            publish_dir: "numpy-bench-html".to_string(),
            data_branch: "master".to_string(),
            publish_branch: "gh-pages".to_string(),
            results_dir: "results".to_string(),
            html_dir: "html".to_string(),
            doc_dir: "doc".to_string(),
            commit_message: "New results".to_string(),
            publish_message: "Generated from sources".to_string(),
            author_name: None,
            author_email: None,
        }
    }
}

impl Default for VagrantConfig {
    fn default() -> Self {
        Self {
            command: vec!["vagrant".to_string()],
            box_name: "numpy-bench-trusty".to_string(),
            remote_entrypoint: vec![
                "sudo".to_string(),
                "--".to_string(),
                "/usr/local/bin/run-cmd".to_string(),
            ],
            build_command: None,
        }
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            entrypoint: vec!["bin/run-cmd-user".to_string()],
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron_selection(),
            populate: default_populate_selections(),
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            jail: JailKind::Vagrant,
            lockfile: "lockfile".to_string(),
            lock_poll_interval_ms: 1000,
            files: FilesConfig::default(),
            results: ResultsConfig::default(),
            vagrant: VagrantConfig::default(),
            direct: DirectConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lockfile.trim().is_empty() {
            return Err(anyhow!("lockfile must be non-empty"));
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(anyhow!("lock_poll_interval_ms must be > 0"));
        }
        let results = &self.results;
        for (name, value) in [
            ("results.clone_url", &results.clone_url),
            ("results.upload_url", &results.upload_url),
            ("results.clone_dir", &results.clone_dir),
            ("results.publish_dir", &results.publish_dir),
            ("results.data_branch", &results.data_branch),
            ("results.publish_branch", &results.publish_branch),
            ("results.results_dir", &results.results_dir),
            ("results.html_dir", &results.html_dir),
            ("results.doc_dir", &results.doc_dir),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must be non-empty"));
            }
        }
        if results.data_branch == results.publish_branch {
            return Err(anyhow!(
                "results.publish_branch must differ from results.data_branch"
            ));
        }
        ensure_command("vagrant.command", &self.vagrant.command)?;
        ensure_command("direct.entrypoint", &self.direct.entrypoint)?;
        if let Some(build) = &self.vagrant.build_command {
            ensure_command("vagrant.build_command", build)?;
        }
        if self.vagrant.box_name.trim().is_empty() {
            return Err(anyhow!("vagrant.box_name must be non-empty"));
        }
        if self.schedule.cron.is_empty() {
            return Err(anyhow!("schedule.cron must be a non-empty array"));
        }
        if self.schedule.populate.iter().any(Vec::is_empty) {
            return Err(anyhow!("schedule.populate entries must be non-empty"));
        }
        Ok(())
    }
}

fn ensure_command(name: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BenchConfig::default()`.
pub fn load_config(path: &Path) -> Result<BenchConfig> {
    if !path.exists() {
        let cfg = BenchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BenchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BenchConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("benchrun.toml");
        fs::write(
            &path,
            "jail = \"cmd\"\n\n[results]\nclone_url = \"/srv/bench.git\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.jail, JailKind::Cmd);
        assert_eq!(cfg.results.clone_url, "/srv/bench.git");
        assert_eq!(cfg.results.data_branch, "master");
        assert_eq!(cfg.lockfile, "lockfile");
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("benchrun.toml");
        fs::write(&path, "lock_poll_interval_ms = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("lock_poll_interval_ms"));
    }

    #[test]
    fn rejects_publishing_onto_data_branch() {
        let mut cfg = BenchConfig::default();
        cfg.results.publish_branch = cfg.results.data_branch.clone();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("publish_branch"));
    }

    #[test]
    fn rejects_empty_entrypoint() {
        let mut cfg = BenchConfig::default();
        cfg.direct.entrypoint.clear();
        assert!(cfg.validate().is_err());
    }
}
