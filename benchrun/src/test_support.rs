//! Test-only fakes and fixtures for the run protocol.

use std::cell::{Cell, RefCell};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::JailKind;
use crate::io::config::BenchConfig;
use crate::io::jail::{Jail, RunEnv};
use crate::io::lock::LockFile;
use crate::io::results::ResultsRepository;
use crate::io::workspace::BenchPaths;

/// Jail that records its lifecycle and reports a fixed exit code.
#[derive(Debug, Default)]
pub struct ScriptedJail {
    calls: RefCell<Vec<String>>,
    exit_code: i32,
    writes: Vec<(PathBuf, String)>,
}

impl ScriptedJail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit code reported by every `exec`.
    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// File written by every `exec`, as the workload would.
    pub fn writes(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.writes.push((path.into(), contents.to_string()));
        self
    }

    /// Calls in order: `prepare`, `prepare --force`, `up`, `exec <cmd>`, `down`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Commands passed to `exec`.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("exec ").map(str::to_string))
            .collect()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }
}

impl Jail for ScriptedJail {
    fn kind(&self) -> JailKind {
        JailKind::Cmd
    }

    fn prepare(&self, force: bool) -> Result<()> {
        self.record(if force { "prepare --force" } else { "prepare" });
        Ok(())
    }

    fn up(&self) -> Result<()> {
        self.record("up");
        Ok(())
    }

    fn down(&self) -> Result<()> {
        self.record("down");
        Ok(())
    }

    fn exec(&self, command: &[String], _env: &RunEnv) -> Result<ExitStatus> {
        self.record(format!("exec {}", command.join(" ")));
        for (path, contents) in &self.writes {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(ExitStatus::from_raw(self.exit_code << 8))
    }
}

/// Results repository that records calls instead of running git.
#[derive(Debug, Default)]
pub struct RecordingRepo {
    calls: RefCell<Vec<&'static str>>,
    nothing_new: Cell<bool>,
    fail_publish: Cell<bool>,
}

impl RecordingRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `record_results` report that nothing was staged.
    pub fn nothing_new(self) -> Self {
        self.nothing_new.set(true);
        self
    }

    /// Make `publish_report` fail.
    pub fn fail_publish(self) -> Self {
        self.fail_publish.set(true);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl ResultsRepository for RecordingRepo {
    fn ensure_clone(&self) -> Result<()> {
        self.calls.borrow_mut().push("ensure_clone");
        Ok(())
    }

    fn sync_in(&self) -> Result<()> {
        self.calls.borrow_mut().push("sync_in");
        Ok(())
    }

    fn record_results(&self) -> Result<bool> {
        self.calls.borrow_mut().push("record_results");
        Ok(!self.nothing_new.get())
    }

    fn push_results(&self, _env: &RunEnv) -> Result<()> {
        self.calls.borrow_mut().push("push_results");
        Ok(())
    }

    fn publish_report(&self, _report_dir: &Path, _env: &RunEnv) -> Result<()> {
        self.calls.borrow_mut().push("publish_report");
        if self.fail_publish.get() {
            return Err(anyhow!("push rejected"));
        }
        Ok(())
    }
}

/// Temporary workspace root with default configuration.
pub struct BenchWorkspace {
    _temp: TempDir,
    pub config: BenchConfig,
    pub paths: BenchPaths,
}

impl BenchWorkspace {
    pub fn new() -> Self {
        Self::with_config(BenchConfig::default())
    }

    pub fn with_config(config: BenchConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = BenchPaths::new(temp.path(), &config);
        Self {
            _temp: temp,
            config,
            paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Write the host identity file.
    pub fn with_hostname(self) -> Self {
        fs::write(&self.paths.hostname, "bench-host\n").expect("write hostname");
        self
    }

    /// Write a (fake) deploy key so uploads are allowed.
    pub fn with_deploy_key(self) -> Self {
        fs::write(&self.paths.deploy_key, "key\n").expect("write deploy key");
        self
    }

    pub fn lock(&self) -> LockFile {
        LockFile::new(&self.paths.lockfile)
    }

    /// Replace the configuration, recomputing paths under the same root.
    pub fn reconfigure(&mut self, config: BenchConfig) {
        self.paths = BenchPaths::new(self.root().to_path_buf(), &config);
        self.config = config;
    }
}

impl Default for BenchWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Bare git remote seeded with a data branch holding `results/`.
pub struct RemoteFixture {
    _temp: TempDir,
    pub url: PathBuf,
}

impl RemoteFixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let url = temp.path().join("remote.git");
        let seed = temp.path().join("seed");

        git(temp.path(), &["init", "-q", "--bare", "remote.git"]);
        git(&url, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(temp.path(), &["init", "-q", "seed"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        fs::create_dir_all(seed.join("results")).expect("mkdir results");
        fs::write(seed.join("results/benchmarks.json"), "{}\n").expect("write seed");
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "Initial results"]);
        git(&seed, &["push", "-q", url.to_str().expect("utf-8 path"), "master"]);

        Self { _temp: temp, url }
    }

    /// Point a configuration's fetch and push URLs at this remote.
    pub fn configure(&self, config: &mut BenchConfig) {
        let url = self.url.display().to_string();
        config.results.clone_url = url.clone();
        config.results.upload_url = url;
        config.results.author_name = Some("Bench Host".to_string());
        config.results.author_email = Some("bench@localhost".to_string());
    }

    /// Commit subjects on `branch`, newest first.
    pub fn log(&self, branch: &str) -> Vec<String> {
        git_output(&self.url, &["log", "--format=%s", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Files tracked at the tip of `branch`.
    pub fn files(&self, branch: &str) -> Vec<String> {
        git_output(&self.url, &["ls-tree", "-r", "--name-only", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        Command::new("git")
            .args(["show-ref", "--verify", "--quiet", reference.as_str()])
            .current_dir(&self.url)
            .status()
            .expect("spawn git")
            .success()
    }
}

impl Default for RemoteFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@localhost"])
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// Run git and return its stdout, panicking on failure.
pub fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(output.status.success(), "git {args:?} failed in {}", dir.display());
    String::from_utf8_lossy(&output.stdout).into_owned()
}
