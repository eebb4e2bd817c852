//! Vagrant-managed virtual machine backend.

use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use super::{Jail, RunEnv};
use crate::core::shell;
use crate::core::types::JailKind;
use crate::io::config::VagrantConfig;
use crate::io::process::{capture, command_from_argv, run_checked, run_status};
use crate::io::workspace::BenchPaths;

/// Runs the workload inside a Vagrant box over `vagrant ssh`.
///
/// The `Vagrantfile` lives in the workspace root; every vagrant call runs
/// there. The VM is suspended, not destroyed, between runs.
#[derive(Debug, Clone)]
pub struct VagrantJail {
    command: Vec<String>,
    box_name: String,
    remote_entrypoint: Vec<String>,
    build_command: Option<Vec<String>>,
    root: PathBuf,
    box_archive: PathBuf,
}

impl VagrantJail {
    pub fn new(config: &VagrantConfig, paths: &BenchPaths) -> Self {
        Self {
            command: config.command.clone(),
            box_name: config.box_name.clone(),
            remote_entrypoint: config.remote_entrypoint.clone(),
            build_command: config.build_command.clone(),
            root: paths.root.clone(),
            box_archive: paths.box_archive(&config.box_name),
        }
    }

    /// Single shell line executed in the guest for `command`.
    pub fn remote_command(&self, command: &[String]) -> String {
        let mut argv = self.remote_entrypoint.clone();
        argv.extend(command.iter().cloned());
        shell::join(&argv)
    }

    fn vagrant(&self, args: &[&str]) -> Result<Command> {
        let mut cmd = command_from_argv(&self.command)?;
        cmd.args(args).current_dir(&self.root);
        Ok(cmd)
    }

    fn box_registered(&self) -> Result<bool> {
        let listing = capture(self.vagrant(&["box", "list"])?).context("list vagrant boxes")?;
        Ok(box_listed(&listing, &self.box_name))
    }

    fn add_box(&self) -> Result<()> {
        let archive = self.box_archive.display().to_string();
        run_checked(self.vagrant(&["box", "add", &self.box_name, &archive])?)
            .with_context(|| format!("add vagrant box {}", self.box_name))
    }

    /// Delegate image construction to the external builder, which must leave
    /// `<box>.box` in the root.
    fn build_box(&self) -> Result<()> {
        let build = self.build_command.as_ref().ok_or_else(|| {
            anyhow!(
                "no vagrant box '{}' registered and no {} to add (configure vagrant.build_command)",
                self.box_name,
                self.box_archive.display()
            )
        })?;
        let mut cmd = command_from_argv(build)?;
        cmd.arg(&self.box_name)
            .arg(&self.box_archive)
            .current_dir(&self.root);
        run_checked(cmd).context("build vagrant box image")?;
        if !self.box_archive.is_file() {
            return Err(anyhow!(
                "box builder finished without producing {}",
                self.box_archive.display()
            ));
        }
        Ok(())
    }
}

impl Jail for VagrantJail {
    fn kind(&self) -> JailKind {
        JailKind::Vagrant
    }

    #[instrument(skip_all, fields(box_name = %self.box_name, force = force))]
    fn prepare(&self, force: bool) -> Result<()> {
        println!("-- Initializing Vagrant box");
        if self.box_registered()? {
            if !force {
                println!("Box already exists.");
                return Ok(());
            }
            info!("removing registered box before rebuild");
            run_checked(self.vagrant(&["box", "remove", &self.box_name])?)
                .with_context(|| format!("remove vagrant box {}", self.box_name))?;
        }

        if self.box_archive.is_file() {
            println!(
                "Using a previously built box: {}",
                self.box_archive.display()
            );
        } else {
            self.build_box()?;
        }
        self.add_box()
    }

    fn up(&self) -> Result<()> {
        run_checked(self.vagrant(&["up"])?).context("vagrant up")
    }

    fn down(&self) -> Result<()> {
        run_checked(self.vagrant(&["suspend"])?).context("vagrant suspend")
    }

    fn exec(&self, command: &[String], env: &RunEnv) -> Result<ExitStatus> {
        let remote = self.remote_command(command);
        debug!(remote = %remote, "running in guest");
        let mut cmd = self.vagrant(&["ssh", "-c", &remote])?;
        env.apply(&mut cmd);
        run_status(cmd)
    }
}

/// Whether `vagrant box list` output names `box_name`.
///
/// Lines look like `numpy-bench-trusty (virtualbox, 0)`.
fn box_listed(listing: &str, box_name: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == box_name)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::io::config::BenchConfig;
    use crate::io::jail::activate;

    /// Stand-in for the vagrant CLI: logs its arguments, answers `box list`
    /// from a file and evaluates `ssh -c` payloads locally.
    const FAKE_VAGRANT: &str = r#"
echo "$*" >> "$FAKE_DIR/calls.log"
case "$1" in
  box)
    if [ "$2" = list ]; then cat "$FAKE_DIR/boxes" 2>/dev/null; fi
    if [ "$2" = add ]; then echo "$3" >> "$FAKE_DIR/boxes"; fi
    ;;
  ssh)
    echo "$3" >> "$FAKE_DIR/remote.log"
    eval "$3"
    ;;
esac
"#;

    struct FakeVagrant {
        _temp: tempfile::TempDir,
        root: PathBuf,
        jail: VagrantJail,
    }

    impl FakeVagrant {
        fn new(remote_entrypoint: &[&str]) -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let root = temp.path().to_path_buf();
            let script = root.join("fake-vagrant.sh");
            fs::write(
                &script,
                format!("FAKE_DIR='{}'\n{}", root.display(), FAKE_VAGRANT),
            )
            .expect("write fake vagrant");

            let mut config = BenchConfig::default();
            config.vagrant.command = vec!["sh".to_string(), script.display().to_string()];
            config.vagrant.box_name = "bench-box".to_string();
            config.vagrant.remote_entrypoint =
                remote_entrypoint.iter().map(|s| s.to_string()).collect();
            let paths = BenchPaths::new(&root, &config);
            let jail = VagrantJail::new(&config.vagrant, &paths);
            Self {
                _temp: temp,
                root,
                jail,
            }
        }

        fn calls(&self) -> Vec<String> {
            read_lines(&self.root.join("calls.log"))
        }

        fn register_box(&self) {
            fs::write(self.root.join("boxes"), "bench-box (virtualbox, 0)\n").expect("boxes");
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn env(root: &Path) -> RunEnv {
        RunEnv {
            workdir: root.to_path_buf(),
            git_ssh: root.join("git-ssh"),
        }
    }

    #[test]
    fn remote_command_quotes_each_argument() {
        let fake = FakeVagrant::new(&["sudo", "--", "/usr/local/bin/run-cmd"]);
        let remote = fake.jail.remote_command(&[
            "benchmarks".to_string(),
            "run".to_string(),
            "v0.5.0^..master".to_string(),
            "a b".to_string(),
        ]);
        assert_eq!(
            remote,
            "sudo -- /usr/local/bin/run-cmd benchmarks run 'v0.5.0^..master' 'a b'"
        );
    }

    #[test]
    fn box_listing_matches_whole_name() {
        let listing = "bench-box-old (virtualbox, 0)\nbench-box (virtualbox, 0)\n";
        assert!(box_listed(listing, "bench-box"));
        assert!(!box_listed("bench-box-old (virtualbox, 0)\n", "bench-box"));
        assert!(!box_listed("", "bench-box"));
    }

    #[test]
    fn prepare_is_noop_when_box_registered() {
        let fake = FakeVagrant::new(&["true"]);
        fake.register_box();

        fake.jail.prepare(false).expect("prepare");
        assert_eq!(fake.calls(), vec!["box list"]);
    }

    #[test]
    fn prepare_adds_prebuilt_archive() {
        let fake = FakeVagrant::new(&["true"]);
        fs::write(fake.root.join("bench-box.box"), "archive").expect("archive");

        fake.jail.prepare(false).expect("prepare");
        let calls = fake.calls();
        assert_eq!(calls[0], "box list");
        assert!(calls[1].starts_with("box add bench-box "));
        assert!(calls[1].ends_with("bench-box.box"));
    }

    #[test]
    fn forced_prepare_removes_then_readds() {
        let fake = FakeVagrant::new(&["true"]);
        fake.register_box();
        fs::write(fake.root.join("bench-box.box"), "archive").expect("archive");

        fake.jail.prepare(true).expect("prepare");
        let calls = fake.calls();
        assert_eq!(calls[1], "box remove bench-box");
        assert!(calls[2].starts_with("box add bench-box"));
    }

    #[test]
    fn prepare_without_archive_or_builder_explains() {
        let fake = FakeVagrant::new(&["true"]);
        let err = fake.jail.prepare(false).unwrap_err();
        assert!(format!("{err:#}").contains("vagrant.build_command"));
    }

    #[test]
    fn active_jail_suspends_after_failed_workload() {
        let fake = FakeVagrant::new(&["sh", "-c", "exit 2"]);
        fake.register_box();

        let status = {
            let active = activate(&fake.jail).expect("activate");
            active
                .run(&["benchmarks".to_string()], &env(&fake.root))
                .expect("run")
        };

        assert_eq!(status.code(), Some(2));
        let calls = fake.calls();
        assert_eq!(calls[1], "up");
        assert!(calls[2].starts_with("ssh -c"));
        assert_eq!(calls.last().map(String::as_str), Some("suspend"));
        assert_eq!(
            read_lines(&fake.root.join("remote.log")),
            vec!["sh -c 'exit 2' benchmarks"]
        );
    }
}
