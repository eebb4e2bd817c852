//! `benchrun`: run benchmarks or documentation builds inside a jail.
//!
//! Every command runs against a workspace root holding the host files
//! (`hostname`, `deploy-key`, `git-ssh`), the lock token and the results
//! clone. Only one command may be active per root at a time.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use benchrun::bench::{Bench, BenchRequest};
use benchrun::core::selection::{DEFAULT_DOCS_REF, run_selection};
use benchrun::core::types::JailKind;
use benchrun::docs::build_docs;
use benchrun::exit_codes;
use benchrun::io::config::{DEFAULT_CONFIG_FILE, load_config};
use benchrun::io::interrupt;
use benchrun::io::jail::build_jail;
use benchrun::io::lock::LockFile;
use benchrun::io::results::GitResultsRepo;
use benchrun::io::workspace::BenchPaths;
use benchrun::logging;
use benchrun::schedule::{populate, run_cron};

#[derive(Parser)]
#[command(
    name = "benchrun",
    version,
    about = "Run benchmarks or doc builds inside a jail and publish the results"
)]
struct Cli {
    /// Workspace root (default: current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (default: `<root>/benchrun.toml`; optional).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Jail to use.
    #[arg(short, long, global = true, value_enum)]
    jail: Option<JailKind>,

    /// File name of the lock token.
    #[arg(short, long, global = true)]
    lockfile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run benchmarks, commit the results and upload them if `deploy-key` exists.
    Run {
        /// Commit locally but never push or publish.
        #[arg(long)]
        no_upload: bool,
        /// Arguments passed on to the benchmark tool's `run`.
        #[arg(
            value_name = "ARGS",
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },
    /// Benchmark new commits, writing all output to the cron log.
    Cron,
    /// Benchmark several ranges throughout the project history.
    Populate,
    /// Create and register the jail's backing image.
    #[command(alias = "init-box")]
    Setup {
        /// Rebuild even if the image is already registered.
        #[arg(short, long)]
        force: bool,
    },
    /// Build the documentation. Output goes to `doc/`.
    Docs {
        /// Tag or commit to build.
        #[arg(value_name = "TAG", default_value = DEFAULT_DOCS_REF)]
        tag: String,
    },
}

fn main() {
    let cli = Cli::parse();
    // The cron log is a file even when started from a terminal.
    logging::init(!matches!(cli.command, Command::Cron));
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    interrupt::install()?;

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let root = std::path::absolute(&root)
        .with_context(|| format!("resolve root {}", root.display()))?;
    let config_path = cli
        .config
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&config_path)?;
    if let Some(jail) = cli.jail {
        config.jail = jail;
    }
    if let Some(lockfile) = cli.lockfile {
        config.lockfile = lockfile;
    }
    config.validate()?;

    let paths = BenchPaths::new(&root, &config);
    let lock = LockFile::new(&paths.lockfile)
        .with_poll_interval(Duration::from_millis(config.lock_poll_interval_ms));
    let jail = build_jail(config.jail, &config, &paths);
    let results = GitResultsRepo::new(&config.results, &paths);
    let bench = Bench::new(&paths, &lock, &*jail, &results);

    match cli.command {
        Command::Run { no_upload, args } => {
            let request = BenchRequest::new(run_selection(&args), !no_upload);
            bench.run_benchmarks(&request)?;
        }
        Command::Cron => {
            run_cron(&bench, &config.schedule.cron, &paths.cron_log)?;
        }
        Command::Populate => {
            populate(&bench, &config.schedule.populate, true)?;
        }
        Command::Setup { force } => bench.setup_jail(force)?,
        Command::Docs { tag } => build_docs(&bench, &tag)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_keeps_hyphenated_args() {
        let cli = Cli::parse_from(["benchrun", "run", "-k", "--steps", "5", "NEW"]);
        match cli.command {
            Command::Run { no_upload, args } => {
                assert!(!no_upload);
                assert_eq!(args, vec!["-k", "--steps", "5", "NEW"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_no_upload_before_args() {
        let cli = Cli::parse_from(["benchrun", "run", "--no-upload", "v0.5.0^..master"]);
        assert!(matches!(
            cli.command,
            Command::Run { no_upload: true, ref args } if args == &["v0.5.0^..master"]
        ));
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["benchrun", "-j", "cmd", "-l", "other.lock", "cron"]);
        assert_eq!(cli.jail, Some(JailKind::Cmd));
        assert_eq!(cli.lockfile.as_deref(), Some("other.lock"));
        assert!(matches!(cli.command, Command::Cron));
    }

    #[test]
    fn parse_init_box_alias() {
        let cli = Cli::parse_from(["benchrun", "init-box", "--force"]);
        assert!(matches!(cli.command, Command::Setup { force: true }));
    }

    #[test]
    fn parse_docs_defaults_to_master() {
        let cli = Cli::parse_from(["benchrun", "docs"]);
        assert!(matches!(cli.command, Command::Docs { ref tag } if tag == "master"));
    }
}
