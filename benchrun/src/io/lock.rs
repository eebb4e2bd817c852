//! Crash-aware, reentrant host-wide mutex built on a filesystem token.
//!
//! The token is a symbolic link whose target text is the owner's PID.
//! `symlink(2)` either creates the link or fails with `EEXIST`, so two
//! processes that both observe "no lock" cannot both succeed. A token whose
//! owner process has exited is reclaimed by the next acquirer; deletion of a
//! stale token is serialized through a derived sub-lock (`<token>.lock`) so
//! two reclaimers cannot delete each other's fresh token.
//!
//! Liveness comes from the process table, not a lease: a crashed holder is
//! reclaimable immediately, while a hung but alive holder blocks everyone.

use std::cell::Cell;
use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Suffix of the sub-lock guarding reclamation of a stale token.
pub const SUBLOCK_SUFFIX: &str = ".lock";
/// Poll interval of a blocking acquire.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LockError {
    /// `release` called more often than `acquire`; a programming error.
    #[error("invalid lock nesting: release of {} without a matching acquire", path.display())]
    InvalidNesting { path: PathBuf },
    #[error("{action} lock token {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reentrant lock handle for one token path.
///
/// The nesting depth is tracked per instance; share one instance (by
/// reference) across every scope of a process that needs the lock.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    owner: u32,
    depth: Cell<u32>,
    poll_interval: Duration,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: std::process::id(),
            depth: Cell::new(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn is_held(&self) -> bool {
        self.depth.get() > 0
    }

    /// Acquire the lock.
    ///
    /// Returns `Ok(false)` only when `blocking` is false and a live process
    /// holds the token; nothing is modified in that case. A blocking acquire
    /// polls until the token can be created.
    #[instrument(skip_all, fields(path = %self.path.display(), blocking = blocking))]
    pub fn acquire(&self, blocking: bool) -> Result<bool, LockError> {
        let depth = self.depth.get();
        if depth > 0 {
            self.depth.set(depth + 1);
            debug!(depth = depth + 1, "reentrant acquire");
            return Ok(true);
        }

        loop {
            self.reclaim_if_abandoned()?;
            if self.try_create()? {
                break;
            }
            if !blocking {
                debug!("lock held by another process");
                return Ok(false);
            }
            thread::sleep(self.poll_interval);
        }

        self.depth.set(1);
        debug!(owner = self.owner, "lock acquired");
        Ok(true)
    }

    /// Release one level of nesting; the token is removed at depth zero.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn release(&self) -> Result<(), LockError> {
        let depth = self.depth.get();
        if depth == 0 {
            return Err(LockError::InvalidNesting {
                path: self.path.clone(),
            });
        }
        if depth == 1 {
            let own = self.owner.to_string();
            match read_owner(&self.path)? {
                Some(owner) if owner == own => remove_token(&self.path)?,
                Some(owner) => warn!(owner = %owner, "token no longer ours, leaving it"),
                None => warn!("token vanished while held"),
            }
            debug!("lock released");
        }
        self.depth.set(depth - 1);
        Ok(())
    }

    /// Scoped acquisition: the returned guard releases on drop.
    ///
    /// `Ok(None)` mirrors `acquire` returning false.
    pub fn guard(&self, blocking: bool) -> Result<Option<LockGuard<'_>>, LockError> {
        if self.acquire(blocking)? {
            Ok(Some(LockGuard { lock: self }))
        } else {
            Ok(None)
        }
    }

    fn try_create(&self) -> Result<bool, LockError> {
        match symlink(self.owner.to_string(), &self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(LockError::Io {
                action: "create",
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn reclaim_if_abandoned(&self) -> Result<(), LockError> {
        let Some(owner) = read_owner(&self.path)? else {
            return Ok(());
        };
        if owner_alive(&owner) {
            return Ok(());
        }

        warn!(owner = %owner, "reclaiming lock token of dead process");
        let sublock = LockFile::new(sublock_path(&self.path)).with_poll_interval(self.poll_interval);
        let _sublock = sublock.guard(true)?;
        // Another reclaimer may have replaced the token while we waited.
        if read_owner(&self.path)?.as_deref() == Some(owner.as_str()) {
            remove_token(&self.path)?;
        }
        Ok(())
    }
}

/// Releases its lock level when dropped, on every exit path.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a LockFile,
}

impl LockGuard<'_> {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            error!(err = %err, "failed to release lock");
        }
    }
}

/// Derived sub-lock path used while deleting a stale token.
pub fn sublock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(SUBLOCK_SUFFIX);
    PathBuf::from(name)
}

/// Whether the PID recorded in a token belongs to a running process.
///
/// Unparsable or non-positive owners are treated as dead.
pub fn owner_alive(owner: &str) -> bool {
    let Ok(pid) = owner.trim().parse::<i32>() else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        // Exists, but belongs to another user.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn read_owner(path: &Path) -> Result<Option<String>, LockError> {
    match fs::read_link(path) {
        Ok(target) => Ok(Some(target.to_string_lossy().into_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) if err.kind() == ErrorKind::InvalidInput => {
            // Not a symlink: cannot tell who owns it, so never reclaim it.
            warn!(path = %path.display(), "lock path is not a token symlink");
            Ok(None)
        }
        Err(source) => Err(LockError::Io {
            action: "read",
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn remove_token(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            action: "remove",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;

    const FAST: Duration = Duration::from_millis(20);
    const DEAD_PID: &str = "999999999";

    fn lock_in(dir: &Path) -> LockFile {
        LockFile::new(dir.join("lockfile")).with_poll_interval(FAST)
    }

    #[test]
    fn acquire_creates_token_naming_owner() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(temp.path());

        assert!(lock.acquire(false).expect("acquire"));
        let target = fs::read_link(lock.path()).expect("readlink");
        assert_eq!(target.to_string_lossy(), std::process::id().to_string());

        lock.release().expect("release");
        assert!(fs::symlink_metadata(lock.path()).is_err());
    }

    #[test]
    fn reentrant_acquire_is_depth_counted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(temp.path());

        assert!(lock.acquire(false).expect("first"));
        assert!(lock.acquire(false).expect("second"));
        assert_eq!(lock.depth(), 2);

        lock.release().expect("release once");
        assert!(lock.is_held());
        assert!(fs::symlink_metadata(lock.path()).is_ok());

        lock.release().expect("release twice");
        assert!(!lock.is_held());
        assert!(fs::symlink_metadata(lock.path()).is_err());
    }

    #[test]
    fn release_without_acquire_is_invalid_nesting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(temp.path());

        let err = lock.release().unwrap_err();
        assert!(matches!(err, LockError::InvalidNesting { .. }));
        assert!(err.to_string().contains("invalid lock nesting"));
    }

    #[test]
    fn second_holder_is_refused_without_side_effects() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = lock_in(temp.path());
        let second = lock_in(temp.path());

        assert!(first.acquire(false).expect("first"));
        assert!(!second.acquire(false).expect("second"));
        assert_eq!(second.depth(), 0);
        assert!(first.is_held());
        assert!(fs::symlink_metadata(first.path()).is_ok());

        first.release().expect("release");
        assert!(second.acquire(false).expect("second after release"));
        second.release().expect("release second");
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lockfile");
        let (held_tx, held_rx) = mpsc::channel();

        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let lock = LockFile::new(holder_path).with_poll_interval(FAST);
            assert!(lock.acquire(false).expect("holder acquire"));
            held_tx.send(()).expect("signal held");
            thread::sleep(Duration::from_millis(200));
            lock.release().expect("holder release");
        });

        held_rx.recv().expect("wait for holder");
        let waiter = LockFile::new(&path).with_poll_interval(FAST);
        let started = Instant::now();
        assert!(waiter.acquire(true).expect("blocking acquire"));
        assert!(started.elapsed() >= Duration::from_millis(100));
        waiter.release().expect("waiter release");
        holder.join().expect("holder thread");
    }

    #[test]
    fn token_of_dead_owner_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(temp.path());
        symlink(DEAD_PID, lock.path()).expect("plant stale token");

        assert!(lock.acquire(false).expect("acquire"));
        let target = fs::read_link(lock.path()).expect("readlink");
        assert_eq!(target.to_string_lossy(), std::process::id().to_string());
        assert!(fs::symlink_metadata(sublock_path(lock.path())).is_err());
        lock.release().expect("release");
    }

    #[test]
    fn garbage_owner_counts_as_dead() {
        assert!(!owner_alive("not-a-pid"));
        assert!(!owner_alive("0"));
        assert!(!owner_alive("-1"));
        assert!(!owner_alive(DEAD_PID));
        assert!(owner_alive(&std::process::id().to_string()));
    }

    #[test]
    fn guard_releases_on_panic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(temp.path());

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.guard(false).expect("guard").expect("acquired");
            panic!("body failed");
        }));

        assert!(result.is_err());
        assert!(!lock.is_held());
        assert!(fs::symlink_metadata(lock.path()).is_err());
    }

    #[test]
    fn release_leaves_foreign_token_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(temp.path());
        assert!(lock.acquire(false).expect("acquire"));

        fs::remove_file(lock.path()).expect("remove");
        symlink("1", lock.path()).expect("foreign token");

        lock.release().expect("release");
        assert_eq!(
            fs::read_link(lock.path()).expect("readlink").to_string_lossy(),
            "1"
        );
    }

    #[test]
    fn sublock_path_appends_suffix() {
        assert_eq!(
            sublock_path(Path::new("/tmp/lockfile")),
            PathBuf::from("/tmp/lockfile.lock")
        );
    }
}
