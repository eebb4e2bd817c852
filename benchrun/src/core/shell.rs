//! POSIX shell quoting for commands that cross a shell boundary.
//!
//! The virtualized jail ships the whole workload command to the guest as a
//! single `vagrant ssh -c` string, so every argument has to survive one round
//! of shell parsing literally.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quote a single argument for a POSIX shell.
pub fn quote(arg: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(arg))
}

/// Join arguments into one shell command line, quoting each argument.
pub fn join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| quote(arg.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
