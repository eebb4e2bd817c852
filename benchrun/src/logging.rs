//! Diagnostic tracing for the runner.
//!
//! Operator-facing progress (`-- Doing a benchmark run`, `$ git pull ...`) is
//! printed to stdout and ends up in the cron log. Tracing is separate: it is
//! controlled by `RUST_LOG` and written to stderr, with colours only when
//! stderr is a terminal.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output: stderr, compact format.
/// `interactive` is false when stderr will be pointed at a log file later on.
///
/// # Example
/// ```bash
/// RUST_LOG=benchrun=debug benchrun run -- --quick
/// ```
pub fn init(interactive: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(use_ansi(interactive, std::io::stderr().is_terminal()))
                .compact(),
        )
        .init();
}

fn use_ansi(interactive: bool, stderr_is_terminal: bool) -> bool {
    interactive && stderr_is_terminal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colours_only_on_an_interactive_terminal() {
        assert!(use_ansi(true, true));
        assert!(!use_ansi(true, false));
        assert!(!use_ansi(false, true));
    }
}
