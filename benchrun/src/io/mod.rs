//! Side-effecting adapters: filesystem, processes, git, signals.

pub mod config;
pub mod git;
pub mod interrupt;
pub mod jail;
pub mod lock;
pub mod process;
pub mod redirect;
pub mod results;
pub mod workspace;
