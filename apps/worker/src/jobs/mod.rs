//! Built-in commands
//!
//! Media business logic lives outside the daemon; these are the commands
//! every daemon ships with, used for health checks and smoke tests.

pub mod daemon;
pub mod library;

use crate::dispatcher::CommandTable;

/// Command table holding the built-in commands
pub fn builtin_commands() -> CommandTable {
    CommandTable::new()
        .with("Library", "noop", library::Noop)
        .with("Daemon", "sleep", daemon::Sleep)
        .with("Daemon", "echo", daemon::Echo)
        .with("Daemon", "fail", daemon::Fail)
        .with("Daemon", "fanout", daemon::Fanout)
}
