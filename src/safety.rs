//! Best-effort denylist screening of generated commands.
//!
//! This is a filter against honest mistakes, not a sandbox. A plain substring
//! match is trivially bypassed (aliases, variables, `;`/`&&` chains, path
//! tricks); commands that pass are run with the user's full privileges.

/// Lower-case substrings whose presence anywhere in a command rejects it.
pub const DENYLIST: &[&str] = &[
    "rm ",
    "reboot",
    "shutdown",
    "mkfs",
    "dd ",
    "kill ",
    "killall",
    "poweroff",
    "init",
    ":(){",
    "chmod 777",
    "chown",
    ">/",
    ">>/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyVerdict {
    Accepted,
    Rejected { pattern: &'static str },
}

/// Case-insensitive screen; reports the first denylist entry found. A command
/// is safe exactly when this returns [`SafetyVerdict::Accepted`].
pub fn check(command: &str) -> SafetyVerdict {
    let lowered = command.to_lowercase();
    DENYLIST
        .iter()
        .copied()
        .find(|pattern| lowered.contains(*pattern))
        .map_or(SafetyVerdict::Accepted, |pattern| SafetyVerdict::Rejected { pattern })
}
