// Backend trait definitions and core types

pub mod elevation;
pub mod runner;
pub mod shaping;

use std::process::Command;

/// Backend priority ranking (higher = better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendPriority {
    Fallback = 1, // Works but needs manual setup (direct root execution)
    Good = 2,     // Solid implementation (tc + IFB, pkexec)
    Better = 3,   // Modern, efficient
    Best = 4,     // Native platform mechanism (dummynet, osascript)
}

/// Check if an executable can be found on PATH
pub(crate) fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Quote a string for POSIX sh using single quotes
pub(crate) fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_leaves_plain_words() {
        assert_eq!(shell_quote("/usr/sbin/dnctl"), "/usr/sbin/dnctl");
        assert_eq!(shell_quote("--download-kbps"), "--download-kbps");
    }

    #[test]
    fn test_shell_quote_wraps_special_characters() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("{ tcp, udp }"), "'{ tcp, udp }'");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(BackendPriority::Best > BackendPriority::Good);
        assert!(BackendPriority::Good > BackendPriority::Fallback);
    }
}
