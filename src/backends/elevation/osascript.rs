// macOS administrator prompt via AppleScript `do shell script ... with administrator privileges`
//
// osascript stays alive for as long as the elevated script runs, so its child
// handle doubles as the helper's liveness. Cancelling the prompt makes
// osascript exit with an error before the helper ever starts.

use super::{Elevator, HelperProcess, HelperRequest, spawn_quiet};
use crate::backends::BackendPriority;
use crate::error::ShapingError;
use std::path::Path;
use std::process::Command;

const OSASCRIPT: &str = "/usr/bin/osascript";

/// Escape a string for inclusion in an AppleScript string literal
fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the AppleScript that runs `request` with administrator privileges
pub fn compose_script(request: &HelperRequest) -> String {
    format!(
        "do shell script \"{}\" with administrator privileges",
        applescript_escape(&request.command_line())
    )
}

pub struct Osascript;

impl Elevator for Osascript {
    fn name(&self) -> &'static str {
        "osascript"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Best
    }

    fn is_available() -> bool {
        Path::new(OSASCRIPT).exists()
    }

    fn spawn(&self, request: &HelperRequest) -> Result<Box<dyn HelperProcess>, ShapingError> {
        let mut command = Command::new(OSASCRIPT);
        command.arg("-e").arg(compose_script(request));
        spawn_quiet(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_script_escapes_quotes_and_backslashes() {
        let request = HelperRequest {
            program: PathBuf::from("/usr/local/bin/netlimit"),
            args: vec!["helper".to_string(), "say \"hi\"".to_string()],
        };
        assert_eq!(
            compose_script(&request),
            r#"do shell script "/usr/local/bin/netlimit helper 'say \"hi\"'" with administrator privileges"#
        );
        assert_eq!(applescript_escape(r"a\b"), r"a\\b");
    }
}
