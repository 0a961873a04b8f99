// Linux polkit prompt via pkexec
//
// pkexec exits with 126/127 when the dialog is dismissed or authorization
// fails, which the controller sees as the launcher dying before readiness.

use super::{Elevator, HelperProcess, HelperRequest, spawn_quiet};
use crate::backends::{BackendPriority, command_exists};
use crate::error::ShapingError;
use std::process::Command;

pub struct Pkexec;

impl Elevator for Pkexec {
    fn name(&self) -> &'static str {
        "pkexec"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available() -> bool {
        command_exists("pkexec")
    }

    fn spawn(&self, request: &HelperRequest) -> Result<Box<dyn HelperProcess>, ShapingError> {
        // pkexec requires an absolute program path
        let mut command = Command::new("pkexec");
        command.arg(&request.program).args(&request.args);
        spawn_quiet(command)
    }
}
