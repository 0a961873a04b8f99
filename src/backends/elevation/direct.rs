// No prompt: the caller already runs as root (e.g. `sudo netlimit`)

use super::{Elevator, HelperProcess, HelperRequest, spawn_quiet};
use crate::backends::BackendPriority;
use crate::error::ShapingError;
use std::process::Command;

pub struct Direct;

impl Elevator for Direct {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Fallback
    }

    fn is_available() -> bool {
        #[cfg(unix)]
        {
            nix::unistd::geteuid().is_root()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn spawn(&self, request: &HelperRequest) -> Result<Box<dyn HelperProcess>, ShapingError> {
        let mut command = Command::new(&request.program);
        command.args(&request.args);
        spawn_quiet(command)
    }
}
