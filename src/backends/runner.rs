// Execution of backend invocations inside the helper

use crate::backends::shaping::Invocation;
use crate::error::ShapingError;
use std::process::{Command, Stdio};

/// Runs one invocation and reports whether it succeeded
pub trait CommandRunner: Send {
    fn run(&mut self, invocation: &Invocation) -> Result<(), ShapingError>;
}

/// Runs invocations through `/bin/sh -c`, checking only the exit status
#[derive(Debug, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<(), ShapingError> {
        log::debug!("Running: {}", invocation);

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(invocation.as_str())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ShapingError::BackendCommandFailed {
                command: invocation.to_string(),
                status: "not started".to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ShapingError::BackendCommandFailed {
                command: invocation.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every invocation; fails those containing `fail_on`
    #[derive(Debug, Clone, Default)]
    pub struct RecordingRunner {
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_on: Option<String>,
    }

    impl RecordingRunner {
        pub fn failing_on(pattern: &str) -> Self {
            Self {
                fail_on: Some(pattern.to_string()),
                ..Self::default()
            }
        }

        pub fn lines(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&mut self, invocation: &Invocation) -> Result<(), ShapingError> {
            self.log.lock().unwrap().push(invocation.to_string());
            match &self.fail_on {
                Some(pattern) if invocation.as_str().contains(pattern.as_str()) => {
                    Err(ShapingError::BackendCommandFailed {
                        command: invocation.to_string(),
                        status: "exit status: 1".to_string(),
                        stderr: "simulated failure".to_string(),
                    })
                }
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_reports_exit_status() {
        let mut runner = ShellRunner;
        assert!(runner.run(&Invocation::new("true")).is_ok());

        let err = runner
            .run(&Invocation::new("echo boom >&2; exit 3"))
            .unwrap_err();
        match err {
            ShapingError::BackendCommandFailed { stderr, status, .. } => {
                assert_eq!(stderr, "boom");
                assert!(status.contains('3'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_executes_pipelines_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let line = format!("printf '%s\\n' a b | wc -l > {}", out.display());

        ShellRunner.run(&Invocation::new(line)).unwrap();
        let count = std::fs::read_to_string(&out).unwrap();
        assert_eq!(count.trim(), "2");
    }
}
