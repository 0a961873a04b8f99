// Privilege elevation: launching the helper as an administrator
//
// Only spawn-and-poll is assumed. Whether the user authorized the prompt is
// observed indirectly through the helper's liveness marker.

use super::{BackendPriority, shell_quote};
use crate::error::ShapingError;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

pub mod direct;
pub mod osascript;
pub mod pkexec;

/// Program + arguments of the helper process to launch elevated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl HelperRequest {
    /// Shell-quoted command line (for mechanisms that take a script)
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|part| shell_quote(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Handle to a launched (possibly elevated) helper process
pub trait HelperProcess: Send {
    /// OS process id of the launched process (the elevation wrapper, if any)
    fn id(&self) -> Option<u32>;

    fn is_alive(&mut self) -> bool;

    /// Force the process to stop (SIGTERM, then kill)
    fn terminate(&mut self) -> Result<()>;
}

/// A way of running the helper with administrator privileges
pub trait Elevator: Send + Sync {
    /// Elevator name (e.g., "osascript", "pkexec", "direct")
    fn name(&self) -> &'static str;

    /// Priority for auto-selection
    fn priority(&self) -> BackendPriority;

    /// Check if this mechanism exists on the current system
    fn is_available() -> bool
    where
        Self: Sized;

    /// Launch the helper; an error means elevation could not even be attempted
    fn spawn(&self, request: &HelperRequest) -> Result<Box<dyn HelperProcess>, ShapingError>;
}

/// Spawn `command` detached from our terminal
pub(crate) fn spawn_quiet(mut command: Command) -> Result<Box<dyn HelperProcess>, ShapingError> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ShapingError::SpawnFailed(e.to_string()))?;

    log::debug!("Spawned helper launcher (pid {})", child.id());
    Ok(Box::new(ChildProcess { child }))
}

/// `HelperProcess` backed by a std child process
pub struct ChildProcess {
    child: Child,
}

impl HelperProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if let Err(e) = kill(pid, Signal::SIGTERM) {
                log::debug!("SIGTERM to helper {} failed: {}", pid, e);
            }
            for _ in 0..10 {
                if !self.is_alive() {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(10));
            }
        }

        self.child.kill().context("Failed to kill helper process")?;
        let _ = self.child.wait();
        Ok(())
    }
}

/// Elevator metadata for selection
#[derive(Debug, Clone)]
pub struct ElevatorInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

/// Detect all elevation mechanisms
pub fn detect_elevators() -> Vec<ElevatorInfo> {
    vec![
        ElevatorInfo {
            name: "osascript",
            priority: BackendPriority::Best,
            available: osascript::Osascript::is_available(),
        },
        ElevatorInfo {
            name: "pkexec",
            priority: BackendPriority::Good,
            available: pkexec::Pkexec::is_available(),
        },
        ElevatorInfo {
            name: "direct",
            priority: BackendPriority::Fallback,
            available: direct::Direct::is_available(),
        },
    ]
}

/// Pick an elevator: the preferred one, `direct` when already root, else the best prompt
pub fn select_elevator(preference: Option<&str>) -> Option<Box<dyn Elevator>> {
    if let Some(name) = preference {
        log::info!("Using preferred elevator: {}", name);
        return create_elevator(name).ok();
    }

    if direct::Direct::is_available() {
        log::info!("Already running as root, launching helper directly");
        return create_elevator("direct").ok();
    }

    let selected = detect_elevators()
        .into_iter()
        .filter(|e| e.available)
        .max_by_key(|e| e.priority)
        .and_then(|info| {
            log::info!("Auto-selected elevator: {}", info.name);
            create_elevator(info.name).ok()
        });

    if selected.is_none() {
        log::error!("No privilege elevation mechanism available");
    }

    selected
}

/// Create an elevator by name
pub fn create_elevator(name: &str) -> Result<Box<dyn Elevator>> {
    match name {
        "osascript" => Ok(Box::new(osascript::Osascript)),
        "pkexec" => Ok(Box::new(pkexec::Pkexec)),
        "direct" => Ok(Box::new(direct::Direct)),
        _ => Err(anyhow::anyhow!("Unknown elevator: {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_arguments() {
        let request = HelperRequest {
            program: PathBuf::from("/Applications/Net Limit/netlimit"),
            args: vec![
                "helper".to_string(),
                "--channel".to_string(),
                "/tmp/netlimit-default.cmd".to_string(),
            ],
        };
        assert_eq!(
            request.command_line(),
            "'/Applications/Net Limit/netlimit' helper --channel /tmp/netlimit-default.cmd"
        );
    }

    #[test]
    fn test_create_elevator_by_name() {
        assert_eq!(create_elevator("osascript").unwrap().name(), "osascript");
        assert_eq!(create_elevator("pkexec").unwrap().name(), "pkexec");
        assert_eq!(create_elevator("direct").unwrap().name(), "direct");
        assert!(create_elevator("runas").is_err());
    }

    #[test]
    fn test_missing_program_is_spawn_failure() {
        let request = HelperRequest {
            program: PathBuf::from("/nonexistent/netlimit-helper"),
            args: vec![],
        };
        let err = direct::Direct.spawn(&request).err().unwrap();
        assert_eq!(err.kind(), "SpawnFailed");
    }

    #[cfg(unix)]
    #[test]
    fn test_child_process_terminate() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut process = spawn_quiet(command).unwrap();

        assert!(process.is_alive());
        assert!(process.id().is_some());
        process.terminate().unwrap();

        let mut gone = false;
        for _ in 0..50 {
            if !process.is_alive() {
                gone = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(gone);
        // Terminating an exited process is a no-op
        process.terminate().unwrap();
    }
}
