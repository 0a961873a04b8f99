// Privileged helper: installs shaping, then polls the command channel until told to exit
//
// Runs as a separate elevated process (`netlimit helper ...`). State machine:
// Initializing -> Polling -> Terminating -> Exited. A failing reconfigure
// command is logged and swallowed; only the terminate sentinel ends the loop.

use crate::ack::{AckFile, Acknowledgement};
use crate::backends::runner::{CommandRunner, ShellRunner};
use crate::backends::shaping::{Invocation, ShapingBackend, create_backend};
use crate::channel::{CommandChannel, LivenessMarker};
use crate::command::Command;
use crate::error::ShapingError;
use crate::limit::ShapingLimit;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    Initializing,
    Polling,
    Terminating,
    Exited,
}

/// Everything the elevated process needs, as passed on its command line
#[derive(Debug, Clone)]
pub struct HelperOptions {
    pub channel: PathBuf,
    pub marker: PathBuf,
    pub ack: Option<PathBuf>,
    pub backend: String,
    pub interface: Option<String>,
    pub limit: ShapingLimit,
    pub poll_interval: Duration,
    /// Uid of the controller; commands from anyone else are ignored
    pub owner_uid: Option<u32>,
}

pub struct Helper<R: CommandRunner> {
    channel: CommandChannel,
    marker: LivenessMarker,
    ack: Option<AckFile>,
    backend: Box<dyn ShapingBackend>,
    runner: R,
    poll_interval: Duration,
    state: HelperState,
    stop: Arc<AtomicBool>,
    pid: u32,
}

impl<R: CommandRunner> Helper<R> {
    pub fn new(
        channel: CommandChannel,
        marker: LivenessMarker,
        backend: Box<dyn ShapingBackend>,
        runner: R,
    ) -> Self {
        Self {
            channel,
            marker,
            ack: None,
            backend,
            runner,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: HelperState::Initializing,
            stop: Arc::new(AtomicBool::new(false)),
            pid: std::process::id(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_ack(mut self, ack: AckFile) -> Self {
        self.ack = Some(ack);
        self
    }

    /// PID published in the liveness marker (defaults to this process)
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Flag that aborts the loop immediately, skipping teardown (like a kill)
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> HelperState {
        self.state
    }

    /// Install initial shaping and publish the liveness marker.
    /// Any failure is fatal: the helper moves straight to `Exited`.
    pub fn initialize(&mut self, limit: &ShapingLimit) -> Result<(), ShapingError> {
        log::info!(
            "Helper initializing {} shaping: {}",
            self.backend.name(),
            limit
        );

        for invocation in self.backend.setup(limit) {
            if let Err(e) = self.runner.run(&invocation) {
                log::error!("Initial shaping setup failed: {}", e);
                self.restore_defaults();
                self.state = HelperState::Exited;
                return Err(e);
            }
        }

        if let Err(e) = self.marker.publish(self.pid) {
            log::error!("Failed to publish liveness marker {:?}: {}", self.marker.path(), e);
            self.restore_defaults();
            self.state = HelperState::Exited;
            return Err(e.into());
        }

        log::info!("Helper ready (pid {})", self.pid);
        self.state = HelperState::Polling;
        Ok(())
    }

    /// One tick of the polling loop
    pub fn poll_once(&mut self) -> HelperState {
        if self.state != HelperState::Polling {
            return self.state;
        }

        let raw = match self.channel.drain() {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.state,
            Err(e) => {
                log::warn!("Failed to read command channel: {}", e);
                return self.state;
            }
        };

        match Command::decode(&raw) {
            Some(Command::Terminate) => self.terminate(),
            Some(Command::Reconfigure { seq, invocations }) => self.apply(seq, &invocations),
            None => {}
        }

        self.state
    }

    /// Initialize, then poll until terminated or stopped
    pub fn run(mut self, limit: &ShapingLimit) -> Result<(), ShapingError> {
        self.initialize(limit)?;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                log::warn!("Helper stopped without teardown");
                self.state = HelperState::Exited;
                break;
            }

            if self.poll_once() == HelperState::Exited {
                break;
            }

            thread::sleep(self.poll_interval);
        }

        Ok(())
    }

    fn apply(&mut self, seq: Option<u64>, invocations: &[Invocation]) {
        log::debug!(
            "Applying reconfigure {:?} ({} invocations)",
            seq,
            invocations.len()
        );

        let mut failures = Vec::new();
        for invocation in invocations {
            // Best-effort: a failed reconfigure must not end the session
            if let Err(e) = self.runner.run(invocation) {
                log::warn!("{}", e);
                failures.push(e.to_string());
            }
        }

        if let Some(ack) = &self.ack {
            let ack_record = Acknowledgement {
                seq,
                ok: failures.is_empty(),
                failures,
                applied_at: chrono::Utc::now(),
            };
            if let Err(e) = ack.write(&ack_record) {
                log::warn!("{:#}", e);
            }
        }
    }

    fn terminate(&mut self) {
        log::info!("Helper terminating, restoring default filtering");
        self.state = HelperState::Terminating;

        self.restore_defaults();

        if let Err(e) = self.channel.reset() {
            log::warn!("Failed to remove command channel: {}", e);
        }
        if let Err(e) = self.marker.clear() {
            log::warn!("Failed to remove liveness marker: {}", e);
        }
        if let Some(ack) = &self.ack {
            let _ = ack.clear();
        }

        self.state = HelperState::Exited;
        log::info!("Helper exited");
    }

    fn restore_defaults(&mut self) {
        for invocation in self.backend.teardown() {
            if let Err(e) = self.runner.run(&invocation) {
                log::warn!("{}", e);
            }
        }
    }
}

/// Entry point of the elevated `helper` subcommand
pub fn run_privileged(options: HelperOptions) -> Result<()> {
    let backend = create_backend(&options.backend, options.interface.as_deref())
        .context("Failed to create shaping backend in helper")?;

    let mut channel = CommandChannel::new(&options.channel);
    if let Some(uid) = options.owner_uid {
        #[cfg(unix)]
        if let Some(dir) = options.channel.parent() {
            crate::channel::verify_private_dir(dir, uid)
                .with_context(|| format!("Refusing session directory {}", dir.display()))?;
        }
        channel = channel.with_owner(uid);
    }

    let mut helper = Helper::new(
        channel,
        LivenessMarker::new(options.marker),
        backend,
        ShellRunner,
    )
    .with_poll_interval(options.poll_interval);

    if let Some(ack) = options.ack {
        helper = helper.with_ack(AckFile::new(ack));
    }

    helper
        .run(&options.limit)
        .context("Privileged helper failed to start shaping")?;
    Ok(())
}
