// Controller: launches the privileged helper and drives it through the command channel
//
// Lives in the caller's process. `enable` spawns the helper under an
// elevation request and waits (bounded) for its liveness marker on a Tokio
// task; the outcome comes back as a `ControllerEvent` that is applied on the
// caller's thread, either by awaiting `enable` or by calling
// `process_events` from a UI loop. `update_limit` and `disable` are small
// synchronous file writes.

use crate::ack::{AckFile, Acknowledgement};
use crate::backends::elevation::{Elevator, HelperProcess, HelperRequest};
use crate::backends::shaping::ShapingBackend;
use crate::channel::{CommandChannel, LivenessMarker};
use crate::command::Command;
use crate::error::ShapingError;
use crate::limit::ShapingLimit;
use crate::session::{Session, SessionState};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type SharedProcess = Arc<Mutex<Box<dyn HelperProcess>>>;

fn lock_process(process: &SharedProcess) -> MutexGuard<'_, Box<dyn HelperProcess>> {
    process.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Timeouts and intervals of the controller/helper protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long `enable` waits for the liveness marker
    pub readiness_timeout: Duration,
    /// How often the marker is checked while waiting
    pub readiness_poll: Duration,
    /// Poll interval handed to the helper
    pub helper_poll: Duration,
    /// Delay before a helper that ignored the terminate command is killed
    pub grace_period: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(2),
            readiness_poll: Duration::from_millis(100),
            helper_poll: Duration::from_millis(200),
            grace_period: Duration::from_secs(1),
        }
    }
}

/// Outcome of a readiness wait, tagged with the enable attempt it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Ready { attempt: u64 },
    Failed { attempt: u64, error: ShapingError },
}

pub struct Controller {
    session: Session,
    channel: CommandChannel,
    marker: LivenessMarker,
    ack: Option<AckFile>,
    backend: Box<dyn ShapingBackend>,
    elevator: Box<dyn Elevator>,
    helper_program: PathBuf,
    timing: Timing,

    state: SessionState,
    limit: Option<ShapingLimit>,
    last_error: Option<String>,
    helper: Option<SharedProcess>,
    /// Helper told to exit by `disable` that may still be tearing down
    retiring: Option<SharedProcess>,
    readiness: Option<JoinHandle<()>>,
    attempt: u64,
    seq: u64,

    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl Controller {
    pub fn new(
        session: Session,
        backend: Box<dyn ShapingBackend>,
        elevator: Box<dyn Elevator>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let helper_program =
            std::env::current_exe().unwrap_or_else(|_| PathBuf::from("netlimit"));

        Self {
            channel: CommandChannel::new(session.channel_path()),
            marker: LivenessMarker::new(session.marker_path()),
            ack: None,
            session,
            backend,
            elevator,
            helper_program,
            timing: Timing::default(),
            state: SessionState::Disabled,
            limit: None,
            last_error: None,
            helper: None,
            retiring: None,
            readiness: None,
            attempt: 0,
            seq: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Program launched as the helper (defaults to the current executable)
    pub fn with_helper_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.helper_program = program.into();
        self
    }

    /// Ask the helper to acknowledge every reconfigure command
    pub fn with_acknowledgements(mut self, enabled: bool) -> Self {
        self.ack = enabled.then(|| AckFile::new(self.session.ack_path()));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Most recent failure, cleared by the next successful operation
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Limit currently applied (or being applied while starting)
    pub fn active_limit(&self) -> Option<ShapingLimit> {
        self.limit
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn elevator_name(&self) -> &'static str {
        self.elevator.name()
    }

    /// PID the helper recorded in its liveness marker
    pub fn helper_pid(&self) -> Option<u32> {
        self.marker.read_pid()
    }

    /// Outcome of the last reconfigure, if acknowledgements are on
    pub fn last_acknowledgement(&self) -> Option<Acknowledgement> {
        self.ack.as_ref().and_then(AckFile::read)
    }

    /// Command line handed to the elevator for `limit`
    pub fn helper_request(&self, limit: &ShapingLimit) -> HelperRequest {
        let mut args = vec![
            "helper".to_string(),
            "--channel".to_string(),
            self.channel.path().to_string_lossy().into_owned(),
            "--marker".to_string(),
            self.marker.path().to_string_lossy().into_owned(),
            "--backend".to_string(),
            self.backend.name().to_string(),
            "--download-kbps".to_string(),
            limit.download().kbps().to_string(),
        ];
        if limit.is_split() {
            args.push("--upload-kbps".to_string());
            args.push(limit.upload().kbps().to_string());
        }
        args.push("--poll-ms".to_string());
        args.push(self.timing.helper_poll.as_millis().to_string());
        if let Some(ack) = &self.ack {
            args.push("--ack".to_string());
            args.push(ack.path().to_string_lossy().into_owned());
        }
        #[cfg(unix)]
        {
            args.push("--owner-uid".to_string());
            args.push(crate::session::current_uid().to_string());
        }
        args.extend(self.backend.helper_args());

        HelperRequest {
            program: self.helper_program.clone(),
            args,
        }
    }

    /// Start a session without waiting for it to become ready.
    ///
    /// Returns `Ok(false)` when a session is already starting or active, and
    /// `HelperStillRunning` while the helper of a just-disabled session has
    /// not exited. The readiness outcome is delivered through
    /// `process_events`. Must be called from within a Tokio runtime.
    pub fn begin_enable(&mut self, limit: ShapingLimit) -> Result<bool, ShapingError> {
        if matches!(self.state, SessionState::Active | SessionState::Starting) {
            log::debug!("enable ignored, session already {:?}", self.state);
            return Ok(false);
        }

        // Resetting the channel now would drop the unread EXIT and leave the
        // old helper shaping alongside the new one
        if self.previous_helper_running() {
            let error = ShapingError::HelperStillRunning;
            log::warn!("{}", error);
            self.last_error = Some(error.to_string());
            return Err(error);
        }

        if let Err(e) = self.session.prepare() {
            let error = ShapingError::Io(format!(
                "Session directory {} is not private: {}",
                self.session.dir().display(),
                e
            ));
            log::error!("{}", error);
            self.last_error = Some(error.to_string());
            return Err(error);
        }

        // A previous session may have crashed without cleaning up
        if let Err(e) = self.channel.reset() {
            log::warn!("Failed to remove stale command channel: {}", e);
        }
        if let Err(e) = self.marker.clear() {
            log::warn!("Failed to remove stale liveness marker: {}", e);
        }
        if let Some(ack) = &self.ack {
            let _ = ack.clear();
        }

        let request = self.helper_request(&limit);
        log::info!(
            "Launching helper via {} ({} backend): {}",
            self.elevator.name(),
            self.backend.name(),
            limit
        );
        log::debug!("Helper command line: {}", request.command_line());

        let process = match self.elevator.spawn(&request) {
            Ok(process) => process,
            Err(e) => {
                log::error!("{}", e);
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.attempt += 1;
        let process: SharedProcess = Arc::new(Mutex::new(process));
        self.helper = Some(Arc::clone(&process));
        self.state = SessionState::Starting;
        self.limit = Some(limit);

        self.readiness = Some(tokio::spawn(wait_for_readiness(
            self.marker.clone(),
            process,
            self.timing,
            self.attempt,
            self.events_tx.clone(),
        )));

        Ok(true)
    }

    /// Start a session and wait until the helper is ready or elevation failed.
    /// No-op when already active.
    pub async fn enable(&mut self, limit: ShapingLimit) -> Result<(), ShapingError> {
        match self.state {
            SessionState::Active => return Ok(()),
            SessionState::Starting => {}
            _ => {
                self.wait_for_previous_helper().await;
                self.begin_enable(limit)?;
            }
        }

        let deadline = self.timing.readiness_timeout + self.timing.grace_period;
        let wait = async {
            loop {
                match self.events_rx.recv().await {
                    Some(event) => {
                        if let Some(result) = self.apply_event(event) {
                            return result;
                        }
                    }
                    None => return Err(ShapingError::Io("controller event channel closed".into())),
                }
            }
        };

        let outcome = tokio::time::timeout(deadline, wait).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // The readiness task itself never reported back
                self.apply_event(ControllerEvent::Failed {
                    attempt: self.attempt,
                    error: ShapingError::ElevationDeclined,
                })
                .unwrap_or(Err(ShapingError::ElevationDeclined))
            }
        }
    }

    /// Whether the helper of the last disabled session is still alive
    fn previous_helper_running(&mut self) -> bool {
        let alive = self
            .retiring
            .as_ref()
            .is_some_and(|process| lock_process(process).is_alive());
        if !alive {
            self.retiring = None;
        }
        alive
    }

    /// Give a retiring helper the grace period to finish its teardown; the
    /// reaper kills it once that is over
    async fn wait_for_previous_helper(&mut self) {
        let deadline = Instant::now() + self.timing.grace_period + self.timing.readiness_poll;
        while self.previous_helper_running() && Instant::now() < deadline {
            log::debug!("Waiting for the previous helper to exit");
            tokio::time::sleep(self.timing.readiness_poll).await;
        }
    }

    /// Apply readiness outcomes delivered since the last call (UI loop hook).
    /// Returns how many events changed the session state.
    pub fn process_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply_event(event).is_some() {
                applied += 1;
            }
        }
        applied
    }

    fn apply_event(&mut self, event: ControllerEvent) -> Option<Result<(), ShapingError>> {
        let current = self.state == SessionState::Starting;
        match event {
            ControllerEvent::Ready { attempt } if current && attempt == self.attempt => {
                self.readiness = None;
                self.state = SessionState::Active;
                self.last_error = None;
                log::info!(
                    "Shaping active (helper pid {:?}): {}",
                    self.helper_pid(),
                    self.limit.map(|l| l.to_string()).unwrap_or_default()
                );
                Some(Ok(()))
            }
            ControllerEvent::Failed { attempt, error } if current && attempt == self.attempt => {
                self.readiness = None;
                self.state = SessionState::Disabled;
                self.limit = None;
                self.last_error = Some(error.to_string());
                log::error!("Failed to enable shaping: {}", error);

                // A helper authorized after we gave up would shape with nobody
                // in control; make it exit at once and stop the launcher.
                if let Err(e) = self.channel.write(&Command::Terminate.encode()) {
                    log::warn!("Failed to queue terminate for abandoned helper: {}", e);
                }
                if let Some(process) = self.helper.take() {
                    if let Err(e) = lock_process(&process).terminate() {
                        log::warn!("Failed to stop abandoned helper launcher: {:#}", e);
                    }
                }
                Some(Err(error))
            }
            other => {
                log::debug!("Ignoring stale controller event {:?}", other);
                None
            }
        }
    }

    /// Send new rate(s) to the running helper. Fire-and-forget; no-op unless active.
    pub fn update_limit(&mut self, limit: ShapingLimit) -> Result<(), ShapingError> {
        if self.state != SessionState::Active {
            log::debug!("update ignored, session {:?}", self.state);
            return Ok(());
        }

        let previous = self.limit.unwrap_or(limit);
        self.seq += 1;
        let command = Command::reconfigure(self.seq, self.backend.update(&previous, &limit));

        if let Err(e) = self.channel.write(&command.encode()) {
            let error = ShapingError::ChannelWriteFailed(e.to_string());
            log::error!("{}", error);
            self.last_error = Some(error.to_string());
            return Err(error);
        }

        log::info!("Queued limit update #{}: {}", self.seq, limit);
        self.limit = Some(limit);
        self.last_error = None;
        Ok(())
    }

    /// Ask the helper to tear down shaping. Optimistically reports `Disabled`
    /// at once; a helper still alive after the grace period is killed.
    pub fn disable(&mut self) {
        if !matches!(self.state, SessionState::Active | SessionState::Starting) {
            log::debug!("disable ignored, session {:?}", self.state);
            return;
        }

        if let Some(readiness) = self.readiness.take() {
            readiness.abort();
        }
        // Any readiness event still in flight belongs to a dead attempt now
        self.attempt += 1;

        match self.channel.write(&Command::Terminate.encode()) {
            Ok(()) => self.last_error = None,
            Err(e) => {
                let error = ShapingError::ChannelWriteFailed(e.to_string());
                log::error!("{}", error);
                self.last_error = Some(error.to_string());
            }
        }

        self.state = SessionState::Disabled;
        self.limit = None;
        log::info!("Shaping disabled");

        if let Some(process) = self.helper.take() {
            self.retiring = Some(Arc::clone(&process));
            schedule_reaper(process, self.timing.grace_period);
        }
    }

    /// Disable and wait (up to the grace period) for the helper to exit
    pub async fn shutdown(&mut self) {
        let process = self.helper.clone();
        self.disable();

        let Some(process) = process else {
            return;
        };

        self.state = SessionState::Stopping;
        let deadline = Instant::now() + self.timing.grace_period + self.timing.readiness_poll;
        while Instant::now() < deadline && lock_process(&process).is_alive() {
            tokio::time::sleep(self.timing.readiness_poll).await;
        }
        self.state = SessionState::Disabled;
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let process = if matches!(self.state, SessionState::Active | SessionState::Starting) {
            if let Some(readiness) = self.readiness.take() {
                readiness.abort();
            }
            if let Err(e) = self.channel.write(&Command::Terminate.encode()) {
                log::error!("Failed to send terminate on shutdown: {}", e);
            }
            self.helper.take()
        } else {
            // Disabled just before exit, EXIT is already queued
            self.retiring.take()
        };

        // The reaper thread would not outlive us here, so wait in place
        if let Some(process) = process {
            let deadline = Instant::now() + self.timing.grace_period;
            while Instant::now() < deadline && lock_process(&process).is_alive() {
                thread::sleep(Duration::from_millis(20));
            }
            let mut process = lock_process(&process);
            if process.is_alive() {
                log::warn!("Helper did not exit in time, terminating");
                if let Err(e) = process.terminate() {
                    log::error!("Failed to terminate helper: {:#}", e);
                }
            }
        }
    }
}

async fn wait_for_readiness(
    marker: LivenessMarker,
    process: SharedProcess,
    timing: Timing,
    attempt: u64,
    events: mpsc::UnboundedSender<ControllerEvent>,
) {
    let deadline = Instant::now() + timing.readiness_timeout;

    let event = loop {
        tokio::time::sleep(timing.readiness_poll).await;

        if marker.exists() {
            break ControllerEvent::Ready { attempt };
        }

        if !lock_process(&process).is_alive() {
            log::info!("Helper launcher exited before becoming ready");
            break ControllerEvent::Failed {
                attempt,
                error: ShapingError::ElevationDeclined,
            };
        }

        if Instant::now() >= deadline {
            log::info!(
                "No liveness marker after {:?}, treating as declined",
                timing.readiness_timeout
            );
            break ControllerEvent::Failed {
                attempt,
                error: ShapingError::ElevationDeclined,
            };
        }
    };

    let _ = events.send(event);
}

/// Kill the helper if it is still alive once the grace period is over
fn schedule_reaper(process: SharedProcess, grace_period: Duration) {
    thread::spawn(move || {
        thread::sleep(grace_period);
        let mut process = lock_process(&process);
        if process.is_alive() {
            // Known risk: a helper killed mid-teardown can leave PF non-default
            log::warn!(
                "Helper still running {:?} after terminate, force-killing it; packet filter state may not be restored",
                grace_period
            );
            if let Err(e) = process.terminate() {
                log::error!("Failed to kill helper: {:#}", e);
            }
        } else {
            log::debug!("Helper exited within grace period");
        }
    });
}
