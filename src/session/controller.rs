use super::machine::SessionStateMachine;
use super::runner::{SessionCommand, SessionRunner};
use super::types::{Phase, SessionConfig, SessionTimings};
use crate::announcer::{player_from_config, CueMap, CuePlayer, FeedbackAnnouncer};
use crate::capture::{open_source, CaptureTarget, FrameSource, SourceGuard};
use crate::config::FormcoachConfig;
use crate::error::{FormcoachError, Result};
use crate::events::EventBus;
use crate::records::{LoggingRecordStore, SessionRecordStore};
use crate::replay::ReplayRecorder;
use crate::report::SessionReport;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

const COMMAND_CAPACITY: usize = 4;

/// Starts sessions, one at a time
pub struct SessionController {
    settings: Arc<FormcoachConfig>,
    event_bus: EventBus,
    records: Arc<dyn SessionRecordStore>,
    player: Arc<dyn CuePlayer>,
    current: Mutex<Option<watch::Receiver<Phase>>>,
}

impl SessionController {
    pub fn new(settings: FormcoachConfig) -> Self {
        let player = player_from_config(&settings.announcer);

        Self {
            event_bus: EventBus::new(settings.system.event_bus_capacity),
            settings: Arc::new(settings),
            records: Arc::new(LoggingRecordStore),
            player,
            current: Mutex::new(None),
        }
    }

    pub fn with_record_store(mut self, records: Arc<dyn SessionRecordStore>) -> Self {
        self.records = records;
        self
    }

    /// Publish session events on `event_bus` instead of a private bus
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_cue_player(mut self, player: Arc<dyn CuePlayer>) -> Self {
        self.player = player;
        self
    }

    pub fn settings(&self) -> &FormcoachConfig {
        &self.settings
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn record_store(&self) -> Arc<dyn SessionRecordStore> {
        Arc::clone(&self.records)
    }

    /// Whether a session started here has not reached Stopped yet
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(session_live)
            .unwrap_or(false)
    }

    /// Open the capture target, then start. Capture failures return before any
    /// connection is attempted.
    pub fn start_capture(
        &self,
        config: SessionConfig,
        target: &CaptureTarget,
    ) -> Result<SessionHandle> {
        if self.is_running() {
            return Err(FormcoachError::AlreadyRunning);
        }
        let source = open_source(config.mode(), target, &self.settings.capture)?;
        self.start(config, source)
    }

    /// Spawn a session over an already opened source
    pub fn start(&self, config: SessionConfig, source: Box<dyn FrameSource>) -> Result<SessionHandle> {
        let mut current = self.current.lock();
        if current.as_ref().map(session_live).unwrap_or(false) {
            return Err(FormcoachError::AlreadyRunning);
        }

        if source.mode() != config.mode() {
            warn!(
                "Source {} runs in {} mode but the session is {}",
                source.describe(),
                source.mode(),
                config.mode()
            );
        }

        let session_id = Uuid::new_v4().to_string();
        let recorder = ReplayRecorder::new();
        let machine = SessionStateMachine::new(
            config,
            SessionTimings::from_config(&self.settings),
            recorder.clone(),
        );
        let announcer = FeedbackAnnouncer::spawn(
            CueMap::from_config(&self.settings.announcer),
            Arc::clone(&self.player),
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(Phase::Connecting);

        let runner = SessionRunner::new(
            session_id.clone(),
            Arc::clone(&self.settings),
            machine,
            SourceGuard::new(source),
            announcer,
            self.event_bus.clone(),
            Arc::clone(&self.records),
            command_rx,
            phase_tx,
        );

        info!("Starting session {}", session_id);
        let task = tokio::spawn(runner.run());
        *current = Some(phase_rx.clone());

        Ok(SessionHandle {
            session_id,
            commands: command_tx,
            phase: phase_rx,
            recorder,
            task,
        })
    }
}

fn session_live(phase: &watch::Receiver<Phase>) -> bool {
    // A dropped sender means the session task is gone
    match phase.has_changed() {
        Ok(_) => !phase.borrow().can_start(),
        Err(_) => false,
    }
}

/// Cloneable way to ask a session to stop from another task
#[derive(Debug, Clone)]
pub struct StopTrigger {
    commands: mpsc::Sender<SessionCommand>,
}

impl StopTrigger {
    /// Returns `false` once the session has ended
    pub fn trigger(&self) -> bool {
        !matches!(
            self.commands.try_send(SessionCommand::Stop),
            Err(mpsc::error::TrySendError::Closed(_))
        )
    }
}

/// Caller's side of a running session
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::Sender<SessionCommand>,
    phase: watch::Receiver<Phase>,
    recorder: ReplayRecorder,
    task: JoinHandle<Result<SessionReport>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ask the session to stop. Extra requests are ignored by the session.
    pub fn request_stop(&self) -> bool {
        self.stop_trigger().trigger()
    }

    pub fn stop_trigger(&self) -> StopTrigger {
        StopTrigger {
            commands: self.commands.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Wait until the session reaches `target`. Returns `false` if it ended first.
    pub async fn wait_for_phase(&mut self, target: Phase) -> bool {
        loop {
            let phase = *self.phase.borrow_and_update();
            if phase == target {
                return true;
            }
            if phase == Phase::Stopped || self.phase.changed().await.is_err() {
                return *self.phase.borrow() == target;
            }
        }
    }

    /// Frames recorded so far, per repetition
    pub fn recorder(&self) -> &ReplayRecorder {
        &self.recorder
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for teardown and collect the report
    pub async fn wait(self) -> Result<SessionReport> {
        self.task
            .await
            .map_err(|e| FormcoachError::system(format!("Session task failed: {}", e)))?
    }
}
