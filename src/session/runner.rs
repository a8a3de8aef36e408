use super::machine::{Effect, Input, SessionStateMachine};
use super::types::{Phase, SessionTimings, TeardownReason};
use crate::announcer::FeedbackAnnouncer;
use crate::capture::{Sample, SourceGuard};
use crate::config::FormcoachConfig;
use crate::error::Result;
use crate::events::{EventBus, SessionEvent};
use crate::records::SessionRecordStore;
use crate::report::SessionReport;
use crate::transport::{SessionTransport, TransportEvent, TransportStatsSnapshot};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const WARMUP_TICK: Duration = Duration::from_secs(1);
const DRAIN_LIMIT: Duration = Duration::from_secs(10);
const TASK_JOIN_LIMIT: Duration = Duration::from_secs(2);

/// Requests from a [`super::SessionHandle`] to its running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Stop,
}

/// What woke the actor loop
enum Wake {
    Input(Input),
    FrameDue,
    HandleDropped,
}

/// Single task that owns the source, the connection and the state machine.
///
/// Everything that touches session state runs here in arrival order, so inbound
/// messages, timer ticks and stop requests never race each other.
pub(crate) struct SessionRunner {
    session_id: String,
    settings: Arc<FormcoachConfig>,
    machine: SessionStateMachine,
    source: SourceGuard,
    announcer: FeedbackAnnouncer,
    event_bus: EventBus,
    records: Arc<dyn SessionRecordStore>,
    commands: mpsc::Receiver<SessionCommand>,
    commands_open: bool,
    phase_tx: watch::Sender<Phase>,
    transport: Option<SessionTransport>,
    transport_stats: TransportStatsSnapshot,
    warmup_timer: Option<Interval>,
    stop_at: Option<Instant>,
    stop_deadline: Option<Instant>,
    torn_down: bool,
    record_id: Option<String>,
}

impl SessionRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: String,
        settings: Arc<FormcoachConfig>,
        machine: SessionStateMachine,
        source: SourceGuard,
        announcer: FeedbackAnnouncer,
        event_bus: EventBus,
        records: Arc<dyn SessionRecordStore>,
        commands: mpsc::Receiver<SessionCommand>,
        phase_tx: watch::Sender<Phase>,
    ) -> Self {
        Self {
            session_id,
            settings,
            machine,
            source,
            announcer,
            event_bus,
            records,
            commands,
            commands_open: true,
            phase_tx,
            transport: None,
            transport_stats: TransportStatsSnapshot::default(),
            warmup_timer: None,
            stop_at: None,
            stop_deadline: None,
            torn_down: false,
            record_id: None,
        }
    }

    pub(crate) async fn run(mut self) -> Result<SessionReport> {
        let started_at = Utc::now();
        info!(
            "Session {} starting: {} ({}, {} fps, source {})",
            self.session_id,
            self.machine.config().exercise(),
            self.machine.config().mode(),
            self.machine.config().fps(),
            self.source.describe()
        );

        let effects = match self.machine.begin() {
            Ok(effects) => effects,
            Err(e) => {
                self.teardown();
                return Err(e);
            }
        };
        self.apply(effects).await;

        let connected = self.connect().await;
        let events = match connected {
            Ok(Some(events)) => Some(events),
            Ok(None) => None,
            Err(e) => {
                error!("Session {} failed to start: {}", self.session_id, e);
                self.teardown();
                self.phase_tx.send_replace(Phase::Stopped);
                return Err(e);
            }
        };

        if let Some(mut events) = events {
            self.event_loop(&mut events).await;
        }

        self.teardown();
        self.announcer.drain(DRAIN_LIMIT).await;
        if let Some(mut transport) = self.transport.take() {
            transport.join(TASK_JOIN_LIMIT).await;
        }

        let report = SessionReport::build(
            &self.session_id,
            self.record_id.clone(),
            self.machine.config(),
            self.machine.state(),
            &self.machine.recorder().records(),
            self.transport_stats,
            started_at,
            Utc::now(),
        );

        if self.settings.report.enabled {
            if let Err(e) = report.save(&self.settings.report.path).await {
                warn!("Failed to save session report: {}", e);
            }
        }

        info!(
            "Session {} finished: {:?}, {} reps",
            self.session_id, report.reason, report.completed_reps
        );
        Ok(report)
    }

    /// Open the connection, racing it against stop requests.
    ///
    /// `Ok(None)` means the user stopped the session before it connected.
    async fn connect(&mut self) -> Result<Option<mpsc::UnboundedReceiver<TransportEvent>>> {
        let init = self.machine.config().init_message();
        let settings = Arc::clone(&self.settings);
        let connect = SessionTransport::connect(&settings.server, &init);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    let (transport, events, greeting) = result?;
                    debug!("Session {} connected to {}", self.session_id, transport.endpoint());
                    self.transport = Some(transport);
                    self.start_record().await;

                    let effects = self.machine.handle(Input::Connected { greeting });
                    self.apply(effects).await;
                    return Ok(Some(events));
                }
                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(SessionCommand::Stop) => {
                            info!("Session stopped while connecting");
                            let effects = self.machine.handle(Input::Stop(TeardownReason::UserStop));
                            self.apply(effects).await;
                            return Ok(None);
                        }
                        None => self.commands_open = false,
                    }
                }
            }
        }
    }

    async fn start_record(&mut self) {
        match self
            .records
            .start_record(&self.session_id, self.machine.config())
            .await
        {
            Ok(record_id) => self.record_id = Some(record_id),
            Err(e) => warn!("Record store rejected session start: {}", e),
        }
    }

    async fn event_loop(&mut self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        let mut frame_timer = interval(self.machine.config().frame_interval());
        frame_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.machine.phase() != Phase::Stopped {
            let accepts_frames = self.machine.accepts_frames();

            let wake = tokio::select! {
                event = events.recv() => Wake::Input(match event {
                    Some(TransportEvent::Message(message)) => Input::Server(message),
                    Some(TransportEvent::Closed { reason }) => Input::ConnectionClosed { reason },
                    Some(TransportEvent::Failed(e)) => Input::ConnectionFailed { message: e.to_string() },
                    None => Input::ConnectionClosed { reason: None },
                }),
                _ = frame_timer.tick(), if accepts_frames => Wake::FrameDue,
                _ = tick(&mut self.warmup_timer), if self.warmup_timer.is_some() => {
                    Wake::Input(Input::WarmupTick)
                }
                _ = sleep_until_opt(self.stop_at), if self.stop_at.is_some() => {
                    self.stop_at = None;
                    Wake::Input(Input::StopDelayElapsed)
                }
                _ = sleep_until_opt(self.stop_deadline), if self.stop_deadline.is_some() => {
                    self.stop_deadline = None;
                    Wake::Input(Input::StopTimedOut)
                }
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(SessionCommand::Stop) => Wake::Input(Input::Stop(TeardownReason::UserStop)),
                    None => Wake::HandleDropped,
                },
            };

            let input = match wake {
                Wake::Input(input) => Some(input),
                Wake::FrameDue => self.pump_frame(),
                Wake::HandleDropped => {
                    debug!("Session handle dropped; running to completion");
                    self.commands_open = false;
                    None
                }
            };

            if let Some(input) = input {
                let effects = self.machine.handle(input);
                self.apply(effects).await;
            }
        }
    }

    /// Sample the source and offer the frame to the transport
    fn pump_frame(&mut self) -> Option<Input> {
        match self.source.sample() {
            Ok(Sample::Frame(frame)) => {
                if let Some(transport) = self.transport.as_ref() {
                    if !transport.send_frame(&frame) {
                        trace!("Frame {} dropped", frame.id);
                    }
                }
                None
            }
            Ok(Sample::EndOfStream) => {
                info!("Source reached end of stream");
                Some(Input::Stop(TeardownReason::EndOfStream))
            }
            Err(e) => {
                warn!("Frame sampling failed: {}", e);
                None
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(event) => {
                    if let SessionEvent::PhaseChanged { to, .. } = &event {
                        self.phase_tx.send_replace(*to);
                    }
                    if let Err(e) = self.event_bus.publish(event).await {
                        trace!("Event not delivered: {}", e);
                    }
                }
                Effect::Announce(text) => {
                    self.announcer.on_feedback(&text);
                }
                Effect::StartWarmupTimer => {
                    let mut timer = interval_at(Instant::now() + WARMUP_TICK, WARMUP_TICK);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.warmup_timer = Some(timer);
                }
                Effect::StopWarmupTimer => self.warmup_timer = None,
                Effect::ScheduleStop(delay) => self.stop_at = Some(Instant::now() + delay),
                Effect::SendStop => {
                    self.stop_at = None;
                    let sent = self
                        .transport
                        .as_mut()
                        .map(|transport| transport.request_stop())
                        .unwrap_or(false);
                    if !sent {
                        debug!("Stop could not be sent; waiting for timeout");
                    }
                    self.stop_deadline = Some(Instant::now() + self.timings().stop_timeout);
                }
                Effect::Teardown => self.teardown(),
            }
        }
    }

    fn timings(&self) -> SessionTimings {
        SessionTimings::from_config(&self.settings)
    }

    /// Release the source, close the connection and drop timers. Idempotent.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.warmup_timer = None;
        self.stop_at = None;
        self.stop_deadline = None;

        self.source.release();
        if let Some(transport) = self.transport.as_mut() {
            self.transport_stats = transport.stats();
            transport.close();
        }

        debug!("Session {} torn down", self.session_id);
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
