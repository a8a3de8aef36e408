use super::count::resolve_completed;
use super::types::{Phase, SessionConfig, SessionState, SessionTimings, Target, TeardownReason};
use crate::announcer::split_identifiers;
use crate::error::{FormcoachError, Result};
use crate::events::SessionEvent;
use crate::replay::{FrameSample, RepetitionRecord, ReplayRecorder};
use crate::transport::{FrameStatus, ServerMessage, SessionResult};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Everything the session actor feeds into the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Handshake finished with `init_success`
    Connected { greeting: String },
    Server(ServerMessage),
    WarmupTick,
    /// Local stop trigger: user request or end of the source
    Stop(TeardownReason),
    StopDelayElapsed,
    StopTimedOut,
    ConnectionClosed { reason: Option<String> },
    ConnectionFailed { message: String },
}

/// Side effects the actor must carry out, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish(SessionEvent),
    /// Hand the new feedback text to the announcer
    Announce(String),
    StartWarmupTimer,
    StopWarmupTimer,
    /// Send `stop` after the delay
    ScheduleStop(Duration),
    /// Send `stop` now and arm the stop timeout
    SendStop,
    /// Release the source, close the connection, cancel timers. Emitted once.
    Teardown,
}

/// Pure session logic. Holds no I/O; every decision comes back as [`Effect`]s.
pub struct SessionStateMachine {
    config: SessionConfig,
    timings: SessionTimings,
    state: SessionState,
    recorder: ReplayRecorder,
    stop_sent: bool,
    torn_down: bool,
    /// Counts only apply once the session has been Active
    reached_active: bool,
    last_discrepancy: Option<(u32, u32)>,
}

impl SessionStateMachine {
    pub fn new(config: SessionConfig, timings: SessionTimings, recorder: ReplayRecorder) -> Self {
        Self {
            config,
            timings,
            state: SessionState::new(),
            recorder,
            stop_sent: false,
            torn_down: false,
            reached_active: false,
            last_discrepancy: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn recorder(&self) -> &ReplayRecorder {
        &self.recorder
    }

    /// Frames are sampled and sent only while this holds
    pub fn accepts_frames(&self) -> bool {
        self.state.phase.sends_frames()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Leave Idle (or a previous Stopped) for Connecting with fresh state
    pub fn begin(&mut self) -> Result<Vec<Effect>> {
        if !self.state.phase.can_start() {
            return Err(FormcoachError::AlreadyRunning);
        }

        self.state = SessionState::new();
        self.recorder.clear();
        self.stop_sent = false;
        self.torn_down = false;
        self.reached_active = false;
        self.last_discrepancy = None;

        let mut effects = Vec::new();
        self.set_phase(Phase::Connecting, &mut effects);
        Ok(effects)
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.state.phase == Phase::Stopped {
            debug!("Session stopped; ignoring {}", input_kind(&input));
            return effects;
        }

        match input {
            Input::Connected { greeting } => self.on_connected(greeting, &mut effects),
            Input::Server(message) => self.on_server_message(message, &mut effects),
            Input::WarmupTick => self.on_warmup_tick(&mut effects),
            Input::Stop(reason) => self.begin_stop(reason, &mut effects),
            Input::StopDelayElapsed => {
                if self.state.phase == Phase::Stopping {
                    self.send_stop(&mut effects);
                }
            }
            Input::StopTimedOut => {
                if self.state.phase == Phase::Stopping {
                    warn!("No stopped message from service; finishing locally");
                    self.finish(&mut effects);
                }
            }
            Input::ConnectionClosed { reason } => {
                if self.state.phase == Phase::Stopping && self.stop_sent {
                    info!("Service closed the connection after stop");
                    self.finish(&mut effects);
                } else {
                    let message = match reason {
                        Some(reason) if !reason.is_empty() => {
                            format!("connection closed by service: {}", reason)
                        }
                        _ => "connection closed by service".to_string(),
                    };
                    self.fail(TeardownReason::ConnectionLost, message, &mut effects);
                }
            }
            Input::ConnectionFailed { message } => {
                self.fail(TeardownReason::ConnectionLost, message, &mut effects);
            }
        }

        effects
    }

    fn on_server_message(&mut self, message: ServerMessage, effects: &mut Vec<Effect>) {
        match message {
            ServerMessage::InitSuccess { message } => {
                debug!("Ignoring repeated init_success: {}", message);
            }
            ServerMessage::WarmupEnd => {
                if self.state.phase == Phase::Warmup {
                    effects.push(Effect::StopWarmupTimer);
                    self.enter_active(effects);
                } else {
                    debug!("warmup_end outside warmup ignored");
                }
            }
            ServerMessage::Frame { frame, status } => self.on_frame(frame, status, effects),
            ServerMessage::Stopped { result } => self.on_stopped(result, effects),
            ServerMessage::Error { message } => {
                self.fail(TeardownReason::ServerError, message, effects);
            }
        }
    }

    fn on_connected(&mut self, greeting: String, effects: &mut Vec<Effect>) {
        if self.state.phase != Phase::Connecting {
            warn!("Connected in phase {}; ignoring", self.state.phase);
            return;
        }

        self.state.server_message = Some(greeting);

        if self.timings.warmup_seconds > 0 {
            self.state.warmup_remaining = self.timings.warmup_seconds;
            self.set_phase(Phase::Warmup, effects);
            effects.push(Effect::StartWarmupTimer);
        } else {
            self.enter_active(effects);
        }
    }

    fn on_warmup_tick(&mut self, effects: &mut Vec<Effect>) {
        if self.state.phase != Phase::Warmup {
            return;
        }

        self.state.warmup_remaining = self.state.warmup_remaining.saturating_sub(1);
        effects.push(Effect::Publish(SessionEvent::WarmupTick {
            remaining: self.state.warmup_remaining,
        }));

        if self.state.warmup_remaining == 0 {
            effects.push(Effect::StopWarmupTimer);
            self.enter_active(effects);
        }
    }

    fn enter_active(&mut self, effects: &mut Vec<Effect>) {
        self.state.warmup_remaining = 0;
        self.reached_active = true;
        self.set_phase(Phase::Active, effects);
        self.open_next(effects);
    }

    fn open_next(&mut self, effects: &mut Vec<Effect>) {
        let number = self.state.completed_reps + 1;
        if self.recorder.open(number) {
            effects.push(Effect::Publish(SessionEvent::RepetitionOpened { number }));
        }
    }

    fn on_frame(
        &mut self,
        frame: Option<String>,
        status: Option<FrameStatus>,
        effects: &mut Vec<Effect>,
    ) {
        let phase = self.state.phase;
        if !matches!(phase, Phase::Warmup | Phase::Active | Phase::Stopping) {
            debug!("Frame in phase {} ignored", phase);
            return;
        }

        if let Some(status) = status.as_ref() {
            self.apply_status(status, effects);
        }

        if phase == Phase::Active {
            if let Some(image) = frame {
                let sample = FrameSample::new(image, phase, self.state.pose_state.clone());
                self.recorder.append(sample);
            }
        }

        let Some(status) = status else {
            return;
        };

        if matches!(phase, Phase::Active | Phase::Stopping) && self.reached_active {
            self.apply_count(&status, effects);
        }

        effects.push(Effect::Publish(SessionEvent::StatusUpdated {
            completed_reps: self.state.completed_reps,
            total_score: self.state.total_score,
            elapsed_seconds: self.state.elapsed_seconds,
        }));

        if self.state.phase == Phase::Active && self.target_reached() {
            self.begin_stop(TeardownReason::TargetReached, effects);
        }
    }

    /// Everything in a status payload except the repetition count
    fn apply_status(&mut self, status: &FrameStatus, effects: &mut Vec<Effect>) {
        if let Some(text) = status.feedback_ko.as_ref() {
            if *text != self.state.feedback {
                self.state.feedback = text.clone();
                effects.push(Effect::Publish(SessionEvent::FeedbackChanged { text: text.clone() }));
                effects.push(Effect::Announce(text.clone()));
            }
        }

        if status.state.is_some() {
            self.state.pose_state = status.state.clone();
        }
        if let Some(elapsed) = status.elapsed_seconds {
            self.state.elapsed_seconds = elapsed;
        }
        if let Some(total) = status.total_score {
            self.state.total_score = Some(total);
        }
        if let Some(message) = status.message.as_ref() {
            self.state.server_message = Some(message.clone());
        }
        self.state.rep_scores.extend(status.scores());
    }

    fn apply_count(&mut self, status: &FrameStatus, effects: &mut Vec<Effect>) {
        let Some(resolution) = resolve_completed(status) else {
            return;
        };

        if resolution.discrepancy != self.last_discrepancy {
            self.last_discrepancy = resolution.discrepancy;
            if let Some((reported, scored)) = resolution.discrepancy {
                self.state.count_discrepancies += 1;
                effects.push(Effect::Publish(SessionEvent::CountDiscrepancy { reported, scored }));
            }
        }

        // Sealed records take the feedback carried by the completing message
        let feedback = status
            .feedback_ko
            .as_deref()
            .map(split_identifiers)
            .unwrap_or_default();
        self.advance_count(resolution.count, &feedback, effects);
    }

    /// Raise the completed count and seal what it covers. Lower counts are ignored.
    fn advance_count(&mut self, count: u32, feedback: &[String], effects: &mut Vec<Effect>) {
        if count <= self.state.completed_reps {
            return;
        }

        debug!(
            "Completed repetitions {} -> {}",
            self.state.completed_reps, count
        );
        self.state.completed_reps = count;

        for record in self
            .recorder
            .seal_through(count, &self.state.rep_scores, feedback)
        {
            effects.push(sealed_event(&record));
        }

        if self.state.phase == Phase::Active && !self.target_reached() {
            self.open_next(effects);
        }
    }

    fn target_reached(&self) -> bool {
        match self.config.target() {
            Some(Target::Repetitions(reps)) => self.state.completed_reps >= reps,
            Some(Target::Duration(seconds)) => self.state.elapsed_seconds >= seconds as f64,
            None => false,
        }
    }

    fn begin_stop(&mut self, reason: TeardownReason, effects: &mut Vec<Effect>) {
        match self.state.phase {
            Phase::Warmup => effects.push(Effect::StopWarmupTimer),
            Phase::Active => {}
            Phase::Connecting | Phase::Idle => {
                info!("Stop before the session started ({:?})", reason);
                self.state.teardown_reason.get_or_insert(reason);
                self.finish(effects);
                return;
            }
            Phase::Stopping | Phase::Stopped => {
                debug!("Stop already in progress; {:?} ignored", reason);
                return;
            }
        }

        info!("Stopping session: {:?}", reason);
        self.state.teardown_reason = Some(reason);
        effects.push(Effect::Publish(SessionEvent::StopRequested { reason }));

        if reason == TeardownReason::TargetReached {
            let number = self.recorder.open_number();
            let score = number.and_then(|n| self.state.rep_scores.get(&n).copied());
            let feedback = split_identifiers(&self.state.feedback);
            if let Some(record) = self.recorder.seal_open(score, &feedback, true) {
                effects.push(sealed_event(&record));
            }
        }

        self.set_phase(Phase::Stopping, effects);

        if reason.delays_stop() {
            effects.push(Effect::ScheduleStop(self.timings.stop_delay));
        } else {
            self.send_stop(effects);
        }
    }

    fn send_stop(&mut self, effects: &mut Vec<Effect>) {
        if !self.stop_sent {
            self.stop_sent = true;
            effects.push(Effect::SendStop);
        }
    }

    fn on_stopped(&mut self, result: Option<SessionResult>, effects: &mut Vec<Effect>) {
        if self.state.phase == Phase::Connecting {
            warn!("stopped before init_success ignored");
            return;
        }

        if self.state.phase == Phase::Warmup {
            effects.push(Effect::StopWarmupTimer);
        }

        if let Some(result) = result.as_ref() {
            match result.rep_count {
                Some(count) if self.reached_active => {
                    let feedback = split_identifiers(&self.state.feedback);
                    self.advance_count(count, &feedback, effects);
                }
                Some(count) => debug!("Final count {} ignored; session never went active", count),
                None => {}
            }
            if result.total_score.is_some() {
                self.state.total_score = result.total_score;
            }
        }

        self.state.final_result = result;
        self.state
            .teardown_reason
            .get_or_insert(TeardownReason::ServerStopped);
        self.finish(effects);
    }

    fn fail(&mut self, reason: TeardownReason, message: String, effects: &mut Vec<Effect>) {
        if self.state.phase == Phase::Warmup {
            effects.push(Effect::StopWarmupTimer);
        }

        self.state.error = Some(message.clone());
        self.state.teardown_reason.get_or_insert(reason);
        effects.push(Effect::Publish(SessionEvent::SessionError { message }));
        if matches!(self.state.phase, Phase::Warmup | Phase::Active) {
            self.set_phase(Phase::Stopping, effects);
        }
        self.finish(effects);
    }

    /// Close whatever record is still open, move to Stopped and tear down once
    fn finish(&mut self, effects: &mut Vec<Effect>) {
        if self.recorder.open_frame_count() > 0 {
            let number = self.recorder.open_number();
            let score = number.and_then(|n| self.state.rep_scores.get(&n).copied());
            let feedback = split_identifiers(&self.state.feedback);
            if let Some(record) = self.recorder.seal_open(score, &feedback, false) {
                effects.push(sealed_event(&record));
            }
        } else {
            self.recorder.discard_open();
        }

        self.set_phase(Phase::Stopped, effects);

        if !self.torn_down {
            self.torn_down = true;
            effects.push(Effect::Teardown);

            let reason = self
                .state
                .teardown_reason
                .unwrap_or(TeardownReason::UserStop);
            effects.push(Effect::Publish(SessionEvent::SessionFinished {
                reason,
                completed_reps: self.state.completed_reps,
                timestamp: SystemTime::now(),
            }));
        }
    }

    fn set_phase(&mut self, to: Phase, effects: &mut Vec<Effect>) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        self.state.phase = to;
        effects.push(Effect::Publish(SessionEvent::PhaseChanged {
            from,
            to,
            timestamp: SystemTime::now(),
        }));
    }
}

fn sealed_event(record: &Arc<RepetitionRecord>) -> Effect {
    Effect::Publish(SessionEvent::RepetitionSealed {
        number: record.number,
        score: record.score,
        frame_count: record.frame_count(),
        complete: record.complete,
    })
}

fn input_kind(input: &Input) -> &'static str {
    match input {
        Input::Connected { .. } => "connected",
        Input::Server(message) => message.kind(),
        Input::WarmupTick => "warmup tick",
        Input::Stop(_) => "stop",
        Input::StopDelayElapsed => "stop delay",
        Input::StopTimedOut => "stop timeout",
        Input::ConnectionClosed { .. } => "connection closed",
        Input::ConnectionFailed { .. } => "connection failure",
    }
}
