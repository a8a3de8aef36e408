use super::exercise::{self, ExerciseKind};
use crate::capture::SourceMode;
use crate::config::{FormcoachConfig, MAX_FPS, MIN_FPS};
use crate::error::SessionConfigError;
use crate::transport::{InitMessage, SessionResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Session lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    Warmup,
    Active,
    Stopping,
    Stopped,
}

impl Phase {
    /// A new session may only start from here
    pub fn can_start(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Stopped)
    }

    /// Frames are sampled and sent only in these phases
    pub fn sends_frames(&self) -> bool {
        matches!(self, Phase::Warmup | Phase::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Warmup => "warmup",
            Phase::Active => "active",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    UserStop,
    TargetReached,
    EndOfStream,
    ServerError,
    ServerStopped,
    ConnectionLost,
}

impl TeardownReason {
    /// Stop requests for these reasons wait `stop_delay` so the terminal frame lands
    pub fn delays_stop(&self) -> bool {
        matches!(self, TeardownReason::TargetReached)
    }

    /// The session ended because something went wrong
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TeardownReason::ServerError | TeardownReason::ConnectionLost
        )
    }
}

/// Goal that ends the session automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Repetitions(u32),
    /// Seconds, for hold-style exercises
    Duration(u32),
}

/// Immutable per-session request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    exercise: String,
    mode: SourceMode,
    target: Option<Target>,
    fps: u32,
}

impl SessionConfig {
    pub fn new(
        exercise: impl Into<String>,
        mode: SourceMode,
        target: Option<Target>,
        fps: u32,
    ) -> Result<Self, SessionConfigError> {
        let exercise = exercise.into();

        if !exercise::is_valid_identifier(&exercise) {
            return Err(SessionConfigError::InvalidExercise(exercise));
        }

        match target {
            Some(Target::Repetitions(0)) => return Err(SessionConfigError::ZeroRepetitions),
            Some(Target::Duration(0)) => return Err(SessionConfigError::ZeroDuration),
            _ => {}
        }

        if let (Some(kind), Some(target)) = (exercise::lookup(&exercise), target) {
            let fits = matches!(
                (kind, target),
                (ExerciseKind::Counted, Target::Repetitions(_))
                    | (ExerciseKind::Hold, Target::Duration(_))
            );
            if !fits {
                return Err(SessionConfigError::TargetMismatch {
                    exercise,
                    expected: kind.describe(),
                });
            }
        }

        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(SessionConfigError::FrameRate(fps));
        }

        Ok(Self {
            exercise,
            mode,
            target,
            fps,
        })
    }

    /// Build with the frame rate configured for `mode`
    pub fn for_mode(
        exercise: impl Into<String>,
        mode: SourceMode,
        target: Option<Target>,
        config: &FormcoachConfig,
    ) -> Result<Self, SessionConfigError> {
        Self::new(exercise, mode, target, mode.fps(&config.capture))
    }

    pub fn exercise(&self) -> &str {
        &self.exercise
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn target(&self) -> Option<Target> {
        self.target
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    pub fn init_message(&self) -> InitMessage {
        let (target_reps, target_time) = match self.target {
            Some(Target::Repetitions(reps)) => (Some(reps), None),
            Some(Target::Duration(seconds)) => (None, Some(seconds)),
            None => (None, None),
        };

        InitMessage {
            exercise: self.exercise.clone(),
            is_video_mode: self.mode == SourceMode::File,
            target_reps,
            target_time,
        }
    }
}

/// Local timers that shape the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimings {
    /// 0 means the exercise has no warmup phase
    pub warmup_seconds: u32,
    pub stop_delay: Duration,
    pub stop_timeout: Duration,
}

impl SessionTimings {
    pub fn from_config(config: &FormcoachConfig) -> Self {
        Self {
            warmup_seconds: config.session.warmup_seconds,
            stop_delay: Duration::from_millis(config.session.stop_delay_ms),
            stop_timeout: config.server.stop_timeout(),
        }
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self::from_config(&FormcoachConfig::default())
    }
}

/// Mutable session state, owned by the state machine
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    /// Never decreases within a session
    pub completed_reps: u32,
    pub elapsed_seconds: f64,
    pub feedback: String,
    pub total_score: Option<f64>,
    pub rep_scores: BTreeMap<u32, f64>,
    pub warmup_remaining: u32,
    /// Pose label the service attached to the latest frame
    pub pose_state: Option<String>,
    pub server_message: Option<String>,
    pub final_result: Option<SessionResult>,
    pub teardown_reason: Option<TeardownReason>,
    pub error: Option<String>,
    pub count_discrepancies: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            completed_reps: 0,
            elapsed_seconds: 0.0,
            feedback: String::new(),
            total_score: None,
            rep_scores: BTreeMap::new(),
            warmup_remaining: 0,
            pose_state: None,
            server_message: None,
            final_result: None,
            teardown_reason: None,
            error: None,
            count_discrepancies: 0,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
