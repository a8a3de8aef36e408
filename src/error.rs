use thiserror::Error;

/// Capture device and media errors. Fatal before any connection is attempted.
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("Permission denied opening capture device {device}")]
    PermissionDenied { device: String },

    #[error("Capture source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Capture device error: {details}")]
    Device { details: String },

    #[error("Failed to decode frame: {details}")]
    Decode { details: String },

    #[error("Failed to encode frame: {details}")]
    Encode { details: String },
}

/// Socket-level failures talking to the analysis service
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Failed to connect to {endpoint}: {details}")]
    Connect { endpoint: String, details: String },

    #[error("Timed out after {seconds}s waiting for {endpoint}")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("Connection dropped: {details}")]
    Dropped { details: String },

    #[error("Failed to send message: {details}")]
    Send { details: String },
}

/// The service spoke, but not the protocol we expect
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Expected init_success as first message, got {kind}")]
    UnexpectedFirstMessage { kind: String },

    #[error("Malformed message: {details}")]
    Malformed { details: String },

    #[error("Binary frames are not part of the protocol")]
    BinaryMessage,
}

/// Invalid session request, rejected before any I/O
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionConfigError {
    #[error("Exercise identifier must be a non-empty [a-z0-9_] token, got {0:?}")]
    InvalidExercise(String),

    #[error("Target repetition count must be at least 1")]
    ZeroRepetitions,

    #[error("Target duration must be at least 1 second")]
    ZeroDuration,

    #[error("Exercise {exercise} is {expected}; the requested target does not apply")]
    TargetMismatch {
        exercise: String,
        expected: &'static str,
    },

    #[error("Frame rate {0} is outside 4..=30 fps")]
    FrameRate(u32),
}

/// Audio cue playback failures. Logged and skipped, never fatal to a session.
#[derive(Error, Debug, Clone)]
pub enum PlaybackError {
    #[error("Cue asset missing: {path}")]
    AssetMissing { path: String },

    #[error("Cue player failed: {details}")]
    Player { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum FormcoachError {
    #[error("Configuration error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Invalid session: {0}")]
    SessionConfig(#[from] SessionConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server error: {message}")]
    Server { message: String },

    #[error("A session is already running")]
    AlreadyRunning,

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("System error: {message}")]
    System { message: String },
}

impl FormcoachError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Errors that abort a session before the connection exists
    pub fn is_pre_connect(&self) -> bool {
        matches!(
            self,
            FormcoachError::Capture(_)
                | FormcoachError::SessionConfig(_)
                | FormcoachError::Settings(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FormcoachError>;
