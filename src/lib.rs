pub mod announcer;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod records;
pub mod replay;
pub mod report;
pub mod session;
pub mod transport;

pub use announcer::{CommandCuePlayer, CueMap, CuePlayer, FeedbackAnnouncer, LogCuePlayer};
pub use capture::{open_source, CaptureTarget, FrameSource, Sample, SourceMode};
pub use config::FormcoachConfig;
pub use error::{FormcoachError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, SessionEvent};
pub use frame::{EncodedFrame, FrameData, FrameEncoder, FrameFormat};
pub use keyboard_input::KeyboardInputHandler;
pub use records::{LoggingRecordStore, SessionRecordStore};
pub use replay::{export_record, FrameSample, PlaybackCursor, RepetitionRecord, ReplayPlayer, ReplayRecorder};
pub use report::{RepetitionSummary, SessionReport};
pub use session::{
    Phase, SessionConfig, SessionController, SessionHandle, SessionState, SessionStateMachine,
    StopTrigger, Target, TeardownReason,
};
pub use transport::{SessionTransport, TransportEvent};
