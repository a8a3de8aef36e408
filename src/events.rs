use crate::error::EventBusError;
use crate::session::{Phase, TeardownReason};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Observable things that happen during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The session moved between lifecycle phases
    PhaseChanged {
        from: Phase,
        to: Phase,
        timestamp: SystemTime,
    },
    /// One second of the local warmup countdown elapsed
    WarmupTick { remaining: u32 },
    /// A repetition started collecting frames
    RepetitionOpened { number: u32 },
    /// A repetition was sealed and will not change again
    RepetitionSealed {
        number: u32,
        score: Option<f64>,
        frame_count: usize,
        complete: bool,
    },
    /// Counters and score after a status update
    StatusUpdated {
        completed_reps: u32,
        total_score: Option<f64>,
        elapsed_seconds: f64,
    },
    /// Live feedback text changed
    FeedbackChanged { text: String },
    /// `rep_count` disagreed with the highest scored repetition
    CountDiscrepancy { reported: u32, scored: u32 },
    /// The session decided to stop
    StopRequested { reason: TeardownReason },
    /// The service or the connection reported an error
    SessionError { message: String },
    /// Teardown completed
    SessionFinished {
        reason: TeardownReason,
        completed_reps: u32,
        timestamp: SystemTime,
    },
}

impl SessionEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SessionEvent::PhaseChanged { from, to, .. } => {
                format!("Phase {} -> {}", from, to)
            }
            SessionEvent::WarmupTick { remaining } => {
                format!("Warmup: {}s remaining", remaining)
            }
            SessionEvent::RepetitionOpened { number } => {
                format!("Repetition {} opened", number)
            }
            SessionEvent::RepetitionSealed {
                number,
                score,
                frame_count,
                complete,
            } => {
                let score = score
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "Repetition {} sealed (score {}, {} frames{})",
                    number,
                    score,
                    frame_count,
                    if *complete { "" } else { ", incomplete" }
                )
            }
            SessionEvent::StatusUpdated {
                completed_reps,
                elapsed_seconds,
                ..
            } => {
                format!("{} reps after {:.1}s", completed_reps, elapsed_seconds)
            }
            SessionEvent::FeedbackChanged { text } => format!("Feedback: {}", text),
            SessionEvent::CountDiscrepancy { reported, scored } => {
                format!("rep_count {} disagrees with scored repetitions {}", reported, scored)
            }
            SessionEvent::StopRequested { reason } => format!("Stop requested: {:?}", reason),
            SessionEvent::SessionError { message } => format!("Session error: {}", message),
            SessionEvent::SessionFinished {
                reason,
                completed_reps,
                ..
            } => {
                format!("Session finished ({:?}) with {} reps", reason, completed_reps)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::PhaseChanged { .. } => "phase_changed",
            SessionEvent::WarmupTick { .. } => "warmup_tick",
            SessionEvent::RepetitionOpened { .. } => "repetition_opened",
            SessionEvent::RepetitionSealed { .. } => "repetition_sealed",
            SessionEvent::StatusUpdated { .. } => "status_updated",
            SessionEvent::FeedbackChanged { .. } => "feedback_changed",
            SessionEvent::CountDiscrepancy { .. } => "count_discrepancy",
            SessionEvent::StopRequested { .. } => "stop_requested",
            SessionEvent::SessionError { .. } => "session_error",
            SessionEvent::SessionFinished { .. } => "session_finished",
        }
    }
}

/// Broadcast bus that carries session events to any number of observers
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: SessionEvent) -> Result<usize, EventBusError> {
        match &event {
            SessionEvent::PhaseChanged { from, to, .. } => {
                info!("Session phase {} -> {}", from, to);
            }
            SessionEvent::RepetitionSealed { .. } => {
                info!("{}", event.description());
            }
            SessionEvent::CountDiscrepancy { reported, scored } => {
                warn!(
                    "Service reported rep_count {} but scored repetitions up to {}",
                    reported, scored
                );
            }
            SessionEvent::SessionError { message } => {
                error!("Session error: {}", message);
            }
            SessionEvent::SessionFinished { .. } => {
                info!("{}", event.description());
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    Custom(fn(&SessionEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<SessionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SessionEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SessionEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
