mod connection;
pub mod messages;
#[cfg(test)]
pub(crate) mod mock;
mod stats;
#[cfg(test)]
mod tests;

pub use connection::{SessionTransport, TransportEvent};
pub use messages::{ClientMessage, FrameStatus, InitMessage, ServerMessage, SessionResult};
pub use stats::{TransportStats, TransportStatsSnapshot};
