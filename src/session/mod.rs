//! Session lifecycle: phases, repetition counting and the actor that drives a
//! live connection.

mod controller;
mod count;
pub mod exercise;
mod machine;
mod runner;
mod types;


pub use controller::{SessionController, SessionHandle, StopTrigger};
pub use count::{resolve_completed, CountResolution, CountSource};
pub use exercise::ExerciseKind;
pub use machine::{Effect, Input, SessionStateMachine};
pub use runner::SessionCommand;
pub use types::{Phase, SessionConfig, SessionState, SessionTimings, Target, TeardownReason};
