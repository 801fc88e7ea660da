//! ChronoFlow router — the entry point that turns a validated webhook
//! event into evaluated rules, executed actions and an outcome report.

pub mod outcome;
pub mod router;

pub use outcome::{EventOutcome, EventStatus};
pub use router::EventRouter;
