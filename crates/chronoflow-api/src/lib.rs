//! ChronoFlow API layer — outbound HTTP to the time-tracking service.

pub mod client;
pub mod retry;

pub use client::{RestClientFactory, RestTrackerClient};
pub use retry::RetryController;
