//! ChronoFlow executor — turns matched actions into API writes.

pub mod executor;
pub mod openapi;

pub use executor::{ActionExecutor, ExecutionSummary};
pub use openapi::OpenApiCall;
