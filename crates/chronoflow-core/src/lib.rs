//! ChronoFlow core — shared types, configuration and trait seams.
//!
//! Everything downstream crates agree on lives here: the rule model,
//! the typed event context, the error type, runtime configuration, and
//! the traits that external collaborators (rule store, token store,
//! remote tracker API) plug into.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod rule;
pub mod traits;

pub use config::ChronoflowConfig;
pub use context::EventContext;
pub use error::{ChronoflowError, Result};
pub use rule::{Action, Combinator, Condition, ConditionKind, Operator, Rule, Trigger};
