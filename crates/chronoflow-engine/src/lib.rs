//! ChronoFlow engine — rule evaluation against event contexts.

pub mod evaluator;
pub mod placeholder;
pub mod validator;

pub use evaluator::evaluate;
pub use validator::validate_rule;
