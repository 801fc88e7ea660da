//! Outcome report returned for every handled event. Serialized as the
//! response body the webhook endpoint hands back upstream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    NoMatchingRules,
    NoActions,
    /// Matched actions reported without execution (apply-changes off).
    ActionsLogged,
    /// Batch handed to the background pool; result will only be logged.
    Scheduled,
    ActionsApplied,
    /// Every action folded to the entity's current state.
    NoChanges,
    /// Some actions applied, some failed after retries.
    Partial,
    Duplicate,
    MissingToken,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event: String,
    pub status: EventStatus,
    #[serde(rename = "actionsCount", skip_serializing_if = "Option::is_none")]
    pub actions_count: Option<usize>,
    #[serde(rename = "actionsAttempted", skip_serializing_if = "Option::is_none")]
    pub actions_attempted: Option<usize>,
    #[serde(rename = "executedCount", skip_serializing_if = "Option::is_none")]
    pub executed_count: Option<usize>,
    #[serde(rename = "actionsFailed", skip_serializing_if = "Option::is_none")]
    pub actions_failed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventOutcome {
    pub fn new(event: impl Into<String>, status: EventStatus) -> Self {
        Self {
            event: event.into(),
            status,
            actions_count: None,
            actions_attempted: None,
            executed_count: None,
            actions_failed: None,
            message: None,
        }
    }

    pub fn with_actions(mut self, count: usize) -> Self {
        self.actions_count = Some(count);
        self
    }

    pub fn with_execution(mut self, attempted: usize, executed: usize, failed: usize) -> Self {
        self.actions_attempted = Some(attempted);
        self.executed_count = Some(executed);
        self.actions_failed = Some(failed);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventStatus::NoMatchingRules).unwrap(),
            "\"no_matching_rules\""
        );
        assert_eq!(
            serde_json::to_string(&EventStatus::ActionsApplied).unwrap(),
            "\"actions_applied\""
        );
        assert_eq!(
            serde_json::to_string(&EventStatus::MissingToken).unwrap(),
            "\"missing_token\""
        );
    }

    #[test]
    fn test_outcome_omits_unset_counters() {
        let outcome = EventOutcome::new("NEW_TIME_ENTRY", EventStatus::Duplicate);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "NEW_TIME_ENTRY", "status": "duplicate"})
        );

        let full = EventOutcome::new("NEW_TIME_ENTRY", EventStatus::Partial)
            .with_actions(3)
            .with_execution(3, 2, 1);
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["actionsCount"], 3);
        assert_eq!(json["actionsAttempted"], 3);
        assert_eq!(json["executedCount"], 2);
        assert_eq!(json["actionsFailed"], 1);
    }
}
