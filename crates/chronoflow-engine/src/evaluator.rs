//! Evaluates rules against event contexts.
//!
//! Pure: no I/O, no clock. A condition whose value is missing or
//! unparseable is false (fail-closed), never an error.

use chronoflow_core::rule::{parse_bool, Combinator, Condition, ConditionKind, Operator, Rule};
use chronoflow_core::EventContext;

/// Evaluate a rule against an event context.
///
/// A rule with no conditions matches unconditionally; disabled rules
/// never match. AND requires every condition true, OR at least one.
pub fn evaluate(rule: &Rule, context: &EventContext) -> bool {
    if !rule.enabled {
        return false;
    }
    if rule.conditions.is_empty() {
        return true;
    }
    match rule.combinator {
        Combinator::And => rule
            .conditions
            .iter()
            .all(|c| evaluate_condition(c, context)),
        Combinator::Or => rule
            .conditions
            .iter()
            .any(|c| evaluate_condition(c, context)),
    }
}

fn evaluate_condition(condition: &Condition, context: &EventContext) -> bool {
    // None = the condition could not be evaluated (missing field or
    // value) and fails closed before the operator is applied.
    let Some(base) = base_match(condition, context) else {
        return false;
    };
    if condition.operator.negated() {
        !base
    } else {
        base
    }
}

fn base_match(condition: &Condition, context: &EventContext) -> Option<bool> {
    let candidates = candidate_values(condition);
    if candidates.is_empty() {
        return None;
    }

    match condition.kind {
        ConditionKind::DescriptionContains => {
            let desc = context.description()?.to_lowercase();
            Some(candidates.iter().any(|v| desc.contains(&v.to_lowercase())))
        }
        ConditionKind::DescriptionEquals => {
            let desc = context.description()?;
            Some(candidates.iter().any(|v| desc.eq_ignore_ascii_case(v)))
        }
        ConditionKind::HasTag => {
            context.tag_ids()?;
            Some(candidates.iter().any(|v| context.has_tag(v)))
        }
        ConditionKind::ProjectIdEquals => {
            let project_id = context.project_id()?;
            Some(candidates.iter().any(|v| project_id == *v))
        }
        ConditionKind::ProjectNameContains => {
            let name = context.project_name()?.to_lowercase();
            Some(candidates.iter().any(|v| name.contains(&v.to_lowercase())))
        }
        ConditionKind::ClientIdEquals => {
            let client_id = context.client_id()?;
            Some(candidates.iter().any(|v| client_id == *v))
        }
        ConditionKind::ClientNameContains => {
            let name = context.client_name()?.to_lowercase();
            Some(candidates.iter().any(|v| name.contains(&v.to_lowercase())))
        }
        ConditionKind::IsBillable => {
            let billable = context.billable()?;
            let expected = candidates.iter().find_map(|v| parse_bool(v))?;
            Some(billable == expected)
        }
    }
}

/// IN/NOT_IN operate over the condition's value list; the scalar
/// operators use `value`. Either field stands in for the other when the
/// rule author only filled one.
fn candidate_values(condition: &Condition) -> Vec<&str> {
    let from_list = || {
        condition
            .values
            .as_deref()
            .map(|vs| vs.iter().map(String::as_str).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    let from_scalar = || condition.value.as_deref().map(|v| vec![v]).unwrap_or_default();

    match condition.operator {
        Operator::In | Operator::NotIn => {
            let list = from_list();
            if list.is_empty() {
                from_scalar()
            } else {
                list
            }
        }
        _ => {
            let scalar = from_scalar();
            if scalar.is_empty() {
                from_list()
            } else {
                scalar
            }
        }
    }
}
