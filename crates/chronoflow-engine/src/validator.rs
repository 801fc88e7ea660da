//! Structural rule validation, applied before a rule is accepted into
//! the store. Catches editor mistakes early so the router never has to
//! skip half-formed actions at event time.

use chronoflow_core::rule::{Action, Rule};
use chronoflow_core::traits::HttpMethod;
use chronoflow_core::{ChronoflowError, Result};

/// Validate a rule's structure. Unknown condition and action kinds are
/// already rejected at deserialization; this checks the arguments.
pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(ChronoflowError::InvalidRule("rule name is empty".into()));
    }
    for condition in &rule.conditions {
        let has_value = condition.value.as_deref().is_some_and(|v| !v.trim().is_empty());
        let has_values = condition
            .values
            .as_deref()
            .is_some_and(|vs| vs.iter().any(|v| !v.trim().is_empty()));
        if !has_value && !has_values {
            return Err(ChronoflowError::InvalidRule(format!(
                "condition {:?} has no value",
                condition.kind
            )));
        }
    }
    for action in &rule.actions {
        validate_action(action)?;
    }
    Ok(())
}

fn validate_action(action: &Action) -> Result<()> {
    let missing = |what: &str| {
        Err(ChronoflowError::InvalidAction(format!(
            "{} is missing {what}",
            action.kind_label()
        )))
    };
    match action {
        Action::AddTag(args) | Action::RemoveTag(args) => {
            if args.tag_name().is_none() {
                return missing("a tag name");
            }
        }
        Action::SetDescription(args) => {
            if args.text().is_none() {
                return missing("a description value");
            }
        }
        Action::SetBillable(args) => {
            if args.desired().is_none() {
                return missing("a parseable boolean value");
            }
        }
        Action::SetProjectById(args) => {
            if args.id().is_none() {
                return missing("a project id");
            }
        }
        Action::SetProjectByName(args) => {
            if args.project_name().is_none() {
                return missing("a project name");
            }
        }
        Action::SetTaskById(args) => {
            if args.id().is_none() {
                return missing("a task id");
            }
        }
        Action::SetTaskByName(args) => {
            if args.task_name().is_none() {
                return missing("a task name");
            }
        }
        Action::OpenapiCall(args) => {
            let method = args.method.as_deref().unwrap_or("");
            if HttpMethod::parse(method).is_none() {
                return Err(ChronoflowError::InvalidAction(format!(
                    "openapi_call has invalid method '{method}'"
                )));
            }
            match args.path.as_deref().map(str::trim) {
                Some(path) if path.starts_with('/') => {}
                Some(path) => {
                    return Err(ChronoflowError::InvalidAction(format!(
                        "openapi_call path must start with '/': '{path}'"
                    )));
                }
                None => return missing("a path"),
            }
        }
    }
    Ok(())
}
