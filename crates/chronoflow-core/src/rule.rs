//! Rule model: persisted automation definitions (trigger + conditions +
//! actions).
//!
//! The wire shape matches what the rule editor persists: actions are
//! `{"type": "...", "args": {...}}` objects. Action kinds are a closed
//! tagged union — an unknown `type` is a deserialization error, never a
//! silent skip.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    #[serde(default = "generated_id")]
    pub id: String,
    pub name: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Higher priority rules run first; ties keep store order.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn bool_true() -> bool {
    true
}

impl Rule {
    /// The event this rule is triggered by, if it names one explicitly.
    pub fn trigger_event(&self) -> Option<&str> {
        self.trigger
            .as_ref()
            .and_then(|t| t.event.as_deref())
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// Trigger metadata. A trigger without an `event` is a wildcard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    #[default]
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionKind {
    DescriptionContains,
    DescriptionEquals,
    HasTag,
    ProjectIdEquals,
    ProjectNameContains,
    ClientIdEquals,
    ClientNameContains,
    IsBillable,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
    Contains,
    NotContains,
    In,
    NotIn,
}

impl Operator {
    /// Whether this operator negates the underlying predicate result.
    pub fn negated(&self) -> bool {
        matches!(self, Self::NotEquals | Self::NotContains | Self::NotIn)
    }
}

/// One mutation (or generic API call) to perform when a rule matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum Action {
    AddTag(TagArgs),
    RemoveTag(TagArgs),
    SetDescription(SetDescriptionArgs),
    SetBillable(SetBillableArgs),
    SetProjectById(ProjectIdArgs),
    SetProjectByName(ProjectNameArgs),
    SetTaskById(TaskIdArgs),
    SetTaskByName(TaskNameArgs),
    OpenapiCall(OpenApiCallArgs),
}

impl Action {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::AddTag(_) => "add_tag",
            Self::RemoveTag(_) => "remove_tag",
            Self::SetDescription(_) => "set_description",
            Self::SetBillable(_) => "set_billable",
            Self::SetProjectById(_) => "set_project_by_id",
            Self::SetProjectByName(_) => "set_project_by_name",
            Self::SetTaskById(_) => "set_task_by_id",
            Self::SetTaskByName(_) => "set_task_by_name",
            Self::OpenapiCall(_) => "openapi_call",
        }
    }

    /// Whether executing this action mutates the triggering entity
    /// (as opposed to dispatching a generic API call).
    pub fn is_entity_mutation(&self) -> bool {
        !matches!(self, Self::OpenapiCall(_))
    }
}

/// Rule editors have written both `{"tag": ...}` and `{"name": ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TagArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TagArgs {
    pub fn tag_name(&self) -> Option<&str> {
        non_blank(self.tag.as_deref()).or_else(|| non_blank(self.name.as_deref()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetDescriptionArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SetDescriptionArgs {
    pub fn text(&self) -> Option<&str> {
        self.value.as_deref().or(self.description.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetBillableArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable: Option<String>,
}

impl SetBillableArgs {
    pub fn desired(&self) -> Option<bool> {
        parse_bool(self.value.as_deref().or(self.billable.as_deref())?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ProjectIdArgs {
    pub fn id(&self) -> Option<&str> {
        non_blank(self.project_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectNameArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl ProjectNameArgs {
    pub fn project_name(&self) -> Option<&str> {
        non_blank(self.name.as_deref()).or_else(|| non_blank(self.project.as_deref()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TaskIdArgs {
    pub fn id(&self) -> Option<&str> {
        non_blank(self.task_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskNameArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl TaskNameArgs {
    pub fn task_name(&self) -> Option<&str> {
        non_blank(self.name.as_deref()).or_else(|| non_blank(self.task.as_deref()))
    }
}

/// Generic escape hatch: a raw call against the tracker API, with
/// `{{dotted.path}}` placeholders resolved from the event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OpenApiCallArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Accepts "true"/"1" and "false"/"0" (case-insensitive); anything else
/// is unparseable and conditions over it fail closed.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
