//! Typed view of an event payload for condition evaluation.
//!
//! Webhook payloads are JSON with pervasively optional fields. The
//! context makes absence explicit (`Option`) so the evaluator never has
//! to distinguish "missing" from "false" or "empty string" ad hoc.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct EventContext {
    description: Option<String>,
    /// `None` when the payload carried no tagIds field at all;
    /// `Some(vec![])` when it carried an empty list.
    tag_ids: Option<Vec<String>>,
    project_id: Option<String>,
    project_name: Option<String>,
    client_id: Option<String>,
    client_name: Option<String>,
    billable: Option<bool>,
    entity_id: Option<String>,
    raw: Value,
}

impl EventContext {
    /// Build a context from a webhook payload. Entity fields are read
    /// from the nested `timeEntry` object when present, otherwise from
    /// the payload root (both shapes occur in the wild).
    pub fn from_payload(payload: &Value) -> Self {
        let entity = payload.get("timeEntry").unwrap_or(payload);

        let project = entity.get("project");
        let project_name = project
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(String::from);
        let client_id = string_field(entity, "clientId")
            .or_else(|| project.and_then(|p| string_field(p, "clientId")));
        let client_name = project
            .and_then(|p| p.get("clientName"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| {
                entity
                    .get("client")
                    .and_then(|c| c.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from)
            });

        Self {
            description: string_field(entity, "description"),
            tag_ids: entity.get("tagIds").and_then(Value::as_array).map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            }),
            project_id: string_field(entity, "projectId"),
            project_name,
            client_id,
            client_name,
            billable: entity.get("billable").and_then(Value::as_bool),
            entity_id: string_field(entity, "id"),
            raw: payload.clone(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tag_ids(&self) -> Option<&[String]> {
        self.tag_ids.as_deref()
    }

    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tag_ids
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|id| id == tag_id))
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn billable(&self) -> Option<bool> {
        self.billable
    }

    /// Id of the entity the event is about (e.g. the time entry id).
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// The original payload, for placeholder resolution.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(String::from)
}
