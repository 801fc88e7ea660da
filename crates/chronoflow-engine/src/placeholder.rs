//! `{{dotted.path}}` placeholder resolution for openapi_call templates.
//!
//! Tokens are looked up in the event payload by dotted path. Unresolved
//! or non-scalar tokens become the empty string so a bad template
//! degrades to a harmless (usually 404) call rather than leaking the
//! literal `{{...}}` into a request.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap())
}

/// Resolve placeholders in a free-text template (request bodies).
pub fn resolve(template: &str, payload: &Value) -> String {
    token_regex()
        .replace_all(template, |caps: &regex::Captures| {
            lookup_scalar(payload, caps[1].trim())
        })
        .into_owned()
}

/// Resolve placeholders in a URL path template. Each resolved value is
/// percent-encoded so ids with reserved characters stay one segment.
pub fn resolve_for_path(template: &str, payload: &Value) -> String {
    token_regex()
        .replace_all(template, |caps: &regex::Captures| {
            urlencoding::encode(&lookup_scalar(payload, caps[1].trim())).into_owned()
        })
        .into_owned()
}

/// Resolve placeholders in every string of a JSON document, in place.
pub fn resolve_in_json(value: &mut Value, payload: &Value) {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                *s = resolve(s, payload);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_in_json(item, payload);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_in_json(v, payload);
            }
        }
        _ => {}
    }
}

fn lookup_scalar(payload: &Value, path: &str) -> String {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return String::new(),
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return String::new(),
            },
            _ => return String::new(),
        };
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}
