//! Webhook idempotency cache.
//!
//! Delivery retries and at-least-once upstream queues mean the same
//! event can arrive more than once inside a short window. The cache
//! fingerprints each event, hashes it with the workspace and event type,
//! and performs an atomic check-and-insert with a TTL. The record is
//! written before any external side effect, so a crash mid-processing
//! errs on the side of dropping a replay rather than double-applying.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL bounds; values outside are clamped, not rejected.
const MIN_TTL: Duration = Duration::from_secs(60);
const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Pluggable dedup record storage. The default is in-process; a
/// multi-replica deployment plugs in a shared store.
pub trait IdempotencyStore: Send + Sync {
    /// Atomically record `key` unless a live record already exists.
    /// Returns true when the key was newly inserted.
    fn insert_if_absent(&self, key: &str, ttl: Duration) -> bool;
}

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn insert_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, expires| *expires > now);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), now + ttl);
        true
    }
}

/// Extracts the part of a payload that identifies the event instance.
/// Registered per event type; the default scans a preferred-field list.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, payload: &Value) -> Option<String>;
}

/// Fields that identify an event instance, most specific first. The
/// dotted entry handles payloads nesting the entity under `timeEntry`.
const PREFERRED_FIELDS: [&str; 13] = [
    "payloadId",
    "eventId",
    "id",
    "timeEntryId",
    "timeEntry.id",
    "projectId",
    "clientId",
    "taskId",
    "userId",
    "assignmentId",
    "targetId",
    "webhookId",
    "invoiceId",
];

pub struct PreferredFieldFingerprinter;

impl Fingerprinter for PreferredFieldFingerprinter {
    fn fingerprint(&self, payload: &Value) -> Option<String> {
        for field in PREFERRED_FIELDS {
            let mut node = payload;
            for segment in field.split('.') {
                match node.get(segment) {
                    Some(next) => node = next,
                    None => {
                        node = &Value::Null;
                        break;
                    }
                }
            }
            match node {
                Value::String(s) if !s.is_empty() => return Some(format!("{field}={s}")),
                Value::Number(n) => return Some(format!("{field}={n}")),
                _ => {}
            }
        }
        None
    }
}

pub struct IdempotencyCache {
    store: Box<dyn IdempotencyStore>,
    ttl: Duration,
    by_event_type: HashMap<String, Box<dyn Fingerprinter>>,
    default_fingerprinter: Box<dyn Fingerprinter>,
}

impl IdempotencyCache {
    pub fn new(store: Box<dyn IdempotencyStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(ttl_secs).clamp(MIN_TTL, MAX_TTL),
            by_event_type: HashMap::new(),
            default_fingerprinter: Box::new(PreferredFieldFingerprinter),
        }
    }

    pub fn in_memory(ttl_secs: u64) -> Self {
        Self::new(Box::new(InMemoryIdempotencyStore::new()), ttl_secs)
    }

    /// Override fingerprint extraction for one event type.
    pub fn register_fingerprinter(
        &mut self,
        event_type: impl Into<String>,
        fingerprinter: Box<dyn Fingerprinter>,
    ) {
        self.by_event_type.insert(event_type.into(), fingerprinter);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True if an equivalent event was already seen inside the TTL
    /// window. A fresh event is recorded as a side effect.
    pub fn is_duplicate(&self, workspace_id: &str, event_type: &str, payload: &Value) -> bool {
        let fingerprinter = self
            .by_event_type
            .get(event_type)
            .unwrap_or(&self.default_fingerprinter);
        let material = fingerprinter
            .fingerprint(payload)
            .unwrap_or_else(|| hash_hex(&payload.to_string()));
        let key = hash_hex(&format!("{workspace_id}|{event_type}|{material}"));
        !self.store.insert_if_absent(&key, self.ttl)
    }
}

fn hash_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_event_is_duplicate_within_ttl() {
        let cache = IdempotencyCache::in_memory(600);
        let payload = json!({"timeEntry": {"id": "te1"}});
        assert!(!cache.is_duplicate("ws1", "NEW_TIME_ENTRY", &payload));
        assert!(cache.is_duplicate("ws1", "NEW_TIME_ENTRY", &payload));
    }

    #[test]
    fn test_dedup_scoped_by_workspace_and_event_type() {
        let cache = IdempotencyCache::in_memory(600);
        let payload = json!({"id": "te1"});
        assert!(!cache.is_duplicate("ws1", "NEW_TIME_ENTRY", &payload));
        assert!(!cache.is_duplicate("ws2", "NEW_TIME_ENTRY", &payload));
        assert!(!cache.is_duplicate("ws1", "TIME_ENTRY_UPDATED", &payload));
    }

    #[test]
    fn test_preferred_field_order() {
        let fp = PreferredFieldFingerprinter;
        let payload = json!({"eventId": "e9", "id": "te1"});
        assert_eq!(fp.fingerprint(&payload), Some("eventId=e9".into()));

        let nested = json!({"timeEntry": {"id": "te1"}});
        assert_eq!(fp.fingerprint(&nested), Some("timeEntry.id=te1".into()));

        assert_eq!(fp.fingerprint(&json!({"other": true})), None);
    }

    #[test]
    fn test_secondary_entity_ids_are_fingerprinted() {
        // Assignment, approval-target, webhook and invoice events carry
        // their own id fields instead of a time-entry id.
        let fp = PreferredFieldFingerprinter;
        assert_eq!(
            fp.fingerprint(&json!({"assignmentId": "a1"})),
            Some("assignmentId=a1".into())
        );
        assert_eq!(
            fp.fingerprint(&json!({"targetId": "t1"})),
            Some("targetId=t1".into())
        );
        assert_eq!(
            fp.fingerprint(&json!({"webhookId": "w1"})),
            Some("webhookId=w1".into())
        );
        assert_eq!(
            fp.fingerprint(&json!({"invoiceId": "i1"})),
            Some("invoiceId=i1".into())
        );
    }

    #[test]
    fn test_payload_without_ids_falls_back_to_content_hash() {
        let cache = IdempotencyCache::in_memory(600);
        let a = json!({"blob": "x"});
        let b = json!({"blob": "y"});
        assert!(!cache.is_duplicate("ws1", "EV", &a));
        assert!(cache.is_duplicate("ws1", "EV", &a));
        assert!(!cache.is_duplicate("ws1", "EV", &b));
    }

    #[test]
    fn test_ttl_clamped_to_bounds() {
        assert_eq!(IdempotencyCache::in_memory(5).ttl(), MIN_TTL);
        assert_eq!(
            IdempotencyCache::in_memory(7 * 24 * 60 * 60).ttl(),
            MAX_TTL
        );
        assert_eq!(IdempotencyCache::in_memory(600).ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_custom_fingerprinter_per_event_type() {
        struct ByBatch;
        impl Fingerprinter for ByBatch {
            fn fingerprint(&self, payload: &Value) -> Option<String> {
                payload.get("batchId").and_then(Value::as_str).map(String::from)
            }
        }

        let mut cache = IdempotencyCache::in_memory(600);
        cache.register_fingerprinter("BATCH", Box::new(ByBatch));

        // Different entity ids, same batch: duplicate under the custom
        // extractor.
        let a = json!({"batchId": "b1", "id": "x"});
        let b = json!({"batchId": "b1", "id": "y"});
        assert!(!cache.is_duplicate("ws1", "BATCH", &a));
        assert!(cache.is_duplicate("ws1", "BATCH", &b));
    }

    #[test]
    fn test_store_expiry() {
        let store = InMemoryIdempotencyStore::new();
        assert!(store.insert_if_absent("k", Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.insert_if_absent("k", Duration::from_millis(1)));
    }
}
