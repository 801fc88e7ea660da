//! TTL-cached view over the external rule store, so per-event rule
//! loads do not hit the store every time. A store outage serves the
//! stale entry when one exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use chronoflow_core::traits::RuleStore;
use chronoflow_core::{Result, Rule};

struct CachedRules {
    rules: Arc<Vec<Rule>>,
    fetched_at: Instant,
}

pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedRules>>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn RuleStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(ttl_secs),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Enabled rules for a workspace, served from cache while fresh.
    /// When the store errors and a stale entry exists, the stale entry
    /// is served (with a warning) instead of failing the event.
    pub async fn get_enabled(&self, workspace_id: &str) -> Result<Arc<Vec<Rule>>> {
        if let Some(entry) = self.entries.read().await.get(workspace_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.rules.clone());
            }
        }

        match self.store.get_enabled(workspace_id).await {
            Ok(rules) => {
                let rules = Arc::new(rules);
                self.entries.write().await.insert(
                    workspace_id.to_string(),
                    CachedRules {
                        rules: rules.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(rules)
            }
            Err(e) => {
                if let Some(entry) = self.entries.read().await.get(workspace_id) {
                    tracing::warn!(
                        "⚠️ Rule store unavailable for workspace {workspace_id}, serving stale rules: {e}"
                    );
                    return Ok(entry.rules.clone());
                }
                Err(e)
            }
        }
    }

    /// Drop the cached entry after a rule mutation.
    pub async fn invalidate(&self, workspace_id: &str) {
        self.entries.write().await.remove(workspace_id);
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}
