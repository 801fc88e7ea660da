//! Event router — the state machine from validated webhook event to
//! outcome.
//!
//! Sequence per event: workspace check → idempotency gate → rule load →
//! trigger filter → evaluation → action union → execution (inline for
//! small batches, background worker for large ones). The dedup record
//! is written before any side effect, so even an event that later
//! errors will not be re-processed inside the TTL window.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;

use chronoflow_cache::{DirectoryCache, Fingerprinter, IdempotencyCache, RuleCache};
use chronoflow_core::rule::Action;
use chronoflow_core::traits::{ClientFactory, RuleStore, TokenStore};
use chronoflow_core::{ChronoflowConfig, EventContext, Result, Rule};
use chronoflow_engine::{evaluate, validate_rule};
use chronoflow_executor::{ActionExecutor, ExecutionSummary};

use crate::outcome::{EventOutcome, EventStatus};

pub struct EventRouter {
    config: ChronoflowConfig,
    store: Arc<dyn RuleStore>,
    rules: RuleCache,
    tokens: Arc<dyn TokenStore>,
    clients: Arc<dyn ClientFactory>,
    directory: Arc<DirectoryCache>,
    dedup: IdempotencyCache,
    /// Event types some persisted rule explicitly triggers on. Consulted
    /// only when wildcard triggers are disabled.
    triggers: RwLock<HashSet<String>>,
    workers: Arc<Semaphore>,
}

impl EventRouter {
    pub fn new(
        config: ChronoflowConfig,
        store: Arc<dyn RuleStore>,
        tokens: Arc<dyn TokenStore>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        let pool = config.worker_pool_size();
        Self {
            rules: RuleCache::new(store.clone(), config.rule_cache_ttl_secs),
            dedup: IdempotencyCache::in_memory(config.dedup_ttl_secs),
            directory: Arc::new(DirectoryCache::new(pool)),
            workers: Arc::new(Semaphore::new(pool)),
            triggers: RwLock::new(HashSet::new()),
            config,
            store,
            tokens,
            clients,
        }
    }

    /// Override dedup fingerprint extraction for one event type.
    pub fn register_fingerprinter(
        &mut self,
        event_type: impl Into<String>,
        fingerprinter: Box<dyn Fingerprinter>,
    ) {
        self.dedup.register_fingerprinter(event_type, fingerprinter);
    }

    /// Seed the trigger registry from persisted rules. Best-effort:
    /// stores that cannot enumerate workspaces leave the registry empty.
    pub async fn init_triggers(&self) {
        let workspaces = match self.store.list_workspaces().await {
            Ok(workspaces) => workspaces,
            Err(e) => {
                tracing::debug!("Trigger registry not seeded: {e}");
                return;
            }
        };
        for workspace_id in workspaces {
            match self.rules.get_enabled(&workspace_id).await {
                Ok(rules) => {
                    for rule in rules.iter() {
                        self.register_trigger(rule);
                    }
                }
                Err(e) => {
                    tracing::debug!("Skipping trigger seed for workspace {workspace_id}: {e}")
                }
            }
        }
    }

    pub fn register_trigger(&self, rule: &Rule) {
        if let Some(event) = rule.trigger_event() {
            self.triggers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(event.to_uppercase());
        }
    }

    /// Validate and admit a new or updated rule: structural checks,
    /// trigger registration, rule-cache invalidation.
    pub async fn accept_rule(&self, workspace_id: &str, rule: &Rule) -> Result<()> {
        validate_rule(rule)?;
        self.register_trigger(rule);
        self.rules.invalidate(workspace_id).await;
        Ok(())
    }

    /// Handle one validated event. Never returns an error: failures map
    /// to an `error` outcome after the dedup record is in place.
    pub async fn handle_event(
        &self,
        workspace_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> EventOutcome {
        if workspace_id.trim().is_empty() {
            return EventOutcome::new(event_type, EventStatus::Error)
                .with_message("missing workspace id");
        }

        if self.dedup.is_duplicate(workspace_id, event_type, payload) {
            tracing::info!("Duplicate {event_type} event for workspace {workspace_id}, skipping");
            return EventOutcome::new(event_type, EventStatus::Duplicate);
        }

        match self.process(workspace_id, event_type, payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Failed to process {event_type} event for workspace {workspace_id}: {e}"
                );
                EventOutcome::new(event_type, EventStatus::Error).with_message(e.to_string())
            }
        }
    }

    async fn process(
        &self,
        workspace_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<EventOutcome> {
        if !self.config.wildcard_triggers && !self.has_trigger(event_type) {
            return Ok(EventOutcome::new(event_type, EventStatus::NoMatchingRules));
        }

        let rules = self.rules.get_enabled(workspace_id).await?;
        let context = EventContext::from_payload(payload);

        let mut matched: Vec<&Rule> = rules
            .iter()
            .filter(|rule| self.rule_triggered(rule, event_type))
            .filter(|rule| evaluate(rule, &context))
            .collect();
        // Stable sort keeps store order within a priority band.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        if matched.is_empty() {
            return Ok(EventOutcome::new(event_type, EventStatus::NoMatchingRules));
        }

        let actions: Vec<Action> = matched
            .iter()
            .flat_map(|rule| rule.actions.iter().cloned())
            .collect();
        if actions.is_empty() {
            return Ok(EventOutcome::new(event_type, EventStatus::NoActions).with_actions(0));
        }

        // Dry run needs no credentials; check before the token lookup.
        if !self.config.apply_changes {
            let kinds: Vec<&str> = actions.iter().map(Action::kind_label).collect();
            tracing::info!(
                "Apply-changes off: {} action(s) for {event_type} in workspace {workspace_id}: {}",
                actions.len(),
                kinds.join(", ")
            );
            return Ok(EventOutcome::new(event_type, EventStatus::ActionsLogged)
                .with_actions(actions.len()));
        }

        let Some(token) = self.tokens.get(workspace_id) else {
            tracing::warn!("⚠️ No installation token for workspace {workspace_id}");
            return Ok(EventOutcome::new(event_type, EventStatus::MissingToken)
                .with_actions(actions.len()));
        };

        let api = self.clients.create(&token.api_base_url, &token.token);
        let executor = ActionExecutor::new(
            api,
            self.directory.clone(),
            self.config.retry.clone(),
            true,
        );

        if actions.len() > self.config.async_action_threshold {
            self.schedule(executor, workspace_id, event_type, context, actions.clone());
            return Ok(
                EventOutcome::new(event_type, EventStatus::Scheduled).with_actions(actions.len())
            );
        }

        let summary = executor.execute(workspace_id, &context, &actions).await;
        tracing::info!(
            "✅ {event_type} in workspace {workspace_id}: {}/{} action(s) applied",
            summary.executed,
            summary.attempted
        );
        Ok(
            EventOutcome::new(event_type, summary_status(&actions, &summary))
                .with_actions(actions.len())
                .with_execution(summary.attempted, summary.executed, summary.failed),
        )
    }

    /// Run a large batch on the worker pool; the outcome is only logged.
    fn schedule(
        &self,
        executor: ActionExecutor,
        workspace_id: &str,
        event_type: &str,
        context: EventContext,
        actions: Vec<Action>,
    ) {
        let workers = self.workers.clone();
        let workspace_id = workspace_id.to_string();
        let event_type = event_type.to_string();
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire().await else {
                return;
            };
            let summary = executor.execute(&workspace_id, &context, &actions).await;
            if summary.failed > 0 {
                tracing::warn!(
                    "⚠️ Background batch for {event_type} in workspace {workspace_id}: {}/{} failed",
                    summary.failed,
                    summary.attempted
                );
            } else {
                tracing::info!(
                    "✅ Background batch for {event_type} in workspace {workspace_id}: {}/{} applied",
                    summary.executed,
                    summary.attempted
                );
            }
        });
    }

    fn has_trigger(&self, event_type: &str) -> bool {
        self.triggers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&event_type.to_uppercase())
    }

    fn rule_triggered(&self, rule: &Rule, event_type: &str) -> bool {
        match rule.trigger_event() {
            Some(event) => event.eq_ignore_ascii_case(event_type),
            None => self.config.wildcard_triggers,
        }
    }
}

fn summary_status(actions: &[Action], summary: &ExecutionSummary) -> EventStatus {
    if summary.failed > 0 {
        EventStatus::Partial
    } else if summary.entity_changed || actions.iter().any(|a| !a.is_entity_mutation()) {
        EventStatus::ActionsApplied
    } else {
        EventStatus::NoChanges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chronoflow_core::traits::{ApiResponse, HttpMethod, TrackerApi, WorkspaceToken};
    use chronoflow_core::ChronoflowError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockStore {
        rules: HashMap<String, Vec<Rule>>,
        fail: bool,
    }

    impl MockStore {
        fn with_rules(workspace_id: &str, rules: Vec<Value>) -> Arc<Self> {
            let rules = rules
                .into_iter()
                .map(|r| serde_json::from_value(r).unwrap())
                .collect();
            Arc::new(Self {
                rules: HashMap::from([(workspace_id.to_string(), rules)]),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl RuleStore for MockStore {
        async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>> {
            if self.fail {
                return Err(ChronoflowError::Store("down".into()));
            }
            Ok(self.rules.get(workspace_id).cloned().unwrap_or_default())
        }

        async fn list_workspaces(&self) -> Result<Vec<String>> {
            Ok(self.rules.keys().cloned().collect())
        }
    }

    struct MockTokens;

    impl TokenStore for MockTokens {
        fn get(&self, workspace_id: &str) -> Option<WorkspaceToken> {
            (workspace_id == "ws1").then(|| WorkspaceToken {
                api_base_url: "https://api.example.com".into(),
                token: "tok".into(),
            })
        }
    }

    #[derive(Default)]
    struct MockApi {
        updates: Mutex<Vec<Value>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TrackerApi for MockApi {
        async fn get_time_entry(&self, _: &str, entry_id: &str) -> Result<Value> {
            Ok(json!({"id": entry_id, "tagIds": []}))
        }
        async fn update_time_entry(&self, _: &str, _: &str, patch: Value) -> Result<Value> {
            self.updates.lock().unwrap().push(patch.clone());
            Ok(patch)
        }
        async fn get_tags(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![
                json!({"id": "t1", "name": "Billable"}),
                json!({"id": "t2", "name": "Urgent"}),
            ])
        }
        async fn create_tag(&self, _: &str, _: &str) -> Result<Value> {
            unimplemented!()
        }
        async fn get_projects(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![])
        }
        async fn get_clients(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![])
        }
        async fn get_users(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![])
        }
        async fn get_tasks(&self, _: &str, _: &str) -> Result<Vec<Value>> {
            Ok(vec![])
        }
        async fn request(&self, method: HttpMethod, path: &str, _: Option<String>) -> Result<ApiResponse> {
            self.requests
                .lock()
                .unwrap()
                .push(format!("{} {path}", method.as_str()));
            Ok(ApiResponse {
                status: 200,
                body: "{}".into(),
            })
        }
    }

    struct MockFactory {
        api: Arc<MockApi>,
    }

    impl ClientFactory for MockFactory {
        fn create(&self, _: &str, _: &str) -> Arc<dyn TrackerApi> {
            self.api.clone()
        }
    }

    fn billable_tag_rule() -> Value {
        json!({
            "name": "tag billable entries",
            "conditions": [{"type": "isBillable", "value": "true"}],
            "actions": [{"type": "add_tag", "args": {"tag": "Billable"}}]
        })
    }

    fn router_with(
        store: Arc<MockStore>,
        api: Arc<MockApi>,
        mutate: impl FnOnce(&mut ChronoflowConfig),
    ) -> EventRouter {
        let mut config = ChronoflowConfig {
            apply_changes: true,
            worker_threads: 2,
            ..Default::default()
        };
        mutate(&mut config);
        EventRouter::new(config, store, Arc::new(MockTokens), Arc::new(MockFactory { api }))
    }

    fn billable_payload() -> Value {
        json!({"timeEntry": {"id": "te1", "billable": true, "tagIds": []}})
    }

    #[tokio::test]
    async fn test_matching_event_applies_actions_inline() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws1", vec![billable_tag_rule()]);
        let router = router_with(store, api.clone(), |_| {});

        let outcome = router
            .handle_event("ws1", "NEW_TIME_ENTRY", &billable_payload())
            .await;

        assert_eq!(outcome.status, EventStatus::ActionsApplied);
        assert_eq!(outcome.actions_count, Some(1));
        assert_eq!(outcome.executed_count, Some(1));
        assert_eq!(outcome.actions_failed, Some(0));
        assert_eq!(api.updates.lock().unwrap()[0]["tagIds"], json!(["t1"]));
    }

    #[tokio::test]
    async fn test_description_rule_end_to_end() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules(
            "ws1",
            vec![json!({
                "name": "tag meetings",
                "conditions": [
                    {"type": "descriptionContains", "operator": "CONTAINS", "value": "meeting"}
                ],
                "actions": [{"type": "add_tag", "args": {"tag": "billable"}}]
            })],
        );
        let router = router_with(store, api.clone(), |_| {});

        let payload = json!({
            "workspaceId": "ws1",
            "timeEntry": {"id": "te1", "description": "Team meeting", "tagIds": []}
        });
        let outcome = router.handle_event("ws1", "NEW_TIME_ENTRY", &payload).await;

        assert_eq!(outcome.status, EventStatus::ActionsApplied);
        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["tagIds"], json!(["t1"]));
    }

    #[tokio::test]
    async fn test_second_delivery_is_duplicate() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws1", vec![billable_tag_rule()]);
        let router = router_with(store, api.clone(), |_| {});
        let payload = billable_payload();

        let first = router.handle_event("ws1", "NEW_TIME_ENTRY", &payload).await;
        let second = router.handle_event("ws1", "NEW_TIME_ENTRY", &payload).await;

        assert_eq!(first.status, EventStatus::ActionsApplied);
        assert_eq!(second.status, EventStatus::Duplicate);
        assert_eq!(api.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_matching_event_reports_no_rules() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws1", vec![billable_tag_rule()]);
        let router = router_with(store, api.clone(), |_| {});

        let payload = json!({"timeEntry": {"id": "te2", "billable": false}});
        let outcome = router.handle_event("ws1", "NEW_TIME_ENTRY", &payload).await;

        assert_eq!(outcome.status, EventStatus::NoMatchingRules);
        assert!(api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_changes_off_logs_without_execution() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws1", vec![billable_tag_rule()]);
        let router = router_with(store, api.clone(), |c| c.apply_changes = false);

        let outcome = router
            .handle_event("ws1", "NEW_TIME_ENTRY", &billable_payload())
            .await;

        assert_eq!(outcome.status, EventStatus::ActionsLogged);
        assert_eq!(outcome.actions_count, Some(1));
        assert!(api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_token() {
        let api = Arc::new(MockApi::default());
        // ws2 has rules but no installation token.
        let store = MockStore::with_rules("ws2", vec![billable_tag_rule()]);
        let router = router_with(store, api.clone(), |c| c.apply_changes = false);

        let outcome = router
            .handle_event("ws2", "NEW_TIME_ENTRY", &billable_payload())
            .await;

        assert_eq!(outcome.status, EventStatus::ActionsLogged);
        assert_eq!(outcome.actions_count, Some(1));
        assert!(api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_without_token() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws2", vec![billable_tag_rule()]);
        let router = router_with(store, api, |_| {});

        let outcome = router
            .handle_event("ws2", "NEW_TIME_ENTRY", &billable_payload())
            .await;
        assert_eq!(outcome.status, EventStatus::MissingToken);
        assert_eq!(outcome.actions_count, Some(1));
    }

    #[tokio::test]
    async fn test_matching_rule_without_actions() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules(
            "ws1",
            vec![json!({"name": "observer", "conditions": [], "actions": []})],
        );
        let router = router_with(store, api, |_| {});

        let outcome = router
            .handle_event("ws1", "NEW_TIME_ENTRY", &billable_payload())
            .await;
        assert_eq!(outcome.status, EventStatus::NoActions);
    }

    #[tokio::test]
    async fn test_rules_run_in_priority_order() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules(
            "ws1",
            vec![
                json!({
                    "name": "low",
                    "priority": 0,
                    "actions": [{"type": "openapi_call", "args": {"method": "POST", "path": "/second"}}]
                }),
                json!({
                    "name": "high",
                    "priority": 10,
                    "actions": [{"type": "openapi_call", "args": {"method": "POST", "path": "/first"}}]
                }),
            ],
        );
        let router = router_with(store, api.clone(), |_| {});

        let outcome = router
            .handle_event("ws1", "NEW_TIME_ENTRY", &billable_payload())
            .await;

        assert_eq!(outcome.status, EventStatus::ActionsApplied);
        assert_eq!(
            *api.requests.lock().unwrap(),
            vec!["POST /first", "POST /second"]
        );
    }

    #[tokio::test]
    async fn test_large_batch_is_scheduled() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules(
            "ws1",
            vec![json!({
                "name": "bulk",
                "actions": [
                    {"type": "openapi_call", "args": {"method": "POST", "path": "/a"}},
                    {"type": "openapi_call", "args": {"method": "POST", "path": "/b"}}
                ]
            })],
        );
        let router = router_with(store, api.clone(), |c| c.async_action_threshold = 1);

        let outcome = router
            .handle_event("ws1", "NEW_TIME_ENTRY", &billable_payload())
            .await;
        assert_eq!(outcome.status, EventStatus::Scheduled);
        assert_eq!(outcome.actions_count, Some(2));

        // The background worker still runs the batch.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(api.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_reports_error_after_dedup() {
        let api = Arc::new(MockApi::default());
        let store = Arc::new(MockStore {
            rules: HashMap::new(),
            fail: true,
        });
        let router = router_with(store, api, |_| {});
        let payload = billable_payload();

        let outcome = router.handle_event("ws1", "NEW_TIME_ENTRY", &payload).await;
        assert_eq!(outcome.status, EventStatus::Error);

        // The dedup record was written before the failure.
        let retry = router.handle_event("ws1", "NEW_TIME_ENTRY", &payload).await;
        assert_eq!(retry.status, EventStatus::Duplicate);
    }

    #[tokio::test]
    async fn test_explicit_triggers_with_wildcard_disabled() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules(
            "ws1",
            vec![
                json!({
                    "name": "scoped",
                    "trigger": {"event": "NEW_TIME_ENTRY"},
                    "conditions": [{"type": "isBillable", "value": "true"}],
                    "actions": [{"type": "add_tag", "args": {"tag": "Billable"}}]
                }),
                json!({
                    "name": "wildcard",
                    "actions": [{"type": "add_tag", "args": {"tag": "Urgent"}}]
                }),
            ],
        );
        let router = router_with(store, api.clone(), |c| c.wildcard_triggers = false);
        router.init_triggers().await;

        let outcome = router
            .handle_event("ws1", "NEW_TIME_ENTRY", &billable_payload())
            .await;
        assert_eq!(outcome.status, EventStatus::ActionsApplied);
        // Only the explicitly triggered rule ran.
        assert_eq!(api.updates.lock().unwrap()[0]["tagIds"], json!(["t1"]));

        let other = router
            .handle_event("ws1", "TIMER_STOPPED", &json!({"timeEntry": {"id": "te3"}}))
            .await;
        assert_eq!(other.status, EventStatus::NoMatchingRules);
    }

    #[tokio::test]
    async fn test_blank_workspace_rejected() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws1", vec![]);
        let router = router_with(store, api, |_| {});

        let outcome = router.handle_event("  ", "NEW_TIME_ENTRY", &json!({})).await;
        assert_eq!(outcome.status, EventStatus::Error);
    }

    #[tokio::test]
    async fn test_accept_rule_validates_and_registers() {
        let api = Arc::new(MockApi::default());
        let store = MockStore::with_rules("ws1", vec![]);
        let router = router_with(store, api, |_| {});

        let bad: Rule = serde_json::from_value(json!({"name": "  "})).unwrap();
        assert!(router.accept_rule("ws1", &bad).await.is_err());

        let good: Rule = serde_json::from_value(json!({
            "name": "r",
            "trigger": {"event": "timer_stopped"}
        }))
        .unwrap();
        router.accept_rule("ws1", &good).await.unwrap();
        assert!(router.has_trigger("TIMER_STOPPED"));
    }
}
