//! Action executor: folds matched actions into at most one entity write
//! per event, plus any generic API calls, in rule order.
//!
//! Entity mutations accumulate into a single patch over the live entity
//! (read-modify-write, so a retried PUT never clobbers concurrent edits
//! with stale state). Name resolution goes through the directory
//! snapshot; unresolved names are skipped, not failed. Each remote call
//! goes through the retry controller.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use chronoflow_api::RetryController;
use chronoflow_cache::{DirectoryCache, DirectorySnapshot};
use chronoflow_core::config::RetryConfig;
use chronoflow_core::rule::Action;
use chronoflow_core::traits::TrackerApi;
use chronoflow_core::{EventContext, Result};

use crate::openapi::OpenApiCall;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Actions handed to the executor.
    pub attempted: usize,
    /// Actions that took effect (or were no-op idempotent successes).
    pub executed: usize,
    /// Actions lost to API errors after retries.
    pub failed: usize,
    /// Actions dropped because a name did not resolve or args were bad.
    pub skipped: usize,
    /// Whether the entity write actually changed anything.
    pub entity_changed: bool,
}

pub struct ActionExecutor {
    api: Arc<dyn TrackerApi>,
    directory: Arc<DirectoryCache>,
    retry: RetryController,
    apply_changes: bool,
}

impl ActionExecutor {
    pub fn new(
        api: Arc<dyn TrackerApi>,
        directory: Arc<DirectoryCache>,
        retry_config: RetryConfig,
        apply_changes: bool,
    ) -> Self {
        Self {
            api,
            directory,
            retry: RetryController::new(retry_config),
            apply_changes,
        }
    }

    /// Execute a batch of actions for one event. Entity mutations fold
    /// into one write; failures are per-action (best-effort batch).
    pub async fn execute(
        &self,
        workspace_id: &str,
        context: &EventContext,
        actions: &[Action],
    ) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            attempted: actions.len(),
            ..Default::default()
        };

        let snapshot = if actions.iter().any(needs_directory) {
            match self.directory.get(&self.api, workspace_id).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Directory unavailable for workspace {workspace_id}, name resolution disabled: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        // Fold over the live entity, not the event payload: the payload
        // can be stale by the time the event is processed, and a
        // payload-seeded tagIds write would erase tags added since.
        let mut fetch_failed = false;
        let baseline = if self.apply_changes && actions.iter().any(Action::is_entity_mutation) {
            match context.entity_id() {
                Some(entity_id) => {
                    let fetched = self
                        .retry
                        .run("fetch time entry", || {
                            self.api.get_time_entry(workspace_id, entity_id)
                        })
                        .await;
                    match fetched {
                        Ok(entity) => EntityState::from_entity(&entity),
                        Err(e) => {
                            tracing::warn!(
                                "⚠️ Failed to fetch entity {entity_id} in workspace {workspace_id}: {e}"
                            );
                            fetch_failed = true;
                            EntityState::from_context(context)
                        }
                    }
                }
                // No entity id: the write is refused further down.
                None => EntityState::from_context(context),
            }
        } else {
            EntityState::from_context(context)
        };

        let original_tag_ids = baseline.tag_ids.clone();
        let mut tag_ids = baseline.tag_ids.clone();
        let mut patch = Map::new();
        // Tags created earlier in this batch, keyed by normalized name,
        // so a repeated add_tag never creates twice.
        let mut created_tags: HashMap<String, String> = HashMap::new();
        let mut pending_project_id: Option<String> = None;
        // Entity-mutation actions folded so far; they succeed or fail
        // together with the single write.
        let mut contributors = 0usize;

        for action in actions {
            match action {
                Action::AddTag(args) => {
                    let Some(name) = args.tag_name() else {
                        summary.skipped += 1;
                        continue;
                    };
                    match self
                        .resolve_or_create_tag(
                            workspace_id,
                            snapshot.as_deref(),
                            &mut created_tags,
                            name,
                        )
                        .await
                    {
                        TagResolution::Known(id) => {
                            if !tag_ids.contains(&id) {
                                tag_ids.push(id);
                            }
                            contributors += 1;
                        }
                        TagResolution::WouldCreate => {
                            // Dry run: the tag would be created and
                            // applied; count it as effective.
                            contributors += 1;
                        }
                        TagResolution::Failed => summary.failed += 1,
                    }
                }
                Action::RemoveTag(args) => {
                    let Some(name) = args.tag_name() else {
                        summary.skipped += 1;
                        continue;
                    };
                    match resolve_tag_id(snapshot.as_deref(), name) {
                        Some(id) => {
                            tag_ids.retain(|existing| existing != &id);
                            contributors += 1;
                        }
                        None => {
                            tracing::debug!("remove_tag: unknown tag '{name}', skipping");
                            summary.skipped += 1;
                        }
                    }
                }
                Action::SetDescription(args) => match args.text() {
                    Some(text) => {
                        patch.insert("description".into(), json!(text));
                        contributors += 1;
                    }
                    None => summary.skipped += 1,
                },
                Action::SetBillable(args) => match args.desired() {
                    Some(billable) => {
                        patch.insert("billable".into(), json!(billable));
                        contributors += 1;
                    }
                    None => summary.skipped += 1,
                },
                Action::SetProjectById(args) => match args.id() {
                    Some(id) => {
                        patch.insert("projectId".into(), json!(id));
                        pending_project_id = Some(id.to_string());
                        contributors += 1;
                    }
                    None => summary.skipped += 1,
                },
                Action::SetProjectByName(args) => {
                    let resolved = args.project_name().and_then(|name| {
                        snapshot
                            .as_deref()
                            .and_then(|s| s.project_id_by_name(name))
                            .map(str::to_string)
                    });
                    match resolved {
                        Some(id) => {
                            patch.insert("projectId".into(), json!(id));
                            pending_project_id = Some(id);
                            contributors += 1;
                        }
                        None => {
                            tracing::debug!(
                                "set_project_by_name: unresolved project '{}', skipping",
                                args.project_name().unwrap_or("")
                            );
                            summary.skipped += 1;
                        }
                    }
                }
                Action::SetTaskById(args) => match args.id() {
                    Some(id) => {
                        patch.insert("taskId".into(), json!(id));
                        contributors += 1;
                    }
                    None => summary.skipped += 1,
                },
                Action::SetTaskByName(args) => {
                    let resolved = args.task_name().and_then(|name| {
                        resolve_task_id(
                            snapshot.as_deref(),
                            name,
                            pending_project_id.as_deref(),
                            baseline.project_id.as_deref(),
                            context,
                        )
                    });
                    match resolved {
                        Some(id) => {
                            patch.insert("taskId".into(), json!(id));
                            contributors += 1;
                        }
                        None => {
                            tracing::debug!(
                                "set_task_by_name: unresolved task '{}', skipping",
                                args.task_name().unwrap_or("")
                            );
                            summary.skipped += 1;
                        }
                    }
                }
                Action::OpenapiCall(args) => {
                    match self.dispatch_call(args, context).await {
                        Ok(()) => summary.executed += 1,
                        Err(e) => {
                            tracing::warn!("⚠️ openapi_call failed: {e}");
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        if tag_ids != original_tag_ids {
            patch.insert("tagIds".into(), json!(tag_ids));
        }
        prune_noop_fields(&mut patch, &baseline);

        if contributors == 0 {
            return summary;
        }
        if fetch_failed {
            summary.failed += contributors;
            return summary;
        }
        if patch.is_empty() {
            // Every mutation folded to its current value already.
            summary.executed += contributors;
            return summary;
        }

        summary.entity_changed = true;
        if !self.apply_changes {
            tracing::info!(
                "Dry run: would update entity with {} field(s) for workspace {workspace_id}",
                patch.len()
            );
            summary.executed += contributors;
            return summary;
        }

        let Some(entity_id) = context.entity_id() else {
            tracing::warn!("⚠️ Event payload has no entity id, cannot apply entity mutations");
            summary.entity_changed = false;
            summary.failed += contributors;
            return summary;
        };

        let patch = Value::Object(patch);
        let write = self
            .retry
            .run("update time entry", || {
                self.api
                    .update_time_entry(workspace_id, entity_id, patch.clone())
            })
            .await;
        match write {
            Ok(_) => summary.executed += contributors,
            Err(e) => {
                tracing::warn!("⚠️ Entity update failed for workspace {workspace_id}: {e}");
                summary.entity_changed = false;
                summary.failed += contributors;
            }
        }
        summary
    }

    async fn resolve_or_create_tag(
        &self,
        workspace_id: &str,
        snapshot: Option<&DirectorySnapshot>,
        created_tags: &mut HashMap<String, String>,
        name: &str,
    ) -> TagResolution {
        if let Some(id) = resolve_tag_id(snapshot, name) {
            return TagResolution::Known(id);
        }
        if let Some(id) = created_tags.get(&chronoflow_cache::directory::normalize(name)) {
            return TagResolution::Known(id.clone());
        }
        if !self.apply_changes {
            return TagResolution::WouldCreate;
        }
        match self.create_tag(workspace_id, name).await {
            Ok(id) => {
                created_tags.insert(chronoflow_cache::directory::normalize(name), id.clone());
                self.directory.note_tag(workspace_id, &id, name).await;
                tracing::info!("✅ Created tag '{name}' ({id}) in workspace {workspace_id}");
                TagResolution::Known(id)
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to create tag '{name}': {e}");
                TagResolution::Failed
            }
        }
    }

    async fn create_tag(&self, workspace_id: &str, name: &str) -> Result<String> {
        let created = self
            .retry
            .run("create tag", || self.api.create_tag(workspace_id, name))
            .await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                chronoflow_core::ChronoflowError::Internal(format!(
                    "create tag response for '{name}' has no id"
                ))
            })
    }

    async fn dispatch_call(
        &self,
        args: &chronoflow_core::rule::OpenApiCallArgs,
        context: &EventContext,
    ) -> Result<()> {
        let call = OpenApiCall::from_args(args, context.raw())?;
        if !self.apply_changes {
            tracing::info!("Dry run: would call {} {}", call.method.as_str(), call.path);
            return Ok(());
        }
        call.execute(self.api.as_ref(), &self.retry).await?;
        Ok(())
    }
}

enum TagResolution {
    Known(String),
    WouldCreate,
    Failed,
}

/// Current entity values the fold starts from: the freshly fetched
/// entity when changes will be written, the event payload on dry runs.
struct EntityState {
    tag_ids: Vec<String>,
    description: Option<String>,
    billable: Option<bool>,
    project_id: Option<String>,
}

impl EntityState {
    fn from_entity(entity: &Value) -> Self {
        Self {
            tag_ids: entity
                .get("tagIds")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            description: entity
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            billable: entity.get("billable").and_then(Value::as_bool),
            project_id: entity
                .get("projectId")
                .and_then(Value::as_str)
                .map(String::from),
        }
    }

    fn from_context(context: &EventContext) -> Self {
        Self {
            tag_ids: context.tag_ids().map(<[String]>::to_vec).unwrap_or_default(),
            description: context.description().map(String::from),
            billable: context.billable(),
            project_id: context.project_id().map(String::from),
        }
    }
}

fn needs_directory(action: &Action) -> bool {
    matches!(
        action,
        Action::AddTag(_)
            | Action::RemoveTag(_)
            | Action::SetProjectByName(_)
            | Action::SetTaskByName(_)
    )
}

fn resolve_tag_id(snapshot: Option<&DirectorySnapshot>, name: &str) -> Option<String> {
    snapshot?.tag_id_by_name(name).map(str::to_string)
}

/// Project preference order for task-by-name resolution: a project set
/// earlier in this batch, then the entity's current project, then a
/// scan across every project.
fn resolve_task_id(
    snapshot: Option<&DirectorySnapshot>,
    task_name: &str,
    pending_project_id: Option<&str>,
    baseline_project_id: Option<&str>,
    context: &EventContext,
) -> Option<String> {
    let snapshot = snapshot?;
    let project_name = pending_project_id
        .and_then(|id| snapshot.project_name_by_id(id))
        .or_else(|| baseline_project_id.and_then(|id| snapshot.project_name_by_id(id)))
        .or_else(|| context.project_name());
    if let Some(project_name) = project_name {
        if let Some(task_id) = snapshot.task_id(project_name, task_name) {
            return Some(task_id.to_string());
        }
    }
    snapshot.task_id_any_project(task_name).map(str::to_string)
}

/// Drop patch fields that match the entity's current values, so a batch
/// that folds to the status quo skips the write entirely.
fn prune_noop_fields(patch: &mut Map<String, Value>, baseline: &EntityState) {
    if patch.get("description").and_then(Value::as_str) == baseline.description.as_deref()
        && patch.contains_key("description")
    {
        patch.remove("description");
    }
    if patch.get("billable").and_then(Value::as_bool) == baseline.billable
        && patch.contains_key("billable")
    {
        patch.remove("billable");
    }
    if patch.get("projectId").and_then(Value::as_str) == baseline.project_id.as_deref()
        && patch.contains_key("projectId")
    {
        patch.remove("projectId");
    }
}
