//! Per-workspace directory cache: id↔name snapshots for tags, projects,
//! clients, users and tasks.
//!
//! Snapshots are immutable once published and swapped atomically behind
//! an `Arc`, so readers never observe a partially built directory. A
//! failed refresh leaves the previous snapshot in place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};

use chronoflow_core::traits::TrackerApi;
use chronoflow_core::Result;

/// trim + lowercase, the one normalization used for every name lookup.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub generation: u64,
    tag_names_by_id: HashMap<String, String>,
    tag_ids_by_name: HashMap<String, String>,
    project_names_by_id: HashMap<String, String>,
    project_ids_by_name: HashMap<String, String>,
    client_names_by_id: HashMap<String, String>,
    client_ids_by_name: HashMap<String, String>,
    user_names_by_id: HashMap<String, String>,
    user_ids_by_name: HashMap<String, String>,
    /// normalized project name -> normalized task name -> task id.
    task_ids: HashMap<String, HashMap<String, String>>,
    task_names_by_id: HashMap<String, String>,
}

impl DirectorySnapshot {
    pub fn tag_id_by_name(&self, name: &str) -> Option<&str> {
        self.tag_ids_by_name.get(&normalize(name)).map(String::as_str)
    }

    pub fn tag_name_by_id(&self, id: &str) -> Option<&str> {
        self.tag_names_by_id.get(id).map(String::as_str)
    }

    pub fn project_id_by_name(&self, name: &str) -> Option<&str> {
        self.project_ids_by_name.get(&normalize(name)).map(String::as_str)
    }

    pub fn project_name_by_id(&self, id: &str) -> Option<&str> {
        self.project_names_by_id.get(id).map(String::as_str)
    }

    pub fn client_id_by_name(&self, name: &str) -> Option<&str> {
        self.client_ids_by_name.get(&normalize(name)).map(String::as_str)
    }

    pub fn client_name_by_id(&self, id: &str) -> Option<&str> {
        self.client_names_by_id.get(id).map(String::as_str)
    }

    pub fn user_id_by_name(&self, name: &str) -> Option<&str> {
        self.user_ids_by_name.get(&normalize(name)).map(String::as_str)
    }

    pub fn user_name_by_id(&self, id: &str) -> Option<&str> {
        self.user_names_by_id.get(id).map(String::as_str)
    }

    /// Task id within a specific project.
    pub fn task_id(&self, project_name: &str, task_name: &str) -> Option<&str> {
        self.task_ids
            .get(&normalize(project_name))
            .and_then(|tasks| tasks.get(&normalize(task_name)))
            .map(String::as_str)
    }

    /// Fallback scan across every project for a uniquely named task.
    pub fn task_id_any_project(&self, task_name: &str) -> Option<&str> {
        let wanted = normalize(task_name);
        self.task_ids
            .values()
            .find_map(|tasks| tasks.get(&wanted))
            .map(String::as_str)
    }

    pub fn task_name_by_id(&self, id: &str) -> Option<&str> {
        self.task_names_by_id.get(id).map(String::as_str)
    }

    /// Copy of this snapshot with one extra tag, used when the executor
    /// creates a tag mid-batch and wants later actions to see it.
    pub fn with_tag(&self, id: &str, name: &str, generation: u64) -> Self {
        let mut copy = self.clone();
        copy.generation = generation;
        copy.tag_names_by_id.insert(id.to_string(), name.to_string());
        copy.tag_ids_by_name.insert(normalize(name), id.to_string());
        copy
    }
}

struct Slot {
    snapshot: RwLock<Option<Arc<DirectorySnapshot>>>,
    // Single-flight guard for the cold fetch.
    fetch_lock: Mutex<()>,
}

impl Slot {
    fn new() -> Self {
        Self {
            snapshot: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }
}

pub struct DirectoryCache {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    refresh_limit: Arc<Semaphore>,
    generation: AtomicU64,
}

impl DirectoryCache {
    /// `worker_pool` bounds how many background refreshes run at once.
    pub fn new(worker_pool: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            refresh_limit: Arc::new(Semaphore::new(worker_pool.max(1))),
            generation: AtomicU64::new(1),
        }
    }

    async fn slot(&self, workspace_id: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().await.get(workspace_id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Current snapshot for a workspace; the first caller blocks on a
    /// single-flight fetch, concurrent callers wait for its result.
    pub async fn get(
        &self,
        api: &Arc<dyn TrackerApi>,
        workspace_id: &str,
    ) -> Result<Arc<DirectorySnapshot>> {
        let slot = self.slot(workspace_id).await;
        if let Some(snapshot) = slot.snapshot.read().await.as_ref() {
            return Ok(snapshot.clone());
        }

        let _guard = slot.fetch_lock.lock().await;
        // A concurrent caller may have populated the slot while we
        // waited for the lock.
        if let Some(snapshot) = slot.snapshot.read().await.as_ref() {
            return Ok(snapshot.clone());
        }

        let snapshot = Arc::new(self.build(api, workspace_id).await?);
        *slot.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Rebuild the snapshot now and swap it in. On failure the previous
    /// snapshot stays servable and the error is returned to the caller.
    pub async fn refresh(
        &self,
        api: &Arc<dyn TrackerApi>,
        workspace_id: &str,
    ) -> Result<Arc<DirectorySnapshot>> {
        let slot = self.slot(workspace_id).await;
        match self.build(api, workspace_id).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *slot.snapshot.write().await = Some(snapshot.clone());
                tracing::debug!(
                    "Directory refreshed for workspace {workspace_id} (generation {})",
                    snapshot.generation
                );
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!("⚠️ Directory refresh failed for workspace {workspace_id}: {e}");
                Err(e)
            }
        }
    }

    /// Schedule a refresh on the bounded worker pool. The caller keeps
    /// serving the prior snapshot; failures are logged, never surfaced.
    pub fn refresh_async(self: &Arc<Self>, api: Arc<dyn TrackerApi>, workspace_id: String) {
        let cache = self.clone();
        let limit = self.refresh_limit.clone();
        tokio::spawn(async move {
            let Ok(_permit) = limit.acquire().await else {
                return;
            };
            let _ = cache.refresh(&api, &workspace_id).await;
        });
    }

    /// Publish a snapshot extended with a freshly created tag so the
    /// rest of the batch resolves it without a full refresh.
    pub async fn note_tag(&self, workspace_id: &str, tag_id: &str, tag_name: &str) {
        let slot = self.slot(workspace_id).await;
        let mut guard = slot.snapshot.write().await;
        if let Some(current) = guard.as_ref() {
            let generation = self.next_generation();
            *guard = Some(Arc::new(current.with_tag(tag_id, tag_name, generation)));
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    async fn build(
        &self,
        api: &Arc<dyn TrackerApi>,
        workspace_id: &str,
    ) -> Result<DirectorySnapshot> {
        let mut snapshot = DirectorySnapshot {
            generation: self.next_generation(),
            ..Default::default()
        };

        for tag in api.get_tags(workspace_id).await? {
            if let (Some(id), Some(name)) = (str_field(&tag, "id"), str_field(&tag, "name")) {
                snapshot.tag_names_by_id.insert(id.clone(), name.clone());
                snapshot.tag_ids_by_name.insert(normalize(&name), id);
            }
        }

        let projects = api.get_projects(workspace_id).await?;
        for project in &projects {
            if let (Some(id), Some(name)) = (str_field(project, "id"), str_field(project, "name")) {
                snapshot.project_names_by_id.insert(id.clone(), name.clone());
                snapshot.project_ids_by_name.insert(normalize(&name), id);
            }
        }

        for client in api.get_clients(workspace_id).await? {
            if let (Some(id), Some(name)) = (str_field(&client, "id"), str_field(&client, "name")) {
                snapshot.client_names_by_id.insert(id.clone(), name.clone());
                snapshot.client_ids_by_name.insert(normalize(&name), id);
            }
        }

        for user in api.get_users(workspace_id).await? {
            let name = str_field(&user, "name").or_else(|| str_field(&user, "email"));
            if let (Some(id), Some(name)) = (str_field(&user, "id"), name) {
                snapshot.user_names_by_id.insert(id.clone(), name.clone());
                snapshot.user_ids_by_name.insert(normalize(&name), id);
            }
        }

        for project in &projects {
            let (Some(project_id), Some(project_name)) =
                (str_field(project, "id"), str_field(project, "name"))
            else {
                continue;
            };
            let tasks = api.get_tasks(workspace_id, &project_id).await?;
            let by_name = snapshot.task_ids.entry(normalize(&project_name)).or_default();
            for task in tasks {
                if let (Some(id), Some(name)) = (str_field(&task, "id"), str_field(&task, "name")) {
                    by_name.insert(normalize(&name), id.clone());
                    snapshot.task_names_by_id.insert(id, name);
                }
            }
        }

        Ok(snapshot)
    }
}

fn str_field(node: &serde_json::Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chronoflow_core::traits::{ApiResponse, HttpMethod};
    use chronoflow_core::ChronoflowError;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU32;

    struct FakeApi {
        fetches: AtomicU32,
        fail: bool,
    }

    impl FakeApi {
        fn new() -> Arc<dyn TrackerApi> {
            Arc::new(Self {
                fetches: AtomicU32::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<dyn TrackerApi> {
            Arc::new(Self {
                fetches: AtomicU32::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl TrackerApi for FakeApi {
        async fn get_time_entry(&self, _: &str, _: &str) -> Result<Value> {
            unimplemented!()
        }
        async fn update_time_entry(&self, _: &str, _: &str, _: Value) -> Result<Value> {
            unimplemented!()
        }
        async fn get_tags(&self, _: &str) -> Result<Vec<Value>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChronoflowError::api(500, "boom"));
            }
            Ok(vec![json!({"id": "t1", "name": "Billable"})])
        }
        async fn create_tag(&self, _: &str, _: &str) -> Result<Value> {
            unimplemented!()
        }
        async fn get_projects(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![json!({"id": "p1", "name": "Website Redesign"})])
        }
        async fn get_clients(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![json!({"id": "c1", "name": "Acme Corp"})])
        }
        async fn get_users(&self, _: &str) -> Result<Vec<Value>> {
            Ok(vec![json!({"id": "u1", "name": "Dana"})])
        }
        async fn get_tasks(&self, _: &str, project_id: &str) -> Result<Vec<Value>> {
            assert_eq!(project_id, "p1");
            Ok(vec![json!({"id": "task1", "name": "Wireframes"})])
        }
        async fn request(&self, _: HttpMethod, _: &str, _: Option<String>) -> Result<ApiResponse> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_lookups_are_normalized() {
        let cache = DirectoryCache::new(2);
        let api = FakeApi::new();
        let snapshot = cache.get(&api, "ws1").await.unwrap();

        assert_eq!(snapshot.tag_id_by_name("  BILLABLE "), Some("t1"));
        assert_eq!(snapshot.project_id_by_name("website redesign"), Some("p1"));
        assert_eq!(snapshot.client_id_by_name("acme corp"), Some("c1"));
        assert_eq!(snapshot.user_id_by_name("dana"), Some("u1"));
        assert_eq!(snapshot.task_id("Website Redesign", "wireframes"), Some("task1"));
        assert_eq!(snapshot.task_id_any_project("WIREFRAMES"), Some("task1"));
        assert_eq!(snapshot.task_name_by_id("task1"), Some("Wireframes"));
        assert_eq!(snapshot.tag_id_by_name("missing"), None);
    }

    #[tokio::test]
    async fn test_second_get_served_from_cache() {
        let cache = DirectoryCache::new(2);
        let api = FakeApi::new();
        let first = cache.get(&api, "ws1").await.unwrap();
        let second = cache.get(&api, "ws1").await.unwrap();
        assert_eq!(first.generation, second.generation);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let cache = DirectoryCache::new(2);
        let api = FakeApi::new();
        let before = cache.get(&api, "ws1").await.unwrap();

        let broken = FakeApi::failing();
        assert!(cache.refresh(&broken, "ws1").await.is_err());

        let after = cache.get(&api, "ws1").await.unwrap();
        assert_eq!(before.generation, after.generation);
        assert_eq!(after.tag_id_by_name("billable"), Some("t1"));
    }

    #[tokio::test]
    async fn test_refresh_bumps_generation() {
        let cache = DirectoryCache::new(2);
        let api = FakeApi::new();
        let before = cache.get(&api, "ws1").await.unwrap();
        let after = cache.refresh(&api, "ws1").await.unwrap();
        assert!(after.generation > before.generation);
    }

    #[tokio::test]
    async fn test_refresh_async_swaps_in_background() {
        let cache = Arc::new(DirectoryCache::new(2));
        let api = FakeApi::new();
        let before = cache.get(&api, "ws1").await.unwrap();

        cache.refresh_async(api.clone(), "ws1".into());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let after = cache.get(&api, "ws1").await.unwrap();
        assert!(after.generation > before.generation);
    }

    #[tokio::test]
    async fn test_note_tag_extends_current_snapshot() {
        let cache = DirectoryCache::new(2);
        let api = FakeApi::new();
        cache.get(&api, "ws1").await.unwrap();

        cache.note_tag("ws1", "t2", "Urgent").await;
        let snapshot = cache.get(&api, "ws1").await.unwrap();
        assert_eq!(snapshot.tag_id_by_name("urgent"), Some("t2"));
        assert_eq!(snapshot.tag_id_by_name("billable"), Some("t1"));
    }
}
