//! In-memory stores and log bus.
//!
//! Used by tests and single-process development runs. Nothing here
//! survives a restart.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future;
use futures::stream::BoxStream;
use kiln_core::logs::LogBus;
use kiln_core::secret::SecretStore;
use kiln_core::store::{BuildStore, ProjectStore};
use kiln_core::{Build, BuildStatus, Error, Project, ResourceId, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

fn poisoned<T>(_: T) -> Error {
    Error::Internal("in-memory store lock poisoned".to_string())
}

/// Build store backed by a map. Every `mark_running` and `update` is also
/// appended to a history so tests can check the order transitions were persisted in.
#[derive(Default)]
pub struct MemoryBuildStore {
    builds: RwLock<HashMap<ResourceId, Build>>,
    history: Mutex<Vec<Build>>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted snapshots, oldest first.
    pub fn history(&self) -> Vec<Build> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn create(&self, build: &Build) -> Result<()> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        if builds.contains_key(&build.id) {
            return Err(Error::Conflict(format!("build {}", build.id)));
        }
        builds.insert(build.id, build.clone());
        Ok(())
    }

    async fn mark_running(&self, id: ResourceId, started_at: DateTime<Utc>) -> Result<()> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        let existing = builds
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("build {id}")))?;
        if existing.status != BuildStatus::Pending {
            return Err(Error::Conflict(format!(
                "build {id} is {}, not PENDING",
                existing.status
            )));
        }
        existing.status = BuildStatus::Running;
        existing.started_at = Some(started_at);
        self.history.lock().map_err(poisoned)?.push(existing.clone());
        Ok(())
    }

    async fn update(&self, build: &Build) -> Result<()> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        match builds.get_mut(&build.id) {
            Some(existing) => *existing = build.clone(),
            None => return Err(Error::NotFound(format!("build {}", build.id))),
        }
        self.history.lock().map_err(poisoned)?.push(build.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: ResourceId) -> Result<Option<Build>> {
        Ok(self.builds.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn list_by_project(&self, project_id: ResourceId) -> Result<Vec<Build>> {
        let builds = self.builds.read().map_err(poisoned)?;
        let mut list: Vec<Build> = builds
            .values()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }
}

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<ResourceId, Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) -> Result<()> {
        self.projects
            .write()
            .map_err(poisoned)?
            .insert(project.id, project);
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_by_id(&self, id: ResourceId) -> Result<Option<Project>> {
        Ok(self.projects.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn get_by_github_repo_id(&self, github_repo_id: &str) -> Result<Option<Project>> {
        Ok(self
            .projects
            .read()
            .map_err(poisoned)?
            .values()
            .find(|p| p.github_repo_id.as_deref() == Some(github_repo_id))
            .cloned())
    }
}

/// Plaintext secrets per project.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<ResourceId, BTreeMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &self,
        project_id: ResourceId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.secrets
            .write()
            .map_err(poisoned)?
            .entry(project_id)
            .or_default()
            .insert(name.into(), value.into());
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn list_by_project(&self, project_id: ResourceId) -> Result<BTreeMap<String, String>> {
        Ok(self
            .secrets
            .read()
            .map_err(poisoned)?
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Log bus over per-channel tokio broadcast channels.
#[derive(Default)]
pub struct MemoryLogBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryLogBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> Result<MutexGuard<'_, HashMap<String, broadcast::Sender<Bytes>>>> {
        self.channels.lock().map_err(poisoned)
    }
}

#[async_trait]
impl LogBus for MemoryLogBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut channels = self.channels()?;
        if let Some(tx) = channels.get(channel) {
            if tx.send(payload).is_err() {
                // Last listener went away.
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Bytes>> {
        let rx = self
            .channels()?
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|r| future::ready(r.ok()));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_missing_build_is_none() {
        let store = MemoryBuildStore::new();
        assert!(store.get_by_id(ResourceId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_build_fails() {
        let store = MemoryBuildStore::new();
        let build = Build::new(ResourceId::new(), "a", "b", "main");
        assert!(matches!(store.update(&build).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_records_history() {
        let store = MemoryBuildStore::new();
        let mut build = Build::new(ResourceId::new(), "a", "b", "main");
        store.create(&build).await.unwrap();

        build.start(Utc::now()).unwrap();
        store.mark_running(build.id, build.started_at.unwrap()).await.unwrap();
        build.finish(BuildStatus::Success, Utc::now()).unwrap();
        store.update(&build).await.unwrap();

        let statuses: Vec<_> = store.history().iter().map(|b| b.status).collect();
        assert_eq!(statuses, vec![BuildStatus::Running, BuildStatus::Success]);
        let stored = store.get_by_id(build.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BuildStatus::Success);
    }

    #[tokio::test]
    async fn test_mark_running_only_once() {
        let store = MemoryBuildStore::new();
        let build = Build::new(ResourceId::new(), "a", "b", "main");
        store.create(&build).await.unwrap();

        store.mark_running(build.id, Utc::now()).await.unwrap();
        let second = store.mark_running(build.id, Utc::now()).await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        let stored = store.get_by_id(build.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BuildStatus::Running);
        assert!(stored.started_at.is_some());
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_running_unknown_build_fails() {
        let store = MemoryBuildStore::new();
        let result = store.mark_running(ResourceId::new(), Utc::now()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_project_newest_first() {
        let store = MemoryBuildStore::new();
        let project_id = ResourceId::new();
        let mut older = Build::new(project_id, "1", "first", "main");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = Build::new(project_id, "2", "second", "main");
        let other = Build::new(ResourceId::new(), "3", "elsewhere", "main");
        for b in [&older, &newer, &other] {
            store.create(b).await.unwrap();
        }

        let list = store.list_by_project(project_id).await.unwrap();
        let hashes: Vec<_> = list.iter().map(|b| b.commit_hash.as_str()).collect();
        assert_eq!(hashes, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_project_lookup_by_github_id() {
        let store = MemoryProjectStore::new();
        let mut project = Project::new("kiln", "https://github.com/acme/kiln.git");
        project.github_repo_id = Some("4242".to_string());
        store.insert(project.clone()).unwrap();

        let found = store.get_by_github_repo_id("4242").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(project.id));
        assert!(store.get_by_github_repo_id("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secrets_are_scoped_to_project() {
        let store = MemorySecretStore::new();
        let project = ResourceId::new();
        store.set(project, "TOKEN", "old").unwrap();
        store.set(project, "TOKEN", "new").unwrap();

        let secrets = store.list_by_project(project).await.unwrap();
        assert_eq!(secrets.get("TOKEN").map(String::as_str), Some("new"));
        assert!(store.list_by_project(ResourceId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_bus_delivers_only_to_its_channel() {
        let bus = MemoryLogBus::new();
        let mut a = bus.subscribe("logs:a").await.unwrap();
        let mut b = bus.subscribe("logs:b").await.unwrap();

        bus.publish("logs:a", Bytes::from_static(b"hello")).await.unwrap();
        bus.publish("logs:b", Bytes::from_static(b"world")).await.unwrap();

        assert_eq!(a.next().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(b.next().await.unwrap(), Bytes::from_static(b"world"));
    }

    #[tokio::test]
    async fn test_publish_without_listeners_is_ok() {
        let bus = MemoryLogBus::new();
        bus.publish("logs:nobody", Bytes::from_static(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = MemoryLogBus::new();
        let _early = bus.subscribe("logs:c").await.unwrap();
        bus.publish("logs:c", Bytes::from_static(b"before")).await.unwrap();

        let mut late = bus.subscribe("logs:c").await.unwrap();
        bus.publish("logs:c", Bytes::from_static(b"after")).await.unwrap();
        assert_eq!(late.next().await.unwrap(), Bytes::from_static(b"after"));
    }
}
