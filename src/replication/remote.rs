use crate::error::{ResourceType, SnapError, SnapErrorCode};
use crate::storage::address::Address;
use crate::storage::commit_store::{CommitStore, MemoryCommitStore};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// A peer database that committed heads are pushed to.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// Copies every chunk reachable from `head` that the remote lacks.
    /// Returns the number of chunks transferred.
    async fn pull_chunks(&self, source: Arc<dyn CommitStore>, head: Address)
    -> Result<usize, SnapError>;

    async fn set_head(&self, dataset: &str, head: Address) -> Result<(), SnapError>;

    async fn delete_dataset(&self, dataset: &str) -> Result<(), SnapError>;

    async fn head(&self, dataset: &str) -> Result<Option<Address>, SnapError>;
}

/// Looks up remotes by configured name.
pub trait RemoteResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Arc<dyn RemoteDatabase>, SnapError>;
}

#[derive(Default)]
pub struct RemoteRegistry {
    remotes: RwLock<HashMap<String, Arc<dyn RemoteDatabase>>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, remote: Arc<dyn RemoteDatabase>) -> Result<(), SnapError> {
        let mut remotes = self.remotes.write();
        let name = remote.name().to_string();
        if remotes.contains_key(&name) {
            return Err(SnapError::already_exists(ResourceType::Remote, name));
        }
        remotes.insert(name, remote);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn RemoteDatabase>> {
        self.remotes.write().remove(name)
    }
}

impl RemoteResolver for RemoteRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<dyn RemoteDatabase>, SnapError> {
        self.remotes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SnapError::ReplicationConfig(format!("remote '{name}' not found")))
    }
}

/// Pushes one head: a missing head deletes the dataset remotely, otherwise
/// chunks are pulled across before the remote head moves.
pub async fn push_head(
    remote: Arc<dyn RemoteDatabase>,
    source: Arc<dyn CommitStore>,
    dataset: String,
    head: Option<Address>,
) -> Result<(), SnapError> {
    match head {
        None => remote.delete_dataset(&dataset).await,
        Some(head) => {
            let copied = remote.pull_chunks(source, head).await?;
            remote.set_head(&dataset, head).await?;
            debug!(remote = remote.name(), dataset = %dataset, head = %head, copied, "pushed head");
            Ok(())
        }
    }
}

/// In-process remote backed by its own commit store.
pub struct MemoryRemote {
    name: String,
    store: MemoryCommitStore,
    fail_next: AtomicUsize,
    latency: Mutex<Duration>,
    head_updates: AtomicU64,
    deletes: AtomicU64,
    history: Mutex<Vec<(String, Option<Address>)>>,
}

impl MemoryRemote {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: MemoryCommitStore::new(),
            fail_next: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            head_updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `n` chunk pulls fail with a remote error.
    pub fn fail_next_pushes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn head_updates(&self) -> u64 {
        self.head_updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Every head change applied, in order; `None` marks a delete.
    pub fn history(&self) -> Vec<(String, Option<Address>)> {
        self.history.lock().clone()
    }

    pub fn store(&self) -> &MemoryCommitStore {
        &self.store
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteDatabase for MemoryRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull_chunks(
        &self,
        source: Arc<dyn CommitStore>,
        head: Address,
    ) -> Result<usize, SnapError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(SnapError::Remote(format!(
                "remote '{}' rejected chunks for {head}",
                self.name
            )));
        }
        // Children land before their parents, so a held chunk implies its
        // whole subgraph is held too.
        let missing = source.missing_chunks(&head, &|addr| self.store.has_chunk(addr))?;
        for addr in &missing {
            let chunk = source
                .get_chunk(addr)?
                .ok_or_else(|| SnapError::not_found(ResourceType::Chunk, addr.to_hex()))?;
            self.store.put_chunk(chunk)?;
        }
        Ok(missing.len())
    }

    async fn set_head(&self, dataset: &str, head: Address) -> Result<(), SnapError> {
        self.store.set_head(dataset, head)?;
        self.head_updates.fetch_add(1, Ordering::SeqCst);
        self.history.lock().push((dataset.to_string(), Some(head)));
        Ok(())
    }

    async fn delete_dataset(&self, dataset: &str) -> Result<(), SnapError> {
        match self.store.delete_dataset(dataset) {
            Ok(()) => {}
            Err(e) if e.code() == SnapErrorCode::DatasetNotFound => {}
            Err(e) => return Err(e),
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.history.lock().push((dataset.to_string(), None));
        Ok(())
    }

    async fn head(&self, dataset: &str) -> Result<Option<Address>, SnapError> {
        self.store.resolve_commit_ref(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryRemote, RemoteDatabase, RemoteRegistry, RemoteResolver, push_head};
    use crate::catalog::schema::{Column, Schema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::error::SnapErrorCode;
    use crate::storage::commit_store::{CommitStore, MemoryCommitStore};
    use crate::storage::root::RootSnapshot;
    use crate::table::TableSnapshot;
    use std::sync::Arc;

    fn store_with_commit() -> (Arc<dyn CommitStore>, crate::storage::Address) {
        let store: Arc<dyn CommitStore> = Arc::new(MemoryCommitStore::new());
        let table = TableSnapshot::new(
            Schema::new(vec![Column::new("id", 1, ColumnType::Integer).primary_key()])
                .expect("schema"),
        )
        .expect("table");
        let head = store
            .commit_root("main", &RootSnapshot::new().with_table("t", table), "init")
            .expect("commit");
        (store, head)
    }

    #[tokio::test]
    async fn push_copies_chunks_then_moves_head() {
        let (source, head) = store_with_commit();
        let remote = Arc::new(MemoryRemote::new("origin"));
        push_head(remote.clone(), source.clone(), "main".into(), Some(head))
            .await
            .expect("push");
        assert_eq!(remote.head("main").await.expect("head"), Some(head));
        assert_eq!(remote.store().chunk_count(), 3);

        let copied = remote.pull_chunks(source.clone(), head).await.expect("pull");
        assert_eq!(copied, 0);

        push_head(remote.clone(), source, "main".into(), None)
            .await
            .expect("delete");
        assert_eq!(remote.head("main").await.expect("head"), None);
        assert_eq!(remote.deletes(), 1);
    }

    #[tokio::test]
    async fn later_pushes_copy_only_new_chunks() {
        let (source, first) = store_with_commit();
        let remote = Arc::new(MemoryRemote::new("origin"));
        assert_eq!(remote.pull_chunks(source.clone(), first).await.expect("pull"), 3);

        let table = TableSnapshot::new(
            Schema::new(vec![Column::new("id", 1, ColumnType::Integer).primary_key()])
                .expect("schema"),
        )
        .expect("table")
        .insert_row("t", Row::from_values(vec![Value::Integer(7)]))
        .expect("insert");
        let second = source
            .commit_root("main", &RootSnapshot::new().with_table("t", table), "next")
            .expect("commit");
        assert_eq!(remote.pull_chunks(source.clone(), second).await.expect("pull"), 3);
        assert_eq!(remote.store().chunk_count(), 6);
    }

    #[tokio::test]
    async fn injected_failure_leaves_head_unchanged() {
        let (source, head) = store_with_commit();
        let remote = Arc::new(MemoryRemote::new("origin"));
        remote.fail_next_pushes(1);
        let err = push_head(remote.clone(), source.clone(), "main".into(), Some(head))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(remote.head_updates(), 0);
        push_head(remote.clone(), source, "main".into(), Some(head))
            .await
            .expect("retry");
        assert_eq!(remote.head_updates(), 1);
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_names() {
        let registry = RemoteRegistry::new();
        registry
            .register(Arc::new(MemoryRemote::new("origin")))
            .expect("register");
        let err = registry
            .register(Arc::new(MemoryRemote::new("origin")))
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::RemoteAlreadyExists);
        assert!(registry.resolve("origin").is_ok());
        let err = registry.resolve("backup").err().expect("unknown remote");
        assert_eq!(err.code(), SnapErrorCode::ReplicationConfig);
    }
}
