pub mod sysvars;

pub use sysvars::{REPLICATE_TO_REMOTE, REPLICATION_ASYNC, SysVarValue, SystemVariables};

use crate::config::{ReplicationConfig, SnapConfig};
use crate::error::{SnapError, SnapErrorCode};
use crate::replication::{
    AsyncReplicationCoordinator, HeadUpdate, RemoteDatabase, RemoteResolver, ReplicationHandle,
    push_head,
};
use crate::storage::address::Address;
use crate::storage::commit_store::CommitStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Source of the replication settings, sampled on every commit.
pub trait ReplicationConfigProvider: Send + Sync {
    fn replication_config(&self) -> Result<ReplicationConfig, SnapError>;
}

/// What a hook is told about a commit.
#[derive(Clone)]
pub struct CommitEvent {
    pub dataset: String,
    /// New head, or `None` when the dataset was deleted.
    pub head: Option<Address>,
    pub source: Arc<dyn CommitStore>,
}

impl CommitEvent {
    fn head_update(&self) -> HeadUpdate {
        HeadUpdate {
            dataset: self.dataset.clone(),
            head: self.head,
            source: Arc::clone(&self.source),
        }
    }
}

pub type DiagnosticSink = Arc<Mutex<Vec<String>>>;

/// Pushes every commit to a remote before the hook returns.
pub struct PushOnWriteHook {
    remote: Arc<dyn RemoteDatabase>,
    last_error: Mutex<Option<String>>,
    failures: AtomicU64,
}

impl PushOnWriteHook {
    pub fn new(remote: Arc<dyn RemoteDatabase>) -> Self {
        Self {
            remote,
            last_error: Mutex::new(None),
            failures: AtomicU64::new(0),
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    async fn execute(&self, event: &CommitEvent) -> Result<(), SnapError> {
        push_head(
            Arc::clone(&self.remote),
            Arc::clone(&event.source),
            event.dataset.clone(),
            event.head,
        )
        .await
    }

    fn handle_error(&self, err: &SnapError) {
        debug!(remote = self.remote.name(), "recording push failure");
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(err.to_string());
    }
}

/// Hands commits to a replication coordinator.
pub struct AsyncPushOnWriteHook {
    handle: ReplicationHandle,
}

impl AsyncPushOnWriteHook {
    pub fn new(handle: ReplicationHandle) -> Self {
        Self { handle }
    }

    async fn execute(&self, event: &CommitEvent) -> Result<(), SnapError> {
        self.handle.enqueue(event.head_update()).await
    }

    fn handle_error(&self, err: &SnapError) {
        debug!(error = %err, "async replication enqueue failed");
    }
}

/// Records commits as tracing events and, optionally, sink lines.
#[derive(Default)]
pub struct LogHook {
    sink: Option<DiagnosticSink>,
    note: Option<String>,
}

impl LogHook {
    pub fn new(sink: Option<DiagnosticSink>) -> Self {
        Self { sink, note: None }
    }

    /// A note prefixed to every line, e.g. why replication is off.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn execute(&self, event: &CommitEvent) {
        let head = event
            .head
            .map(|h| h.to_hex())
            .unwrap_or_else(|| "deleted".to_string());
        info!(dataset = %event.dataset, head = %head, note = ?self.note, "commit");
        if let Some(sink) = &self.sink {
            let line = match &self.note {
                Some(note) => format!("{note}: {} -> {head}", event.dataset),
                None => format!("{} -> {head}", event.dataset),
            };
            sink.lock().push(line);
        }
    }
}

#[derive(Default)]
struct DynamicState {
    /// Config the current target was built from; `None` until resolved.
    current: Option<ReplicationConfig>,
    push: Option<Arc<PushOnWriteHook>>,
    coordinator: Option<AsyncReplicationCoordinator>,
}

enum Target {
    Disabled,
    Sync(Arc<PushOnWriteHook>),
    Async(ReplicationHandle),
}

/// Re-reads the replication settings on every commit and routes to a sync
/// push or an async coordinator accordingly.
pub struct DynamicHook {
    provider: Arc<dyn ReplicationConfigProvider>,
    resolver: Arc<dyn RemoteResolver>,
    config: SnapConfig,
    state: Mutex<DynamicState>,
}

impl DynamicHook {
    pub fn new(
        provider: Arc<dyn ReplicationConfigProvider>,
        resolver: Arc<dyn RemoteResolver>,
        config: SnapConfig,
    ) -> Self {
        Self {
            provider,
            resolver,
            config,
            state: Mutex::new(DynamicState::default()),
        }
    }

    /// Shuts down the coordinator started for async mode, if any.
    pub async fn shutdown(&self) -> Result<(), SnapError> {
        let coordinator = {
            let mut state = self.state.lock();
            state.current = None;
            state.push = None;
            state.coordinator.take()
        };
        match coordinator {
            Some(mut c) => c.shutdown().await,
            None => Ok(()),
        }
    }

    fn refresh(&self, config: &ReplicationConfig) -> Result<Target, SnapError> {
        let mut state = self.state.lock();
        if state.current.as_ref() != Some(config) {
            if let Some(mut old) = state.coordinator.take() {
                tokio::spawn(async move {
                    if let Err(e) = old.shutdown().await {
                        warn!(error = %e, "replaced replication coordinator failed to stop");
                    }
                });
            }
            state.push = None;
            state.current = None;
            if config.is_enabled() {
                let remote = self.resolver.resolve(config.remote.trim())?;
                info!(remote = remote.name(), async_mode = config.async_mode, "replication target changed");
                if config.async_mode {
                    state.coordinator = Some(AsyncReplicationCoordinator::spawn(remote, &self.config));
                } else {
                    state.push = Some(Arc::new(PushOnWriteHook::new(remote)));
                }
            }
            state.current = Some(config.clone());
        }
        if let Some(push) = &state.push {
            return Ok(Target::Sync(Arc::clone(push)));
        }
        if let Some(coordinator) = &state.coordinator {
            return Ok(Target::Async(coordinator.handle()));
        }
        Ok(Target::Disabled)
    }

    async fn execute(&self, event: &CommitEvent) -> Result<(), SnapError> {
        let config = self.provider.replication_config()?;
        match self.refresh(&config)? {
            Target::Disabled => Ok(()),
            Target::Sync(push) => push.execute(event).await,
            Target::Async(handle) => handle.enqueue(event.head_update()).await,
        }
    }

    /// Failures of the current sync target, zero in async or disabled mode.
    pub fn sync_failures(&self) -> u64 {
        self.state.lock().push.as_ref().map_or(0, |p| p.failures())
    }

    fn handle_error(&self, err: &SnapError) {
        let push = self.state.lock().push.clone();
        match push {
            Some(push) => push.handle_error(err),
            None => debug!(error = %err, "replication hook failed"),
        }
    }
}

pub enum CommitHook {
    PushOnWrite(PushOnWriteHook),
    AsyncPushOnWrite(AsyncPushOnWriteHook),
    Log(LogHook),
    Dynamic(DynamicHook),
}

impl CommitHook {
    pub fn kind(&self) -> &'static str {
        match self {
            CommitHook::PushOnWrite(_) => "push_on_write",
            CommitHook::AsyncPushOnWrite(_) => "async_push_on_write",
            CommitHook::Log(_) => "log",
            CommitHook::Dynamic(_) => "dynamic",
        }
    }

    pub async fn execute(&self, event: &CommitEvent) -> Result<(), SnapError> {
        match self {
            CommitHook::PushOnWrite(h) => h.execute(event).await,
            CommitHook::AsyncPushOnWrite(h) => h.execute(event).await,
            CommitHook::Log(h) => {
                h.execute(event);
                Ok(())
            }
            CommitHook::Dynamic(h) => h.execute(event).await,
        }
    }

    pub fn handle_error(&self, err: &SnapError) {
        match self {
            CommitHook::PushOnWrite(h) => h.handle_error(err),
            CommitHook::AsyncPushOnWrite(h) => h.handle_error(err),
            CommitHook::Log(_) => debug!(error = %err, "log hook failed"),
            CommitHook::Dynamic(h) => h.handle_error(err),
        }
    }

    pub async fn shutdown(&self) -> Result<(), SnapError> {
        match self {
            CommitHook::Dynamic(h) => h.shutdown().await,
            _ => Ok(()),
        }
    }
}

/// Hooks run after every commit, in registration order.
#[derive(Default)]
pub struct CommitHookPipeline {
    hooks: Vec<CommitHook>,
}

impl CommitHookPipeline {
    pub fn new(hooks: Vec<CommitHook>) -> Self {
        Self { hooks }
    }

    pub fn push(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn hooks(&self) -> &[CommitHook] {
        &self.hooks
    }

    /// Runs every hook. Each failure is warned about once here, then handed
    /// to the hook's error handler; it never fails the commit. Returns the
    /// number of failed hooks.
    pub async fn run(&self, event: &CommitEvent) -> usize {
        let mut failed = 0;
        for hook in &self.hooks {
            if let Err(e) = hook.execute(event).await {
                failed += 1;
                warn!(hook = hook.kind(), dataset = %event.dataset, error = %e, "commit hook failed");
                hook.handle_error(&e);
            }
        }
        failed
    }

    pub async fn shutdown(&self) -> Result<(), SnapError> {
        for hook in &self.hooks {
            hook.shutdown().await?;
        }
        Ok(())
    }
}

/// Builds the replication hooks for a database.
///
/// A misconfiguration degrades to a log hook carrying the reason, unless
/// `fail_fast_replication_config` is set.
pub fn replication_hooks(
    config: &SnapConfig,
    provider: Arc<dyn ReplicationConfigProvider>,
    resolver: Arc<dyn RemoteResolver>,
    sink: Option<DiagnosticSink>,
) -> Result<Vec<CommitHook>, SnapError> {
    let checked = provider.replication_config().and_then(|cfg| {
        if cfg.is_enabled() {
            resolver.resolve(cfg.remote.trim()).map(|_| cfg)
        } else {
            Ok(cfg)
        }
    });
    match checked {
        Ok(_) => Ok(vec![CommitHook::Dynamic(DynamicHook::new(
            provider,
            resolver,
            config.clone(),
        ))]),
        Err(e) if e.code() == SnapErrorCode::ReplicationConfig && !config.fail_fast_replication_config => {
            warn!(error = %e, "replication disabled");
            Ok(vec![CommitHook::Log(
                LogHook::new(sink).with_note(format!("replication disabled ({e})")),
            )])
        }
        Err(e) => Err(e),
    }
}
