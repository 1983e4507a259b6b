use std::time::Duration;

/// How row edits are grouped before a new table snapshot is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    /// Each statement flushes its editor when it completes.
    #[default]
    Statement,
    /// Editors stay open across statements until an explicit flush.
    Batched,
}

/// Runtime configuration for a database handle and its replication pipeline.
#[derive(Debug, Clone)]
pub struct SnapConfig {
    pub edit_mode: EditMode,
    /// Materialize lookup rows on the worker pool instead of the calling thread.
    pub parallel_lookup_enabled: bool,
    pub lookup_worker_threads: usize,
    pub lookup_buffer_rows: usize,
    pub replication_queue_capacity: usize,
    pub replication_flush_interval_ms: u64,
    pub fail_fast_replication_config: bool,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            edit_mode: EditMode::Statement,
            parallel_lookup_enabled: true,
            lookup_worker_threads: std::thread::available_parallelism()
                .map(|n| n.get().max(2))
                .unwrap_or(4),
            lookup_buffer_rows: 1024,
            replication_queue_capacity: 2048,
            replication_flush_interval_ms: 500,
            fail_fast_replication_config: false,
        }
    }
}

impl SnapConfig {
    /// Sequential lookups and batched editing, for embedded single-session use.
    pub fn low_latency() -> Self {
        Self {
            edit_mode: EditMode::Batched,
            parallel_lookup_enabled: false,
            replication_flush_interval_ms: 100,
            ..Self::default()
        }
    }

    /// Misconfigured replication aborts setup instead of degrading to logging.
    pub fn durable_replication() -> Self {
        Self {
            fail_fast_replication_config: true,
            ..Self::default()
        }
    }

    pub fn with_edit_mode(mut self, edit_mode: EditMode) -> Self {
        self.edit_mode = edit_mode;
        self
    }

    pub fn with_lookup_workers(mut self, workers: usize) -> Self {
        self.lookup_worker_threads = workers.max(1);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.replication_flush_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.replication_flush_interval_ms.max(1))
    }
}

/// Replication settings sampled on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplicationConfig {
    /// Name of the remote to push to; empty disables replication.
    pub remote: String,
    pub async_mode: bool,
}

impl ReplicationConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.remote.trim().is_empty()
    }
}
