pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod hooks;
pub mod index;
pub mod replication;
pub mod storage;
pub mod table;

pub use catalog::{ColumnType, Row, Value};
pub use config::{EditMode, ReplicationConfig, SnapConfig};
pub use database::{Database, TableState};
pub use error::{ResourceType, SnapError, SnapErrorCode};
pub use hooks::{
    CommitEvent, CommitHook, CommitHookPipeline, ReplicationConfigProvider, SystemVariables,
    replication_hooks,
};
pub use index::{ColumnRange, Index, IndexLookup, LookupRowIter, Partition, SqlRange};
pub use replication::{AsyncReplicationCoordinator, MemoryRemote, RemoteDatabase, RemoteRegistry};
pub use storage::{Address, CommitStore, MemoryCommitStore, RootRef, RootSnapshot, Tag};
pub use table::{Table, TableSnapshot};
