pub mod coordinator;
pub mod remote;

pub use coordinator::{
    AsyncReplicationCoordinator, CoordinatorHealth, HeadUpdate, ReplicationHandle,
    ReplicationStats, ReplicationStatsSnapshot,
};
pub use remote::{
    MemoryRemote, RemoteDatabase, RemoteRegistry, RemoteResolver, push_head,
};
