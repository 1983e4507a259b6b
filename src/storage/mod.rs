pub mod address;
pub mod chunks;
pub mod commit_store;
pub mod ordered_map;
pub mod root;
pub mod tuple;

pub use address::Address;
pub use commit_store::{CommitStore, MemoryCommitStore};
pub use ordered_map::OrderedMap;
pub use root::{RootRef, RootSnapshot, RootSnapshotProvider};
pub use tuple::{Tag, Tuple};
