use crate::error::{ResourceType, SnapError};
use crate::storage::address::Address;
use crate::storage::chunks::{Chunk, ChunkValue, CommitMeta, RootManifest};
use crate::storage::root::RootSnapshot;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Content-addressed commit graph with named dataset heads.
pub trait CommitStore: Send + Sync {
    fn get_chunk(&self, address: &Address) -> Result<Option<Chunk>, SnapError>;

    fn put_chunk(&self, chunk: Chunk) -> Result<(), SnapError>;

    fn resolve_commit_ref(&self, dataset: &str) -> Result<Option<Address>, SnapError>;

    fn set_head(&self, dataset: &str, head: Address) -> Result<(), SnapError>;

    /// Removes a dataset's head. Unknown datasets are `NotFound`.
    fn delete_dataset(&self, dataset: &str) -> Result<(), SnapError>;

    fn resolve_working_set(&self, dataset: &str) -> Result<Option<RootSnapshot>, SnapError>;

    fn set_working_set(&self, dataset: &str, root: &RootSnapshot) -> Result<(), SnapError>;

    fn datasets(&self) -> Result<Vec<String>, SnapError>;

    fn has_chunk(&self, address: &Address) -> Result<bool, SnapError> {
        Ok(self.get_chunk(address)?.is_some())
    }

    fn load_chunk(&self, address: &Address) -> Result<ChunkValue, SnapError> {
        self.get_chunk(address)?
            .ok_or_else(|| SnapError::not_found(ResourceType::Chunk, address.to_hex()))?
            .decode()
    }

    /// Writes every table chunk and the root manifest; returns the root address.
    fn write_root(&self, root: &RootSnapshot) -> Result<Address, SnapError> {
        let mut manifest = RootManifest::default();
        for (name, table) in root.tables() {
            let chunk = Chunk::encode(&ChunkValue::Table(table.clone()))?;
            manifest.tables.insert(name.clone(), chunk.address());
            self.put_chunk(chunk)?;
        }
        let chunk = Chunk::encode(&ChunkValue::Root(manifest))?;
        let address = chunk.address();
        self.put_chunk(chunk)?;
        Ok(address)
    }

    fn load_root(&self, address: &Address) -> Result<RootSnapshot, SnapError> {
        let ChunkValue::Root(manifest) = self.load_chunk(address)? else {
            return Err(SnapError::Decode(format!("chunk {address} is not a root")));
        };
        let mut tables = im::OrdMap::new();
        for (name, table_addr) in manifest.tables {
            let ChunkValue::Table(table) = self.load_chunk(&table_addr)? else {
                return Err(SnapError::Decode(format!(
                    "chunk {table_addr} for table '{name}' is not a table"
                )));
            };
            tables.insert(name, table);
        }
        Ok(RootSnapshot::from_tables(tables))
    }

    fn write_commit(
        &self,
        root: Address,
        parent: Option<Address>,
        message: &str,
    ) -> Result<Address, SnapError> {
        let height = match parent {
            Some(p) => self.load_commit(&p)?.height + 1,
            None => 1,
        };
        let chunk = Chunk::encode(&ChunkValue::Commit(CommitMeta {
            root,
            parent,
            message: message.to_string(),
            height,
        }))?;
        let address = chunk.address();
        self.put_chunk(chunk)?;
        Ok(address)
    }

    fn load_commit(&self, address: &Address) -> Result<CommitMeta, SnapError> {
        match self.load_chunk(address)? {
            ChunkValue::Commit(meta) => Ok(meta),
            _ => Err(SnapError::Decode(format!("chunk {address} is not a commit"))),
        }
    }

    /// Persists `root` and advances `dataset` to a new commit on top of its
    /// current head.
    fn commit_root(
        &self,
        dataset: &str,
        root: &RootSnapshot,
        message: &str,
    ) -> Result<Address, SnapError> {
        let root_addr = self.write_root(root)?;
        let parent = self.resolve_commit_ref(dataset)?;
        let commit = self.write_commit(root_addr, parent, message)?;
        self.set_head(dataset, commit)?;
        debug!(dataset, commit = %commit, "committed root");
        Ok(commit)
    }

    /// Every chunk address reachable from `head`, `head` first.
    fn reachable_chunks(&self, head: &Address) -> Result<Vec<Address>, SnapError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([*head]);
        while let Some(addr) = queue.pop_front() {
            if !seen.insert(addr) {
                continue;
            }
            let value = self.load_chunk(&addr)?;
            out.push(addr);
            queue.extend(value.refs());
        }
        Ok(out)
    }

    /// Chunks reachable from `head` that `held` does not report, children
    /// before the chunks that refer to them. The walk stops at held chunks,
    /// so a destination that only stores complete subgraphs is never
    /// re-walked below what it already has.
    fn missing_chunks(
        &self,
        head: &Address,
        held: &dyn Fn(&Address) -> Result<bool, SnapError>,
    ) -> Result<Vec<Address>, SnapError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![(*head, false)];
        while let Some((addr, expanded)) = stack.pop() {
            if expanded {
                out.push(addr);
                continue;
            }
            if !seen.insert(addr) || held(&addr)? {
                continue;
            }
            let value = self.load_chunk(&addr)?;
            stack.push((addr, true));
            stack.extend(value.refs().into_iter().map(|r| (r, false)));
        }
        Ok(out)
    }
}

#[derive(Default)]
struct MemoryState {
    chunks: HashMap<Address, Chunk>,
    heads: BTreeMap<String, Address>,
    working: HashMap<String, RootSnapshot>,
}

/// In-process commit store.
#[derive(Default)]
pub struct MemoryCommitStore {
    state: RwLock<MemoryState>,
}

impl MemoryCommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }
}

impl CommitStore for MemoryCommitStore {
    fn get_chunk(&self, address: &Address) -> Result<Option<Chunk>, SnapError> {
        Ok(self.state.read().chunks.get(address).cloned())
    }

    fn put_chunk(&self, chunk: Chunk) -> Result<(), SnapError> {
        self.state
            .write()
            .chunks
            .entry(chunk.address())
            .or_insert(chunk);
        Ok(())
    }

    fn resolve_commit_ref(&self, dataset: &str) -> Result<Option<Address>, SnapError> {
        Ok(self.state.read().heads.get(dataset).copied())
    }

    fn set_head(&self, dataset: &str, head: Address) -> Result<(), SnapError> {
        let mut state = self.state.write();
        if !state.chunks.contains_key(&head) {
            return Err(SnapError::not_found(ResourceType::Chunk, head.to_hex()));
        }
        state.heads.insert(dataset.to_string(), head);
        Ok(())
    }

    fn delete_dataset(&self, dataset: &str) -> Result<(), SnapError> {
        let mut state = self.state.write();
        state.working.remove(dataset);
        state
            .heads
            .remove(dataset)
            .map(|_| ())
            .ok_or_else(|| SnapError::not_found(ResourceType::Dataset, dataset))
    }

    fn resolve_working_set(&self, dataset: &str) -> Result<Option<RootSnapshot>, SnapError> {
        Ok(self.state.read().working.get(dataset).cloned())
    }

    fn set_working_set(&self, dataset: &str, root: &RootSnapshot) -> Result<(), SnapError> {
        self.state
            .write()
            .working
            .insert(dataset.to_string(), root.clone());
        Ok(())
    }

    fn datasets(&self) -> Result<Vec<String>, SnapError> {
        Ok(self.state.read().heads.keys().cloned().collect())
    }
}
