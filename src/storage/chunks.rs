use crate::error::SnapError;
use crate::storage::address::{Address, decode, encode};
use crate::table::TableSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table name to table-chunk address; the persisted form of a root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootManifest {
    pub tables: BTreeMap<String, Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub root: Address,
    pub parent: Option<Address>,
    pub message: String,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkValue {
    Table(TableSnapshot),
    Root(RootManifest),
    Commit(CommitMeta),
}

impl ChunkValue {
    /// Addresses this value points at.
    pub fn refs(&self) -> Vec<Address> {
        match self {
            ChunkValue::Table(_) => Vec::new(),
            ChunkValue::Root(manifest) => manifest.tables.values().copied().collect(),
            ChunkValue::Commit(meta) => {
                let mut out = vec![meta.root];
                out.extend(meta.parent);
                out
            }
        }
    }
}

/// An encoded, content-addressed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    data: Arc<Vec<u8>>,
}

impl Chunk {
    pub fn encode(value: &ChunkValue) -> Result<Self, SnapError> {
        let data = encode(value)?;
        Ok(Self {
            address: Address::of(&data),
            data: Arc::new(data),
        })
    }

    /// Wraps received bytes, rejecting them if they do not hash to `address`.
    pub fn from_bytes(address: Address, data: Vec<u8>) -> Result<Self, SnapError> {
        let actual = Address::of(&data);
        if actual != address {
            return Err(SnapError::Decode(format!(
                "chunk {address} hashes to {actual}"
            )));
        }
        Ok(Self {
            address,
            data: Arc::new(data),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn decode(&self) -> Result<ChunkValue, SnapError> {
        decode(&self.data)
    }
}
