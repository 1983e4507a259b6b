pub mod iter;
pub mod lookup;
pub mod parallel;
pub mod range;

use crate::catalog::schema::{IndexDef, Schema};
use crate::catalog::types::ColumnType;
use crate::error::SnapError;
use crate::storage::tuple::Tag;
pub use iter::{
    CoveringIndexIter, EntryFetcher, IndexLookupIter, LookupRowIter, LookupStats,
    PrimaryRowFetcher, RowFetcher,
};
pub use lookup::{IndexLookup, Partition, RangeScan};
pub use parallel::ParallelRowIter;
pub use range::{ColumnRange, NativeRange, RangeCheck, RangeType, SqlRange};

/// Which ordered map holds an index's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStorage {
    Primary,
    Secondary(String),
}

/// A concrete index of one table, ready to translate range predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    table: String,
    def: IndexDef,
    storage: IndexStorage,
    key_tags: Vec<Tag>,
    pk_tags: Vec<Tag>,
    types: Vec<ColumnType>,
}

impl Index {
    pub fn primary(table: &str, schema: &Schema) -> Result<Self, SnapError> {
        Self::build(table, schema, schema.primary_index(), IndexStorage::Primary)
    }

    pub fn secondary(table: &str, schema: &Schema, def: &IndexDef) -> Result<Self, SnapError> {
        Self::build(
            table,
            schema,
            def.clone(),
            IndexStorage::Secondary(def.name.clone()),
        )
    }

    fn build(
        table: &str,
        schema: &Schema,
        def: IndexDef,
        storage: IndexStorage,
    ) -> Result<Self, SnapError> {
        let mut types = Vec::with_capacity(def.tags.len());
        for tag in &def.tags {
            let col = schema.column_by_tag(*tag).ok_or_else(|| {
                SnapError::InternalInvariantViolation(format!(
                    "index '{}' on '{table}' references unknown tag {tag}",
                    def.name
                ))
            })?;
            types.push(col.col_type);
        }
        let pk_tags = schema.pk_tags();
        Ok(Self {
            table: table.to_string(),
            key_tags: index_key_tags(&def.tags, &pk_tags),
            pk_tags,
            def,
            storage,
            types,
        })
    }

    pub fn id(&self) -> &str {
        &self.def.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    pub fn tags(&self) -> &[Tag] {
        &self.def.tags
    }

    /// Tags of the stored key: indexed columns, then the remaining PK columns.
    pub fn key_tags(&self) -> &[Tag] {
        &self.key_tags
    }

    pub fn pk_tags(&self) -> &[Tag] {
        &self.pk_tags
    }

    pub fn storage(&self) -> &IndexStorage {
        &self.storage
    }

    pub fn is_primary(&self) -> bool {
        self.storage == IndexStorage::Primary
    }

    pub fn is_unique(&self) -> bool {
        self.def.unique
    }

    pub fn is_generated(&self) -> bool {
        self.def.generated
    }

    pub fn comment(&self) -> &str {
        &self.def.comment
    }

    /// Generated index over the first `len` indexed columns, sharing storage.
    pub fn prefix(&self, len: usize) -> Index {
        let len = len.min(self.def.tags.len());
        Index {
            table: self.table.clone(),
            def: self.def.prefix(len),
            storage: self.storage.clone(),
            key_tags: self.key_tags.clone(),
            pk_tags: self.pk_tags.clone(),
            types: self.types[..len].to_vec(),
        }
    }

    /// Whether every projected tag can be read from the index key alone.
    pub fn covers(&self, projection: Option<&[Tag]>) -> bool {
        match projection {
            None => false,
            Some(tags) => tags.iter().all(|t| self.key_tags.contains(t)),
        }
    }

    /// Translates SQL ranges into a lookup over this index.
    ///
    /// `Ok(None)` means the ranges cannot be served by this index and the
    /// caller should fall back to a full scan.
    pub fn new_lookup(&self, ranges: &[SqlRange]) -> Result<Option<IndexLookup>, SnapError> {
        let Some(first) = ranges.first() else {
            return Ok(Some(IndexLookup::new(self.clone(), Vec::new(), Vec::new())));
        };
        let width = first.len();
        if width == 0 || width > self.def.tags.len() {
            return Ok(None);
        }
        let index = if width < self.def.tags.len() {
            self.prefix(width)
        } else {
            self.clone()
        };
        let Some(native) = range::translate(&index.def.tags, &index.types, ranges)? else {
            return Ok(None);
        };
        Ok(Some(IndexLookup::new(index, native, ranges.to_vec())))
    }
}

pub(crate) fn index_key_tags(indexed: &[Tag], pk_tags: &[Tag]) -> Vec<Tag> {
    let mut out = indexed.to_vec();
    out.extend(pk_tags.iter().filter(|t| !indexed.contains(t)));
    out
}
