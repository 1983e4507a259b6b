pub mod alter;
pub mod editor;
pub mod snapshot;

pub use editor::{RowDeleter, RowInserter, RowReplacer, RowUpdater, TableEditor};
pub use snapshot::TableSnapshot;

use crate::catalog::schema::Schema;
use crate::catalog::types::Row;
use crate::config::SnapConfig;
use crate::error::{ResourceType, SnapError};
use crate::index::iter::{CoveringIndexIter, EntryFetcher, IndexLookupIter, PrimaryRowFetcher};
use crate::index::{
    Index, IndexLookup, IndexStorage, LookupRowIter, LookupStats, ParallelRowIter, Partition,
    RowFetcher,
};
use crate::storage::tuple::Tag;
use std::sync::Arc;

/// Read view over one table as seen by the current session.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    snapshot: TableSnapshot,
    schema: Arc<Schema>,
    config: SnapConfig,
}

impl Table {
    pub(crate) fn new(name: &str, snapshot: TableSnapshot, config: SnapConfig) -> Self {
        Self {
            name: name.to_string(),
            schema: Arc::new(snapshot.schema().clone()),
            snapshot,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn snapshot(&self) -> &TableSnapshot {
        &self.snapshot
    }

    pub fn row_count(&self) -> usize {
        self.snapshot.row_count()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.snapshot.scan()
    }

    /// The primary index followed by secondary indexes in declaration order.
    pub fn indexes(&self) -> Result<Vec<Index>, SnapError> {
        let mut out = vec![Index::primary(&self.name, &self.schema)?];
        for def in &self.schema.indexes {
            out.push(Index::secondary(&self.name, &self.schema, def)?);
        }
        Ok(out)
    }

    pub fn index(&self, name: &str) -> Result<Index, SnapError> {
        self.indexes()?
            .into_iter()
            .find(|i| i.id().eq_ignore_ascii_case(name))
            .ok_or_else(|| SnapError::not_found(ResourceType::Index, format!("{}.{name}", self.name)))
    }

    /// Rows matched by `lookup`, in index key order.
    ///
    /// With a projection, rows hold only the projected columns in projection
    /// order; without one they hold every column in schema order.
    pub fn lookup_rows(
        &self,
        lookup: &IndexLookup,
        projection: Option<&[Tag]>,
    ) -> Result<LookupRowIter, SnapError> {
        let index = lookup.index();
        if !index.table().eq_ignore_ascii_case(&self.name) {
            return Err(SnapError::InvalidArgument(format!(
                "lookup on index '{}' of table '{}' used against table '{}'",
                index.id(),
                index.table(),
                self.name
            )));
        }
        if let Some(tags) = projection
            && let Some(tag) = tags.iter().find(|t| self.schema.column_by_tag(**t).is_none())
        {
            return Err(SnapError::not_found(
                ResourceType::Column,
                format!("{} tag {tag}", self.name),
            ));
        }
        let map = match index.storage() {
            IndexStorage::Primary => self.snapshot.rows().clone(),
            IndexStorage::Secondary(name) => self
                .snapshot
                .index_data(name)
                .cloned()
                .ok_or_else(|| {
                    SnapError::not_found(ResourceType::Index, format!("{}.{name}", self.name))
                })?,
        };
        let covering = index.is_primary() || index.covers(projection);
        let projection = projection.map(<[Tag]>::to_vec);
        let stats = Arc::new(LookupStats::default());
        let scan = lookup.scan(map);

        if self.config.parallel_lookup_enabled {
            let fetcher: Arc<dyn RowFetcher> = if covering {
                Arc::new(EntryFetcher::new(Arc::clone(&self.schema), projection))
            } else {
                Arc::new(PrimaryRowFetcher::new(
                    Arc::clone(&self.schema),
                    self.snapshot.rows().clone(),
                    projection,
                    Arc::clone(&stats),
                ))
            };
            return Ok(LookupRowIter::Parallel(ParallelRowIter::spawn(
                scan,
                fetcher,
                stats,
                covering,
                self.config.lookup_worker_threads,
                self.config.lookup_buffer_rows,
            )));
        }
        if covering {
            Ok(LookupRowIter::Covering(CoveringIndexIter::new(
                scan,
                EntryFetcher::new(Arc::clone(&self.schema), projection),
                stats,
            )))
        } else {
            Ok(LookupRowIter::Lookup(IndexLookupIter::new(
                scan,
                PrimaryRowFetcher::new(
                    Arc::clone(&self.schema),
                    self.snapshot.rows().clone(),
                    projection,
                    Arc::clone(&stats),
                ),
                stats,
            )))
        }
    }

    /// Rows of a single lookup partition.
    pub fn partition_rows(
        &self,
        lookup: &IndexLookup,
        partition: Partition,
        projection: Option<&[Tag]>,
    ) -> Result<LookupRowIter, SnapError> {
        self.lookup_rows(&lookup.partition(partition)?, projection)
    }
}
