use crate::catalog::schema::Schema;
use crate::catalog::types::{Row, Value};
use crate::error::SnapError;
use crate::index::lookup::RangeScan;
use crate::index::parallel::ParallelRowIter;
use crate::storage::ordered_map::OrderedMap;
use crate::storage::tuple::{Tag, Tuple};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Counters shared by every fetcher of one lookup.
#[derive(Debug, Default)]
pub struct LookupStats {
    point_lookups: AtomicU64,
    missing_rows: AtomicU64,
    rows_emitted: AtomicU64,
}

impl LookupStats {
    pub fn point_lookups(&self) -> u64 {
        self.point_lookups.load(Ordering::Relaxed)
    }

    /// Index entries whose primary row was gone by the time it was read.
    pub fn missing_rows(&self) -> u64 {
        self.missing_rows.load(Ordering::Relaxed)
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted.load(Ordering::Relaxed)
    }

    pub(crate) fn record_row(&self) {
        self.rows_emitted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Turns one ordered-map entry into an output row.
///
/// `Ok(None)` drops the entry without ending the scan.
pub trait RowFetcher: Send + Sync {
    fn fetch(&self, key: &Tuple, value: &Tuple) -> Result<Option<Row>, SnapError>;
}

/// Reads rows straight out of the scanned entry.
pub struct EntryFetcher {
    schema: Arc<Schema>,
    projection: Option<Vec<Tag>>,
}

impl EntryFetcher {
    pub fn new(schema: Arc<Schema>, projection: Option<Vec<Tag>>) -> Self {
        Self { schema, projection }
    }
}

impl RowFetcher for EntryFetcher {
    fn fetch(&self, key: &Tuple, value: &Tuple) -> Result<Option<Row>, SnapError> {
        let row = match &self.projection {
            Some(tags) => Row::from_values(
                tags.iter()
                    .map(|t| {
                        key.get(*t)
                            .or_else(|| value.get(*t))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            ),
            None => self.schema.join_row(key, value),
        };
        Ok(Some(row))
    }
}

/// Resolves secondary index entries through a primary-map point lookup.
pub struct PrimaryRowFetcher {
    schema: Arc<Schema>,
    primary: OrderedMap,
    pk_tags: Vec<Tag>,
    projection: Option<Vec<Tag>>,
    stats: Arc<LookupStats>,
}

impl PrimaryRowFetcher {
    pub fn new(
        schema: Arc<Schema>,
        primary: OrderedMap,
        projection: Option<Vec<Tag>>,
        stats: Arc<LookupStats>,
    ) -> Self {
        Self {
            pk_tags: schema.pk_tags(),
            schema,
            primary,
            projection,
            stats,
        }
    }
}

impl RowFetcher for PrimaryRowFetcher {
    fn fetch(&self, key: &Tuple, _value: &Tuple) -> Result<Option<Row>, SnapError> {
        let pk = key.project(&self.pk_tags);
        if pk.len() != self.pk_tags.len() {
            return Err(SnapError::InternalInvariantViolation(format!(
                "index key {key} is missing primary key columns"
            )));
        }
        self.stats.point_lookups.fetch_add(1, Ordering::Relaxed);
        let Some(value) = self.primary.get(&pk) else {
            self.stats.missing_rows.fetch_add(1, Ordering::Relaxed);
            debug!(key = %pk, "index entry points at a row that no longer exists");
            return Ok(None);
        };
        let row = self.schema.join_row(&pk, value);
        Ok(Some(match &self.projection {
            Some(tags) => project_row(&self.schema, &row, tags),
            None => row,
        }))
    }
}

pub(crate) fn project_row(schema: &Schema, row: &Row, tags: &[Tag]) -> Row {
    Row::from_values(
        tags.iter()
            .map(|t| {
                schema
                    .position_of_tag(*t)
                    .and_then(|i| row.values.get(i).cloned())
                    .unwrap_or(Value::Null)
            })
            .collect(),
    )
}

fn next_row<F: RowFetcher>(
    scan: &mut RangeScan,
    fetcher: &F,
    stats: &LookupStats,
) -> Option<Result<Row, SnapError>> {
    for (key, value) in scan.by_ref() {
        match fetcher.fetch(&key, &value) {
            Ok(Some(row)) => {
                stats.record_row();
                return Some(Ok(row));
            }
            Ok(None) => continue,
            Err(e) => return Some(Err(e)),
        }
    }
    None
}

/// Sequential scan whose rows come entirely from the scanned map.
pub struct CoveringIndexIter {
    scan: RangeScan,
    fetcher: EntryFetcher,
    stats: Arc<LookupStats>,
}

impl CoveringIndexIter {
    pub fn new(scan: RangeScan, fetcher: EntryFetcher, stats: Arc<LookupStats>) -> Self {
        Self {
            scan,
            fetcher,
            stats,
        }
    }
}

impl Iterator for CoveringIndexIter {
    type Item = Result<Row, SnapError>;

    fn next(&mut self) -> Option<Self::Item> {
        next_row(&mut self.scan, &self.fetcher, &self.stats)
    }
}

/// Sequential secondary-index scan with a primary lookup per entry.
pub struct IndexLookupIter {
    scan: RangeScan,
    fetcher: PrimaryRowFetcher,
    stats: Arc<LookupStats>,
    failed: bool,
}

impl IndexLookupIter {
    pub fn new(scan: RangeScan, fetcher: PrimaryRowFetcher, stats: Arc<LookupStats>) -> Self {
        Self {
            scan,
            fetcher,
            stats,
            failed: false,
        }
    }
}

impl Iterator for IndexLookupIter {
    type Item = Result<Row, SnapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let out = next_row(&mut self.scan, &self.fetcher, &self.stats);
        if matches!(out, Some(Err(_))) {
            self.failed = true;
        }
        out
    }
}

/// Row iterator returned by `Table::lookup_rows`.
pub enum LookupRowIter {
    Covering(CoveringIndexIter),
    Lookup(IndexLookupIter),
    Parallel(ParallelRowIter),
}

impl LookupRowIter {
    pub fn stats(&self) -> Arc<LookupStats> {
        match self {
            LookupRowIter::Covering(it) => Arc::clone(&it.stats),
            LookupRowIter::Lookup(it) => Arc::clone(&it.stats),
            LookupRowIter::Parallel(it) => it.stats(),
        }
    }

    pub fn is_covering(&self) -> bool {
        match self {
            LookupRowIter::Covering(_) => true,
            LookupRowIter::Lookup(_) => false,
            LookupRowIter::Parallel(it) => it.is_covering(),
        }
    }

    /// Stops background work. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), SnapError> {
        match self {
            LookupRowIter::Parallel(it) => it.close(),
            _ => Ok(()),
        }
    }
}

impl Iterator for LookupRowIter {
    type Item = Result<Row, SnapError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LookupRowIter::Covering(it) => it.next(),
            LookupRowIter::Lookup(it) => it.next(),
            LookupRowIter::Parallel(it) => it.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EntryFetcher, LookupStats, PrimaryRowFetcher, RowFetcher};
    use crate::catalog::schema::{Column, Schema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::storage::ordered_map::OrderedMap;
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                Column::new("id", 1, ColumnType::Integer).primary_key(),
                Column::new("name", 2, ColumnType::Text),
            ])
            .expect("schema"),
        )
    }

    #[test]
    fn missing_primary_row_is_skipped_and_counted() {
        let schema = schema();
        let mut primary = OrderedMap::new();
        primary.insert(
            Tuple::from_fields([(1, Value::Integer(1))]),
            Tuple::from_fields([(2, Value::from("a"))]),
        );
        let stats = Arc::new(LookupStats::default());
        let fetcher = PrimaryRowFetcher::new(schema, primary, None, Arc::clone(&stats));

        let present = Tuple::from_fields([(2, Value::from("a")), (1, Value::Integer(1))]);
        let gone = Tuple::from_fields([(2, Value::from("b")), (1, Value::Integer(2))]);
        assert_eq!(
            fetcher.fetch(&present, &Tuple::new()).expect("fetch"),
            Some(Row::from_values(vec![Value::Integer(1), Value::from("a")]))
        );
        assert_eq!(fetcher.fetch(&gone, &Tuple::new()).expect("fetch"), None);
        assert_eq!(stats.point_lookups(), 2);
        assert_eq!(stats.missing_rows(), 1);
    }

    #[test]
    fn entry_fetcher_projects_from_key_and_value() {
        let fetcher = EntryFetcher::new(schema(), Some(vec![2, 1]));
        let row = fetcher
            .fetch(
                &Tuple::from_fields([(1, Value::Integer(9))]),
                &Tuple::from_fields([(2, Value::from("z"))]),
            )
            .expect("fetch")
            .expect("row");
        assert_eq!(row.values, vec![Value::from("z"), Value::Integer(9)]);
    }
}
