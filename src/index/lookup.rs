use crate::error::SnapError;
use crate::index::Index;
use crate::index::range::{NativeRange, RangeCheck, SqlRange};
use crate::storage::ordered_map::OrderedMap;
use crate::storage::tuple::Tuple;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexLookup {
    index: Index,
    ranges: Vec<NativeRange>,
    sql_ranges: Vec<SqlRange>,
    mergeable: bool,
}

/// One independently scannable slice of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    ordinal: u32,
}

impl Partition {
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Four-byte big-endian partition key.
    pub fn key(&self) -> [u8; 4] {
        self.ordinal.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Result<Self, SnapError> {
        let bytes: [u8; 4] = key.try_into().map_err(|_| {
            SnapError::InvalidArgument(format!("partition key must be 4 bytes, got {}", key.len()))
        })?;
        Ok(Self {
            ordinal: u32::from_be_bytes(bytes),
        })
    }
}

impl IndexLookup {
    pub(crate) fn new(index: Index, ranges: Vec<NativeRange>, sql_ranges: Vec<SqlRange>) -> Self {
        Self {
            index,
            ranges,
            sql_ranges,
            mergeable: true,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn ranges(&self) -> &[NativeRange] {
        &self.ranges
    }

    pub fn sql_ranges(&self) -> &[SqlRange] {
        &self.sql_ranges
    }

    pub fn is_mergeable(&self) -> bool {
        self.mergeable
    }

    fn can_merge(&self, other: &IndexLookup) -> bool {
        self.mergeable
            && other.mergeable
            && self.index.table() == other.index.table()
            && self.index.id() == other.index.id()
            && self.index.storage() == other.index.storage()
    }

    /// Rows matched by both lookups. `None` when the lookups use different
    /// indexes.
    pub fn intersection(&self, other: &IndexLookup) -> Option<IndexLookup> {
        if !self.can_merge(other) {
            return None;
        }
        let mut ranges = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.intersect(b) {
                    ranges.push(r);
                }
            }
        }
        let sql_ranges = ranges.iter().map(NativeRange::to_sql_range).collect();
        Some(IndexLookup::new(self.index.clone(), ranges, sql_ranges))
    }

    /// Rows matched by either lookup. `None` when the lookups use different
    /// indexes.
    pub fn union(&self, other: &IndexLookup) -> Option<IndexLookup> {
        if !self.can_merge(other) {
            return None;
        }
        let mut ranges = self.ranges.clone();
        let mut sql_ranges = self.sql_ranges.clone();
        for (native, sql) in other.ranges.iter().zip(&other.sql_ranges) {
            if !ranges.contains(native) {
                ranges.push(native.clone());
                sql_ranges.push(sql.clone());
            }
        }
        Some(IndexLookup::new(self.index.clone(), ranges, sql_ranges))
    }

    pub fn partitions(&self) -> Vec<Partition> {
        (0..self.ranges.len() as u32)
            .map(|ordinal| Partition { ordinal })
            .collect()
    }

    /// The lookup restricted to one partition's range.
    pub fn partition(&self, partition: Partition) -> Result<IndexLookup, SnapError> {
        let idx = partition.ordinal as usize;
        let range = self.ranges.get(idx).ok_or_else(|| {
            SnapError::InvalidArgument(format!(
                "partition {} out of {} for index '{}'",
                partition.ordinal,
                self.ranges.len(),
                self.index.id()
            ))
        })?;
        Ok(IndexLookup::new(
            self.index.clone(),
            vec![range.clone()],
            vec![range.to_sql_range()],
        ))
    }

    /// Ordered scan of `map` over every range, each key yielded once.
    pub fn scan(&self, map: OrderedMap) -> RangeScan {
        RangeScan::new(map, self.ranges.clone())
    }
}

struct RangeCursor {
    range: NativeRange,
    position: Bound<Tuple>,
    done: bool,
}

impl RangeCursor {
    fn advance(&mut self, map: &OrderedMap) -> Option<(Tuple, Tuple)> {
        while !self.done {
            let Some((key, value)) = map.seek(&self.position) else {
                self.done = true;
                break;
            };
            self.position = Bound::Excluded(key.clone());
            match self.range.check(&key) {
                RangeCheck::InRange => return Some((key, value)),
                RangeCheck::Skip => continue,
                RangeCheck::Overflow => self.done = true,
            }
        }
        None
    }
}

/// K-way merge over per-range cursors. Owns a structural clone of the map so
/// it can move to a reader thread.
pub struct RangeScan {
    map: OrderedMap,
    cursors: Vec<RangeCursor>,
    heads: Vec<Option<(Tuple, Tuple)>>,
    primed: bool,
}

impl RangeScan {
    pub fn new(map: OrderedMap, ranges: Vec<NativeRange>) -> Self {
        let cursors = ranges
            .into_iter()
            .map(|range| RangeCursor {
                position: range.start(),
                range,
                done: false,
            })
            .collect::<Vec<_>>();
        Self {
            heads: Vec::with_capacity(cursors.len()),
            map,
            cursors,
            primed: false,
        }
    }
}

impl Iterator for RangeScan {
    type Item = (Tuple, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            for cursor in &mut self.cursors {
                let head = cursor.advance(&self.map);
                self.heads.push(head);
            }
        }
        let min = self
            .heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|(k, _)| (i, k)))
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)?;
        let (key, value) = self.heads[min].take()?;
        for i in 0..self.heads.len() {
            let duplicate = self.heads[i].as_ref().is_some_and(|(k, _)| *k == key);
            if i == min || duplicate {
                self.heads[i] = self.cursors[i].advance(&self.map);
            }
        }
        Some((key, value))
    }
}
