use crate::catalog::types::{ColumnType, Value};
use crate::error::SnapError;
use crate::storage::tuple::{Tag, Tuple};
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeType {
    Empty,
    All,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Closed,
    Open,
    OpenClosed,
    ClosedOpen,
}

/// A typed range over one index column, as written in SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRange {
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
    empty: bool,
}

impl ColumnRange {
    fn new(lower: Bound<Value>, upper: Bound<Value>) -> Self {
        Self {
            lower,
            upper,
            empty: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            empty: true,
        }
    }

    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn gt(v: impl Into<Value>) -> Self {
        Self::new(Bound::Excluded(v.into()), Bound::Unbounded)
    }

    pub fn gte(v: impl Into<Value>) -> Self {
        Self::new(Bound::Included(v.into()), Bound::Unbounded)
    }

    pub fn lt(v: impl Into<Value>) -> Self {
        Self::new(Bound::Unbounded, Bound::Excluded(v.into()))
    }

    pub fn lte(v: impl Into<Value>) -> Self {
        Self::new(Bound::Unbounded, Bound::Included(v.into()))
    }

    pub fn closed(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self::new(Bound::Included(lo.into()), Bound::Included(hi.into()))
    }

    pub fn open(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self::new(Bound::Excluded(lo.into()), Bound::Excluded(hi.into()))
    }

    pub fn open_closed(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self::new(Bound::Excluded(lo.into()), Bound::Included(hi.into()))
    }

    pub fn closed_open(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self::new(Bound::Included(lo.into()), Bound::Excluded(hi.into()))
    }

    pub fn eq(v: impl Into<Value>) -> Self {
        let v = v.into();
        Self::closed(v.clone(), v)
    }

    pub fn range_type(&self) -> RangeType {
        if self.empty {
            return RangeType::Empty;
        }
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, Bound::Unbounded) => RangeType::All,
            (Bound::Excluded(_), Bound::Unbounded) => RangeType::GreaterThan,
            (Bound::Included(_), Bound::Unbounded) => RangeType::GreaterOrEqual,
            (Bound::Unbounded, Bound::Excluded(_)) => RangeType::LessThan,
            (Bound::Unbounded, Bound::Included(_)) => RangeType::LessOrEqual,
            (Bound::Included(_), Bound::Included(_)) => RangeType::Closed,
            (Bound::Excluded(_), Bound::Excluded(_)) => RangeType::Open,
            (Bound::Excluded(_), Bound::Included(_)) => RangeType::OpenClosed,
            (Bound::Included(_), Bound::Excluded(_)) => RangeType::ClosedOpen,
        }
    }

    /// Whether no value can satisfy the range.
    pub fn is_empty(&self) -> bool {
        if self.empty {
            return true;
        }
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }

    pub fn contains(&self, v: &Value) -> bool {
        if v.is_null() && !self.admits_null() {
            return false;
        }
        !self.is_empty() && above_lower(&self.lower, v) && below_upper(&self.upper, v)
    }

    /// NULL satisfies only an unbounded range or a range over NULL itself.
    fn admits_null(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, Bound::Unbounded) => true,
            (Bound::Included(v) | Bound::Excluded(v), _)
            | (_, Bound::Included(v) | Bound::Excluded(v)) => v.is_null(),
        }
    }

    pub fn intersect(&self, other: &ColumnRange) -> ColumnRange {
        if self.is_empty() || other.is_empty() {
            return ColumnRange::empty();
        }
        let out = ColumnRange::new(
            tighter_lower(&self.lower, &other.lower),
            tighter_upper(&self.upper, &other.upper),
        );
        if out.is_empty() {
            ColumnRange::empty()
        } else {
            out
        }
    }

    fn shape(&self) -> (bool, bool) {
        (
            !matches!(self.lower, Bound::Unbounded),
            !matches!(self.upper, Bound::Unbounded),
        )
    }

    fn convert(&self, col_type: ColumnType) -> Result<ColumnRange, SnapError> {
        Ok(ColumnRange {
            lower: convert_bound(&self.lower, col_type)?,
            upper: convert_bound(&self.upper, col_type)?,
            empty: self.empty,
        })
    }
}

/// One column range per index column position.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRange(pub Vec<ColumnRange>);

impl SqlRange {
    pub fn new(columns: Vec<ColumnRange>) -> Self {
        Self(columns)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column count plus per-bound boundedness.
    pub fn shape(&self) -> Vec<(bool, bool)> {
        self.0.iter().map(ColumnRange::shape).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCheck {
    InRange,
    /// Outside an inner column's bounds; later keys may match again.
    Skip,
    /// Past the outer-most column's upper bound; nothing later matches.
    Overflow,
}

/// A range converted to column-native values and bound to index tags.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRange {
    tags: Vec<Tag>,
    columns: Vec<ColumnRange>,
}

impl NativeRange {
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn columns(&self) -> &[ColumnRange] {
        &self.columns
    }

    pub fn bounds(&self, position: usize) -> Option<(&Bound<Value>, &Bound<Value>)> {
        self.columns.get(position).map(|c| (&c.lower, &c.upper))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().any(ColumnRange::is_empty)
    }

    /// Seek position for the first candidate key.
    ///
    /// Leading equality columns extend the prefix; the first column that is
    /// not a point contributes its lower value and ends it.
    pub fn start(&self) -> Bound<Tuple> {
        let mut prefix = Tuple::new();
        for (tag, col) in self.tags.iter().zip(&self.columns) {
            let value = match &col.lower {
                Bound::Unbounded => break,
                Bound::Included(v) | Bound::Excluded(v) => v.clone(),
            };
            let point = matches!(
                (&col.lower, &col.upper),
                (Bound::Included(lo), Bound::Included(hi)) if lo == hi
            );
            prefix.push(*tag, value);
            if !point {
                break;
            }
        }
        if prefix.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(prefix)
        }
    }

    pub fn check(&self, key: &Tuple) -> RangeCheck {
        for (position, col) in self.columns.iter().enumerate() {
            let Some(value) = key.value_at(position) else {
                return RangeCheck::Skip;
            };
            if value.is_null() && !col.admits_null() {
                return RangeCheck::Skip;
            }
            if !below_upper(&col.upper, value) {
                return if position == 0 {
                    RangeCheck::Overflow
                } else {
                    RangeCheck::Skip
                };
            }
            if !above_lower(&col.lower, value) {
                return RangeCheck::Skip;
            }
        }
        RangeCheck::InRange
    }

    pub fn intersect(&self, other: &NativeRange) -> Option<NativeRange> {
        if self.tags != other.tags {
            return None;
        }
        let columns: Vec<ColumnRange> = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| a.intersect(b))
            .collect();
        if columns.iter().any(ColumnRange::is_empty) {
            return None;
        }
        Some(NativeRange {
            tags: self.tags.clone(),
            columns,
        })
    }

    pub fn to_sql_range(&self) -> SqlRange {
        SqlRange(self.columns.clone())
    }
}

/// Converts SQL ranges to native ranges over `tags`/`types`.
///
/// Returns `Ok(None)` when a range's shape differs from the first range's.
/// Ranges with an empty column are dropped, they can match nothing.
pub fn translate(
    tags: &[Tag],
    types: &[ColumnType],
    ranges: &[SqlRange],
) -> Result<Option<Vec<NativeRange>>, SnapError> {
    let Some(first) = ranges.first() else {
        return Ok(Some(Vec::new()));
    };
    let shape = first.shape();
    if ranges.iter().any(|r| r.shape() != shape) {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        let mut columns = Vec::with_capacity(range.len());
        for (col, col_type) in range.0.iter().zip(types) {
            columns.push(col.convert(*col_type)?);
        }
        let native = NativeRange {
            tags: tags[..columns.len()].to_vec(),
            columns,
        };
        if !native.is_empty() {
            out.push(native);
        }
    }
    Ok(Some(out))
}

fn convert_bound(bound: &Bound<Value>, col_type: ColumnType) -> Result<Bound<Value>, SnapError> {
    let convert = |v: &Value| {
        col_type.convert(v).ok_or_else(|| {
            SnapError::InvalidArgument(format!(
                "range bound {v} cannot be converted to {}",
                col_type.name()
            ))
        })
    };
    Ok(match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(v) => Bound::Included(convert(v)?),
        Bound::Excluded(v) => Bound::Excluded(convert(v)?),
    })
}

fn above_lower(lower: &Bound<Value>, v: &Value) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(lo) => v >= lo,
        Bound::Excluded(lo) => v > lo,
    }
}

fn below_upper(upper: &Bound<Value>, v: &Value) -> bool {
    match upper {
        Bound::Unbounded => true,
        Bound::Included(hi) => v <= hi,
        Bound::Excluded(hi) => v < hi,
    }
}

fn tighter_lower(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, x) | (x, Bound::Unbounded) => x.clone(),
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y).clone()),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y).clone()),
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if i > e {
                Bound::Included(i.clone())
            } else {
                Bound::Excluded(e.clone())
            }
        }
    }
}

fn tighter_upper(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, x) | (x, Bound::Unbounded) => x.clone(),
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y).clone()),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y).clone()),
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if i < e {
                Bound::Included(i.clone())
            } else {
                Bound::Excluded(e.clone())
            }
        }
    }
}
