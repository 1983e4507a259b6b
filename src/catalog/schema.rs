use crate::catalog::types::{ColumnType, Row, Value};
use crate::error::{ResourceType, SnapError};
use crate::storage::tuple::{Tag, Tuple};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Tags at or above this value are reserved for system tables.
pub const RESERVED_TAG_MIN: Tag = 1 << 50;

pub const PRIMARY_INDEX_ID: &str = "PRIMARY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub tag: Tag,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub comment: String,
}

impl Column {
    pub fn new(name: &str, tag: Tag, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            tag,
            col_type,
            nullable: true,
            primary_key: false,
            default: None,
            comment: String::new(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Column definition for `ALTER TABLE ... ADD/MODIFY COLUMN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub tag: Option<Tag>,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<Value>,
    pub comment: String,
}

impl ColumnSpec {
    pub fn new(name: &str, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            tag: None,
            col_type,
            nullable: true,
            primary_key: false,
            default: None,
            comment: String::new(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOrder {
    First,
    After(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub tags: Vec<Tag>,
    pub unique: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub generated: bool,
}

impl IndexDef {
    pub fn new(name: &str, tags: Vec<Tag>, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            tags,
            unique,
            comment: String::new(),
            generated: false,
        }
    }

    /// A synthetic index over the first `len` columns of this one.
    pub fn prefix(&self, len: usize) -> IndexDef {
        let len = len.min(self.tags.len());
        IndexDef {
            name: format!("{}_PREFIX_{len}", self.name),
            tags: self.tags[..len].to_vec(),
            unique: false,
            comment: format!("prefix of {} over {len} column(s)", self.name),
            generated: true,
        }
    }
}

/// Index creation request, columns named rather than tagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub comment: String,
}

impl IndexSpec {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            comment: String::new(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Tags of dropped columns; never handed out again.
    #[serde(default)]
    pub retired_tags: BTreeSet<Tag>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self, SnapError> {
        let schema = Self {
            columns,
            indexes: Vec::new(),
            retired_tags: BTreeSet::new(),
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SnapError> {
        if self.columns.is_empty() {
            return Err(SnapError::InvalidArgument(
                "table needs at least one column".into(),
            ));
        }
        if !self.columns.iter().any(|c| c.primary_key) {
            return Err(SnapError::UnsupportedOperation(
                "tables without a primary key are not supported".into(),
            ));
        }
        let mut names = BTreeSet::new();
        let mut tags = BTreeSet::new();
        for col in &self.columns {
            if !names.insert(col.name.to_lowercase()) {
                return Err(SnapError::already_exists(
                    ResourceType::Column,
                    col.name.clone(),
                ));
            }
            if !tags.insert(col.tag) || self.retired_tags.contains(&col.tag) {
                return Err(SnapError::InvalidArgument(format!(
                    "duplicate column tag {} for column '{}'",
                    col.tag, col.name
                )));
            }
            if col.tag >= RESERVED_TAG_MIN {
                return Err(SnapError::InvalidArgument(format!(
                    "tag {} is reserved",
                    col.tag
                )));
            }
            if col.primary_key && col.nullable {
                return Err(SnapError::InvalidArgument(format!(
                    "primary key column '{}' cannot be nullable",
                    col.name
                )));
            }
        }
        for index in &self.indexes {
            for tag in &index.tags {
                if !tags.contains(tag) {
                    return Err(SnapError::InternalInvariantViolation(format!(
                        "index '{}' references unknown tag {tag}",
                        index.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn column_by_tag(&self, tag: Tag) -> Option<&Column> {
        self.columns.iter().find(|c| c.tag == tag)
    }

    pub fn position_of_tag(&self, tag: Tag) -> Option<usize> {
        self.columns.iter().position(|c| c.tag == tag)
    }

    pub fn pk_tags(&self) -> Vec<Tag> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.tag)
            .collect()
    }

    pub fn value_tags(&self) -> Vec<Tag> {
        self.columns
            .iter()
            .filter(|c| !c.primary_key)
            .map(|c| c.tag)
            .collect()
    }

    pub fn all_tags(&self) -> Vec<Tag> {
        self.columns.iter().map(|c| c.tag).collect()
    }

    /// Every tag this table has ever handed out.
    pub fn used_tags(&self) -> BTreeSet<Tag> {
        let mut out = self.retired_tags.clone();
        out.extend(self.columns.iter().map(|c| c.tag));
        out
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .or_else(|| self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name)))
    }

    pub fn primary_index(&self) -> IndexDef {
        IndexDef {
            name: PRIMARY_INDEX_ID.to_string(),
            tags: self.pk_tags(),
            unique: true,
            comment: String::new(),
            generated: false,
        }
    }

    pub fn indexes_with_tag(&self, tag: Tag) -> Vec<&IndexDef> {
        self.indexes.iter().filter(|i| i.tags.contains(&tag)).collect()
    }

    /// Splits a row in schema order into its key and value tuples.
    pub fn split_row(&self, row: &Row) -> Result<(Tuple, Tuple), SnapError> {
        if row.values.len() != self.columns.len() {
            return Err(SnapError::InvalidArgument(format!(
                "row has {} values, schema has {} columns",
                row.values.len(),
                self.columns.len()
            )));
        }
        let mut key = Tuple::new();
        let mut value = Tuple::new();
        for col in self.columns.iter().filter(|c| c.primary_key) {
            let idx = self.position_of_tag(col.tag).ok_or_else(|| {
                SnapError::InternalInvariantViolation(format!("missing column tag {}", col.tag))
            })?;
            key.push(col.tag, row.values[idx].clone());
        }
        for (col, v) in self.columns.iter().zip(&row.values) {
            if !col.primary_key {
                value.push(col.tag, v.clone());
            }
        }
        Ok((key, value))
    }

    /// Reassembles a row in schema order. Tags missing from both tuples read
    /// as the column default, or NULL.
    pub fn join_row(&self, key: &Tuple, value: &Tuple) -> Row {
        let values = self
            .columns
            .iter()
            .map(|col| {
                key.get(col.tag)
                    .or_else(|| value.get(col.tag))
                    .cloned()
                    .or_else(|| col.default.clone())
                    .unwrap_or(Value::Null)
            })
            .collect();
        Row::from_values(values)
    }

    /// Builds the key tuple for a primary-key lookup from values in PK order.
    pub fn key_from_values(&self, values: &[Value]) -> Result<Tuple, SnapError> {
        let pk: Vec<&Column> = self.columns.iter().filter(|c| c.primary_key).collect();
        if pk.len() != values.len() {
            return Err(SnapError::InvalidArgument(format!(
                "primary key has {} columns, got {} values",
                pk.len(),
                values.len()
            )));
        }
        let mut key = Tuple::new();
        for (col, v) in pk.into_iter().zip(values) {
            let converted = col
                .col_type
                .convert(v)
                .ok_or_else(|| SnapError::InvalidArgument(format!(
                    "cannot convert {v} to {} for column '{}'",
                    col.col_type.name(),
                    col.name
                )))?;
            key.push(col.tag, converted);
        }
        Ok(key)
    }

    /// Coerces and checks a row against column types and nullability.
    pub fn coerce_row(&self, table: &str, row: Row) -> Result<Row, SnapError> {
        if row.values.len() != self.columns.len() {
            return Err(SnapError::InvalidArgument(format!(
                "row has {} values, table '{table}' has {} columns",
                row.values.len(),
                self.columns.len()
            )));
        }
        let mut out = Vec::with_capacity(row.values.len());
        for (col, v) in self.columns.iter().zip(row.values) {
            let v = if v.is_null() {
                col.default.clone().unwrap_or(Value::Null)
            } else {
                v
            };
            if v.is_null() {
                if !col.nullable {
                    return Err(SnapError::NotNullViolation {
                        table: table.to_string(),
                        column: col.name.clone(),
                    });
                }
                out.push(Value::Null);
                continue;
            }
            let converted = col
                .col_type
                .convert(&v)
                .ok_or_else(|| SnapError::TypeMismatch {
                    column: col.name.clone(),
                    expected: col.col_type.name().to_string(),
                    actual: v.type_name().to_string(),
                })?;
            out.push(converted);
        }
        Ok(Row::from_values(out))
    }
}

/// Derives a fresh tag for a new column.
///
/// The tag is a function of the table name, column name, type and the set of
/// tags already taken, so replaying the same DDL yields the same tag.
pub fn generate_tag(
    table_name: &str,
    column_name: &str,
    col_type: ColumnType,
    taken: &BTreeSet<Tag>,
) -> Tag {
    let mut hasher = Sha256::new();
    hasher.update(table_name.to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(column_name.to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(col_type.name().as_bytes());
    for tag in taken {
        hasher.update(tag.to_be_bytes());
    }
    let mut seed: [u8; 32] = hasher.finalize().into();
    loop {
        let mut head = [0u8; 8];
        head.copy_from_slice(&seed[..8]);
        let tag = u64::from_be_bytes(head) % RESERVED_TAG_MIN;
        if !taken.contains(&tag) {
            return tag;
        }
        seed = Sha256::digest(seed).into();
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, IndexDef, RESERVED_TAG_MIN, Schema, generate_tag};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::error::SnapErrorCode;
    use std::collections::BTreeSet;

    fn people() -> Schema {
        Schema::new(vec![
            Column::new("id", 1, ColumnType::Integer).primary_key(),
            Column::new("name", 2, ColumnType::Text),
            Column::new("age", 3, ColumnType::Integer),
        ])
        .expect("schema")
    }

    #[test]
    fn split_and_join_roundtrip_row() {
        let schema = people();
        let row = Row::from_values(vec![
            Value::Integer(7),
            Value::Text("ada".into()),
            Value::Integer(36),
        ]);
        let (key, value) = schema.split_row(&row).expect("split");
        assert_eq!(key.len(), 1);
        assert_eq!(value.len(), 2);
        assert_eq!(schema.join_row(&key, &value), row);
    }

    #[test]
    fn schema_requires_primary_key_and_unique_names() {
        let err = Schema::new(vec![Column::new("a", 1, ColumnType::Text)]).unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UnsupportedOperation);

        let err = Schema::new(vec![
            Column::new("a", 1, ColumnType::Text).primary_key(),
            Column::new("A", 2, ColumnType::Text),
        ])
        .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::ColumnAlreadyExists);
    }

    #[test]
    fn coerce_row_applies_defaults_and_types() {
        let mut schema = people();
        schema.columns[2].default = Some(Value::Integer(18));
        schema.columns[2].nullable = false;
        let row = schema
            .coerce_row(
                "people",
                Row::from_values(vec![Value::Text("5".into()), Value::Null, Value::Null]),
            )
            .expect("coerce");
        assert_eq!(
            row.values,
            vec![Value::Integer(5), Value::Null, Value::Integer(18)]
        );

        let err = schema
            .coerce_row(
                "people",
                Row::from_values(vec![Value::Null, Value::Null, Value::Null]),
            )
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::NotNullViolation);
    }

    #[test]
    fn prefix_index_is_generated() {
        let idx = IndexDef::new("abc", vec![1, 2, 3], true);
        let prefix = idx.prefix(1);
        assert_eq!(prefix.name, "abc_PREFIX_1");
        assert_eq!(prefix.tags, vec![1]);
        assert!(prefix.generated);
        assert!(!prefix.unique);
    }

    #[test]
    fn generated_tags_are_deterministic_and_fresh() {
        let taken: BTreeSet<u64> = [1, 2, 3].into_iter().collect();
        let a = generate_tag("people", "email", ColumnType::Text, &taken);
        let b = generate_tag("people", "email", ColumnType::Text, &taken);
        assert_eq!(a, b);
        assert!(!taken.contains(&a));
        assert!(a < RESERVED_TAG_MIN);

        let mut more = taken.clone();
        more.insert(a);
        let c = generate_tag("people", "email", ColumnType::Text, &more);
        assert_ne!(a, c);
    }

    #[test]
    fn column_lookup_falls_back_to_case_insensitive() {
        let schema = people();
        assert_eq!(schema.column("NAME").map(|c| c.tag), Some(2));
        assert!(schema.column("missing").is_none());
    }
}
