use crate::catalog::schema::{IndexDef, Schema};
use crate::catalog::types::{Row, Value};
use crate::error::{ResourceType, SnapError};
use crate::index::index_key_tags;
use crate::storage::address::{Address, encode};
use crate::storage::ordered_map::OrderedMap;
use crate::storage::tuple::Tuple;
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Immutable table state: schema, primary rows and secondary index data.
///
/// Every mutating method returns a new snapshot; `self` is never changed.
/// The `pub(crate)` `apply_*` methods mutate in place and are only used on
/// private working copies held by a `TableEditor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    schema: Schema,
    rows: OrderedMap,
    indexes: OrdMap<String, OrderedMap>,
}

impl TableSnapshot {
    pub fn new(schema: Schema) -> Result<Self, SnapError> {
        schema.validate()?;
        let indexes = schema
            .indexes
            .iter()
            .map(|def| (def.name.clone(), OrderedMap::new()))
            .collect();
        Ok(Self {
            schema,
            rows: OrderedMap::new(),
            indexes,
        })
    }

    pub(crate) fn from_parts(
        schema: Schema,
        rows: OrderedMap,
        indexes: OrdMap<String, OrderedMap>,
    ) -> Self {
        Self {
            schema,
            rows,
            indexes,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &OrderedMap {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn index_data(&self, name: &str) -> Option<&OrderedMap> {
        self.indexes.get(name)
    }

    pub(crate) fn index_maps(&self) -> &OrdMap<String, OrderedMap> {
        &self.indexes
    }

    /// Rows in primary-key order.
    pub fn scan(&self) -> impl Iterator<Item = Row> + '_ {
        self.rows.iter().map(|(k, v)| self.schema.join_row(k, v))
    }

    pub fn get_row(&self, pk: &[Value]) -> Result<Option<Row>, SnapError> {
        let key = self.schema.key_from_values(pk)?;
        Ok(self.rows.get(&key).map(|v| self.schema.join_row(&key, v)))
    }

    pub fn content_address(&self) -> Result<Address, SnapError> {
        Ok(Address::of(&encode(self)?))
    }

    pub fn insert_row(&self, table: &str, row: Row) -> Result<TableSnapshot, SnapError> {
        let mut next = self.clone();
        next.apply_insert(table, row)?;
        Ok(next)
    }

    pub fn delete_row(&self, table: &str, row: &Row) -> Result<TableSnapshot, SnapError> {
        let mut next = self.clone();
        next.apply_delete(table, row)?;
        Ok(next)
    }

    /// Builds the entries of `def` from a full primary scan.
    pub fn build_index_data(&self, table: &str, def: &IndexDef) -> Result<OrderedMap, SnapError> {
        let pk_tags = self.schema.pk_tags();
        let key_tags = index_key_tags(&def.tags, &pk_tags);
        let mut data = OrderedMap::new();
        for (pk, value) in self.rows.iter() {
            let key = index_key(&key_tags, pk, value);
            if def.unique {
                let indexed = key.prefix(def.tags.len());
                if !indexed.has_null() && data.has_prefix(&indexed) {
                    return Err(SnapError::UniqueViolation {
                        table: table.to_string(),
                        index: def.name.clone(),
                        key: indexed.to_string(),
                    });
                }
            }
            data.insert(key, Tuple::new());
        }
        Ok(data)
    }

    pub(crate) fn apply_insert(&mut self, table: &str, row: Row) -> Result<(), SnapError> {
        let row = self.schema.coerce_row(table, row)?;
        let (pk, value) = self.schema.split_row(&row)?;
        if self.rows.contains_key(&pk) {
            return Err(SnapError::DuplicatePrimaryKey {
                table: table.to_string(),
                key: pk.to_string(),
            });
        }
        self.check_unique(table, &pk, &value)?;
        self.write_entries(pk, value);
        Ok(())
    }

    /// Insert or overwrite by primary key.
    pub(crate) fn apply_upsert(&mut self, table: &str, row: Row) -> Result<(), SnapError> {
        let row = self.schema.coerce_row(table, row)?;
        let (pk, value) = self.schema.split_row(&row)?;
        let mut next = self.clone();
        next.remove_entries(&pk);
        next.check_unique(table, &pk, &value)?;
        next.write_entries(pk, value);
        *self = next;
        Ok(())
    }

    pub(crate) fn apply_update(&mut self, table: &str, old: &Row, new: Row) -> Result<(), SnapError> {
        let old_pk = self.pk_of(old)?;
        let row = self.schema.coerce_row(table, new)?;
        let (pk, value) = self.schema.split_row(&row)?;
        let mut next = self.clone();
        if next.remove_entries(&old_pk).is_none() {
            return Err(SnapError::InvalidArgument(format!(
                "row {old_pk} does not exist in table '{table}'"
            )));
        }
        if next.rows.contains_key(&pk) {
            return Err(SnapError::DuplicatePrimaryKey {
                table: table.to_string(),
                key: pk.to_string(),
            });
        }
        next.check_unique(table, &pk, &value)?;
        next.write_entries(pk, value);
        *self = next;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub(crate) fn apply_delete(&mut self, _table: &str, row: &Row) -> Result<bool, SnapError> {
        let pk = self.pk_of(row)?;
        Ok(self.remove_entries(&pk).is_some())
    }

    fn pk_of(&self, row: &Row) -> Result<Tuple, SnapError> {
        if row.values.len() != self.schema.columns.len() {
            return Err(SnapError::InvalidArgument(format!(
                "row has {} values, schema has {} columns",
                row.values.len(),
                self.schema.columns.len()
            )));
        }
        let pk_values: Vec<Value> = self
            .schema
            .columns
            .iter()
            .zip(&row.values)
            .filter(|(c, _)| c.primary_key)
            .map(|(_, v)| v.clone())
            .collect();
        self.schema.key_from_values(&pk_values)
    }

    fn check_unique(&self, table: &str, pk: &Tuple, value: &Tuple) -> Result<(), SnapError> {
        let pk_tags = self.schema.pk_tags();
        for def in self.schema.indexes.iter().filter(|d| d.unique) {
            let Some(data) = self.indexes.get(&def.name) else {
                continue;
            };
            let key = index_key(&index_key_tags(&def.tags, &pk_tags), pk, value);
            let indexed = key.prefix(def.tags.len());
            if indexed.has_null() {
                continue;
            }
            if data.has_prefix(&indexed) {
                return Err(SnapError::UniqueViolation {
                    table: table.to_string(),
                    index: def.name.clone(),
                    key: indexed.to_string(),
                });
            }
        }
        Ok(())
    }

    fn write_entries(&mut self, pk: Tuple, value: Tuple) {
        let pk_tags = self.schema.pk_tags();
        for def in &self.schema.indexes {
            let key = index_key(&index_key_tags(&def.tags, &pk_tags), &pk, &value);
            self.indexes
                .entry(def.name.clone())
                .or_insert_with(OrderedMap::new)
                .insert(key, Tuple::new());
        }
        self.rows.insert(pk, value);
    }

    fn remove_entries(&mut self, pk: &Tuple) -> Option<Tuple> {
        let value = self.rows.remove(pk)?;
        let pk_tags = self.schema.pk_tags();
        for def in &self.schema.indexes {
            let key = index_key(&index_key_tags(&def.tags, &pk_tags), pk, &value);
            if let Some(data) = self.indexes.get_mut(&def.name) {
                data.remove(&key);
            }
        }
        Some(value)
    }

    pub(crate) fn with_schema_and_indexes(
        &self,
        schema: Schema,
        indexes: OrdMap<String, OrderedMap>,
    ) -> TableSnapshot {
        TableSnapshot {
            schema,
            rows: self.rows.clone(),
            indexes,
        }
    }

    pub(crate) fn require_index(&self, table: &str, name: &str) -> Result<&IndexDef, SnapError> {
        self.schema
            .index(name)
            .ok_or_else(|| SnapError::not_found(ResourceType::Index, format!("{table}.{name}")))
    }
}

pub(crate) fn index_key(key_tags: &[u64], pk: &Tuple, value: &Tuple) -> Tuple {
    Tuple::from_fields(key_tags.iter().map(|tag| {
        let v = pk
            .get(*tag)
            .or_else(|| value.get(*tag))
            .cloned()
            .unwrap_or(Value::Null);
        (*tag, v)
    }))
}

#[cfg(test)]
mod tests {
    use super::TableSnapshot;
    use crate::catalog::schema::{Column, IndexDef, Schema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::error::SnapErrorCode;

    fn users() -> TableSnapshot {
        let mut schema = Schema::new(vec![
            Column::new("id", 1, ColumnType::Integer).primary_key(),
            Column::new("email", 2, ColumnType::Text),
            Column::new("age", 3, ColumnType::Integer),
        ])
        .expect("schema");
        schema.indexes.push(IndexDef::new("email_idx", vec![2], true));
        schema.indexes.push(IndexDef::new("age_idx", vec![3], false));
        TableSnapshot::new(schema).expect("table")
    }

    fn row(id: i64, email: &str, age: i64) -> Row {
        Row::from_values(vec![Value::Integer(id), Value::from(email), Value::Integer(age)])
    }

    #[test]
    fn insert_returns_new_snapshot_and_keeps_old() {
        let base = users();
        let one = base.insert_row("users", row(1, "a@x", 30)).expect("insert");
        assert_eq!(base.row_count(), 0);
        assert_eq!(one.row_count(), 1);
        assert_eq!(one.index_data("age_idx").map(|d| d.len()), Some(1));
        assert_eq!(base.index_data("age_idx").map(|d| d.len()), Some(0));
    }

    #[test]
    fn duplicate_pk_and_unique_violations() {
        let t = users().insert_row("users", row(1, "a@x", 30)).expect("insert");
        let err = t.insert_row("users", row(1, "b@x", 31)).unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::DuplicatePrimaryKey);
        let err = t.insert_row("users", row(2, "a@x", 31)).unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UniqueViolation);
        let nulls = Row::from_values(vec![Value::Integer(3), Value::Null, Value::Null]);
        let t = t.insert_row("users", nulls.clone()).expect("null email");
        let nulls2 = Row::from_values(vec![Value::Integer(4), Value::Null, Value::Null]);
        t.insert_row("users", nulls2).expect("nulls are not unique-checked");
    }

    #[test]
    fn update_moves_index_entries() {
        let mut t = users().insert_row("users", row(1, "a@x", 30)).expect("insert");
        t.apply_update("users", &row(1, "a@x", 30), row(1, "a@y", 31))
            .expect("update");
        let email = t.index_data("email_idx").expect("index");
        assert_eq!(email.len(), 1);
        let (key, _) = email.iter().next().expect("entry");
        assert_eq!(key.value_at(0), Some(&Value::from("a@y")));
        assert_eq!(
            t.get_row(&[Value::Integer(1)]).expect("get"),
            Some(row(1, "a@y", 31))
        );
    }

    #[test]
    fn failed_upsert_leaves_working_copy_intact() {
        let mut t = users()
            .insert_row("users", row(1, "a@x", 30))
            .and_then(|t| t.insert_row("users", row(2, "b@x", 40)))
            .expect("insert");
        let before = t.clone();
        let err = t.apply_upsert("users", row(2, "a@x", 41)).unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UniqueViolation);
        assert_eq!(t, before);
    }

    #[test]
    fn build_index_data_detects_duplicates() {
        let t = users()
            .insert_row("users", row(1, "a@x", 30))
            .and_then(|t| t.insert_row("users", row(2, "b@x", 30)))
            .expect("insert");
        let data = t
            .build_index_data("users", &IndexDef::new("age2", vec![3], false))
            .expect("build");
        assert_eq!(data.len(), 2);
        let err = t
            .build_index_data("users", &IndexDef::new("age_u", vec![3], true))
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UniqueViolation);
    }

    #[test]
    fn content_address_tracks_contents() {
        let a = users();
        let b = a.insert_row("users", row(1, "a@x", 30)).expect("insert");
        assert_eq!(
            a.content_address().expect("addr"),
            users().content_address().expect("addr")
        );
        assert_ne!(
            a.content_address().expect("addr"),
            b.content_address().expect("addr")
        );
    }
}
