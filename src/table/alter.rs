use crate::catalog::schema::{Column, ColumnOrder, ColumnSpec, IndexDef, PRIMARY_INDEX_ID};
use crate::catalog::types::{Row, Value};
use crate::error::{ResourceType, SnapError};
use crate::storage::tuple::{Tag, Tuple};
use crate::table::TableSnapshot;
use tracing::debug;

fn place_column(
    columns: &mut Vec<Column>,
    column: Column,
    order: Option<&ColumnOrder>,
) -> Result<(), SnapError> {
    match order {
        None => columns.push(column),
        Some(ColumnOrder::First) => columns.insert(0, column),
        Some(ColumnOrder::After(name)) => {
            let pos = columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| SnapError::not_found(ResourceType::Column, name.clone()))?;
            columns.insert(pos + 1, column);
        }
    }
    Ok(())
}

fn require_column<'a>(
    snapshot: &'a TableSnapshot,
    table: &str,
    name: &str,
) -> Result<&'a Column, SnapError> {
    snapshot
        .schema()
        .column(name)
        .ok_or_else(|| SnapError::not_found(ResourceType::Column, format!("{table}.{name}")))
}

impl TableSnapshot {
    /// Adds a column with an already chosen tag.
    ///
    /// Existing rows read the column's default, or NULL.
    pub fn add_column(
        &self,
        table: &str,
        column: Column,
        order: Option<&ColumnOrder>,
    ) -> Result<TableSnapshot, SnapError> {
        let schema = self.schema();
        if schema.column(&column.name).is_some() {
            return Err(SnapError::already_exists(
                ResourceType::Column,
                format!("{table}.{}", column.name),
            ));
        }
        if column.primary_key {
            return Err(SnapError::UnsupportedOperation(format!(
                "adding primary key column '{}' to '{table}'",
                column.name
            )));
        }
        if schema.used_tags().contains(&column.tag) {
            let owner = schema
                .column_by_tag(column.tag)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "<dropped>".to_string());
            return Err(SnapError::TagInUse {
                tag: column.tag,
                column: owner,
                table: table.to_string(),
            });
        }
        let mut column = column;
        if let Some(default) = &column.default {
            let converted = column
                .col_type
                .convert(default)
                .ok_or_else(|| SnapError::TypeMismatch {
                    column: column.name.clone(),
                    expected: column.col_type.name().to_string(),
                    actual: default.type_name().to_string(),
                })?;
            column.default = Some(converted);
        }
        if !column.nullable && column.default.as_ref().is_none_or(Value::is_null) {
            return Err(SnapError::InvalidArgument(format!(
                "non-nullable column '{}' needs a default",
                column.name
            )));
        }

        let tag = column.tag;
        let fill = column.default.clone().unwrap_or(Value::Null);
        let mut next_schema = schema.clone();
        place_column(&mut next_schema.columns, column, order)?;
        next_schema.validate()?;
        let value_tags = next_schema.value_tags();
        let rows = self.rows().map_entries(|k, v| {
            let value = Tuple::from_fields(value_tags.iter().map(|t| {
                let field = if *t == tag {
                    fill.clone()
                } else {
                    v.get(*t).cloned().unwrap_or(Value::Null)
                };
                (*t, field)
            }));
            (k.clone(), value)
        });
        debug!(table, tag, rows = rows.len(), "added column");
        Ok(TableSnapshot::from_parts(
            next_schema,
            rows,
            self.index_maps().clone(),
        ))
    }

    /// Drops a column and every index that references it. The tag is retired.
    pub fn drop_column(&self, table: &str, name: &str) -> Result<TableSnapshot, SnapError> {
        let column = require_column(self, table, name)?;
        if column.primary_key {
            return Err(SnapError::UnsupportedOperation(format!(
                "dropping primary key column '{}' from '{table}'",
                column.name
            )));
        }
        let tag = column.tag;
        let mut next_schema = self.schema().clone();
        next_schema.columns.retain(|c| c.tag != tag);
        let dropped: Vec<String> = next_schema
            .indexes
            .iter()
            .filter(|i| i.tags.contains(&tag))
            .map(|i| i.name.clone())
            .collect();
        next_schema.indexes.retain(|i| !i.tags.contains(&tag));
        next_schema.retired_tags.insert(tag);
        next_schema.validate()?;

        let mut indexes = self.index_maps().clone();
        for name in &dropped {
            indexes.remove(name);
        }
        let rows = self.rows().map_entries(|k, v| (k.clone(), v.without(tag)));
        if !dropped.is_empty() {
            debug!(table, column = name, indexes = ?dropped, "dropped indexes with column");
        }
        Ok(TableSnapshot::from_parts(next_schema, rows, indexes))
    }

    /// Renames a column in place; tag and data are unchanged.
    pub fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<TableSnapshot, SnapError> {
        let tag = require_column(self, table, from)?.tag;
        if let Some(existing) = self.schema().column(to)
            && existing.tag != tag
        {
            return Err(SnapError::already_exists(
                ResourceType::Column,
                format!("{table}.{to}"),
            ));
        }
        let mut next_schema = self.schema().clone();
        for col in next_schema.columns.iter_mut().filter(|c| c.tag == tag) {
            col.name = to.to_string();
        }
        next_schema.validate()?;
        Ok(self.with_schema_and_indexes(next_schema, self.index_maps().clone()))
    }

    /// Changes a column's name, type, nullability, default or position,
    /// keeping its tag. Stored values are converted and re-validated.
    pub fn modify_column(
        &self,
        table: &str,
        name: &str,
        spec: ColumnSpec,
        order: Option<&ColumnOrder>,
    ) -> Result<TableSnapshot, SnapError> {
        let old = require_column(self, table, name)?.clone();
        if old.primary_key && (old.col_type != spec.col_type || spec.nullable) {
            return Err(SnapError::UnsupportedOperation(format!(
                "changing type or nullability of primary key column '{}'",
                old.name
            )));
        }
        if let Some(tag) = spec.tag
            && tag != old.tag
        {
            return Err(SnapError::UnsupportedOperation(format!(
                "retagging column '{}' from {} to {tag}",
                old.name, old.tag
            )));
        }
        if let Some(existing) = self.schema().column(&spec.name)
            && existing.tag != old.tag
        {
            return Err(SnapError::already_exists(
                ResourceType::Column,
                format!("{table}.{}", spec.name),
            ));
        }
        let column = Column {
            name: spec.name,
            tag: old.tag,
            col_type: spec.col_type,
            nullable: spec.nullable,
            primary_key: old.primary_key,
            default: spec.default,
            comment: spec.comment,
        };
        let mut next_schema = self.schema().clone();
        let pos = next_schema
            .position_of_tag(old.tag)
            .ok_or_else(|| SnapError::InternalInvariantViolation(format!(
                "column tag {} vanished from '{table}'",
                old.tag
            )))?;
        if order.is_some() {
            next_schema.columns.remove(pos);
            place_column(&mut next_schema.columns, column, order)?;
        } else {
            next_schema.columns[pos] = column;
        }

        let tags: Vec<Tag> = next_schema.all_tags();
        let mut rebuilt = TableSnapshot::new(next_schema)?;
        for row in self.scan() {
            let reordered = Row::from_values(
                tags.iter()
                    .map(|t| {
                        self.schema()
                            .position_of_tag(*t)
                            .and_then(|i| row.values.get(i).cloned())
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            );
            rebuilt.apply_insert(table, reordered)?;
        }
        Ok(rebuilt)
    }

    pub fn add_index(&self, table: &str, def: IndexDef) -> Result<TableSnapshot, SnapError> {
        let schema = self.schema();
        if def.name.eq_ignore_ascii_case(PRIMARY_INDEX_ID) || schema.index(&def.name).is_some() {
            return Err(SnapError::already_exists(
                ResourceType::Index,
                format!("{table}.{}", def.name),
            ));
        }
        if def.tags.is_empty() {
            return Err(SnapError::InvalidArgument(format!(
                "index '{}' needs at least one column",
                def.name
            )));
        }
        for tag in &def.tags {
            if schema.column_by_tag(*tag).is_none() {
                return Err(SnapError::not_found(
                    ResourceType::Column,
                    format!("{table} tag {tag}"),
                ));
            }
        }
        if let Some(existing) = schema.indexes.iter().find(|i| i.tags == def.tags) {
            return Err(SnapError::already_exists(
                ResourceType::Index,
                format!("{table}.{} on the same columns", existing.name),
            ));
        }
        let data = self.build_index_data(table, &def)?;
        let mut next_schema = schema.clone();
        let name = def.name.clone();
        next_schema.indexes.push(def);
        next_schema.validate()?;
        let indexes = self.index_maps().update(name, data);
        Ok(self.with_schema_and_indexes(next_schema, indexes))
    }

    pub fn drop_index(&self, table: &str, name: &str) -> Result<TableSnapshot, SnapError> {
        let def_name = self.require_index(table, name)?.name.clone();
        let mut next_schema = self.schema().clone();
        next_schema.indexes.retain(|i| i.name != def_name);
        Ok(self.with_schema_and_indexes(next_schema, self.index_maps().without(&def_name)))
    }

    pub fn rename_index(&self, table: &str, from: &str, to: &str) -> Result<TableSnapshot, SnapError> {
        let def_name = self.require_index(table, from)?.name.clone();
        if to.eq_ignore_ascii_case(PRIMARY_INDEX_ID)
            || self
                .schema()
                .index(to)
                .is_some_and(|i| i.name != def_name)
        {
            return Err(SnapError::already_exists(
                ResourceType::Index,
                format!("{table}.{to}"),
            ));
        }
        let mut next_schema = self.schema().clone();
        for def in next_schema.indexes.iter_mut().filter(|i| i.name == def_name) {
            def.name = to.to_string();
        }
        let mut indexes = self.index_maps().clone();
        if let Some(data) = indexes.remove(&def_name) {
            indexes.insert(to.to_string(), data);
        }
        Ok(self.with_schema_and_indexes(next_schema, indexes))
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::schema::{Column, ColumnOrder, ColumnSpec, IndexDef, Schema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::error::SnapErrorCode;
    use crate::table::TableSnapshot;

    fn people() -> TableSnapshot {
        let schema = Schema::new(vec![
            Column::new("id", 1, ColumnType::Integer).primary_key(),
            Column::new("name", 2, ColumnType::Text),
            Column::new("age", 3, ColumnType::Text),
        ])
        .expect("schema");
        let mut t = TableSnapshot::new(schema).expect("table");
        for (id, name, age) in [(1, "ada", "36"), (2, "bob", "41")] {
            t = t
                .insert_row(
                    "people",
                    Row::from_values(vec![Value::Integer(id), Value::from(name), Value::from(age)]),
                )
                .expect("insert");
        }
        t
    }

    #[test]
    fn add_column_backfills_default_and_respects_order() {
        let t = people();
        let col = Column::new("active", 10, ColumnType::Boolean)
            .not_null()
            .with_default(Value::Boolean(true));
        let next = t
            .add_column("people", col, Some(&ColumnOrder::After("id".into())))
            .expect("add");
        assert_eq!(next.schema().columns[1].name, "active");
        let row = next.get_row(&[Value::Integer(2)]).expect("get").expect("row");
        assert_eq!(row.values[1], Value::Boolean(true));
        assert_eq!(t.schema().columns.len(), 3);
    }

    #[test]
    fn add_column_rejects_pk_missing_default_and_reused_tag() {
        let t = people();
        let err = t
            .add_column("people", Column::new("k", 11, ColumnType::Integer).primary_key(), None)
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UnsupportedOperation);
        let err = t
            .add_column("people", Column::new("k", 11, ColumnType::Integer).not_null(), None)
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::InvalidArgument);
        let err = t
            .add_column("people", Column::new("k", 2, ColumnType::Integer), None)
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::TagInUse);
    }

    #[test]
    fn drop_column_cascades_indexes_and_retires_tag() {
        let t = people()
            .add_index("people", IndexDef::new("by_name", vec![2], false))
            .and_then(|t| t.add_index("people", IndexDef::new("by_age_name", vec![3, 2], false)))
            .and_then(|t| t.add_index("people", IndexDef::new("by_age", vec![3], false)))
            .expect("indexes");
        let next = t.drop_column("people", "NAME").expect("drop");
        assert_eq!(next.schema().indexes.len(), 1);
        assert!(next.index_data("by_name").is_none());
        assert!(next.schema().retired_tags.contains(&2));
        let row = next.get_row(&[Value::Integer(1)]).expect("get").expect("row");
        assert_eq!(row.values, vec![Value::Integer(1), Value::from("36")]);

        let err = t.drop_column("people", "id").unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UnsupportedOperation);
        let err = t.drop_column("people", "nope").unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::ColumnNotFound);
    }

    #[test]
    fn modify_column_converts_values_and_keeps_tag() {
        let t = people()
            .add_index("people", IndexDef::new("by_age", vec![3], false))
            .expect("index");
        let next = t
            .modify_column(
                "people",
                "age",
                ColumnSpec::new("years", ColumnType::Integer).not_null(),
                Some(&ColumnOrder::First),
            )
            .expect("modify");
        assert_eq!(next.schema().columns[0].name, "years");
        assert_eq!(next.schema().columns[0].tag, 3);
        let row = next.get_row(&[Value::Integer(1)]).expect("get").expect("row");
        assert_eq!(row.values[0], Value::Integer(36));
        assert_eq!(next.index_data("by_age").map(|d| d.len()), Some(2));

        let bad = next
            .insert_row(
                "people",
                Row::from_values(vec![Value::Integer(5), Value::Integer(3), Value::from("cy")]),
            )
            .expect("insert");
        let err = bad
            .modify_column("people", "name", ColumnSpec::new("name", ColumnType::Integer), None)
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::TypeMismatch);
    }

    #[test]
    fn index_ddl_validates_names_and_columns() {
        let t = people()
            .add_index("people", IndexDef::new("by_name", vec![2], false))
            .expect("index");
        let err = t
            .add_index("people", IndexDef::new("BY_NAME", vec![3], false))
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::IndexAlreadyExists);
        let err = t
            .add_index("people", IndexDef::new("dup", vec![2], true))
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::IndexAlreadyExists);

        let renamed = t.rename_index("people", "by_name", "names").expect("rename");
        assert!(renamed.index_data("names").is_some());
        assert!(renamed.index_data("by_name").is_none());
        let dropped = renamed.drop_index("people", "NAMES").expect("drop");
        assert!(dropped.schema().indexes.is_empty());
        let err = dropped.drop_index("people", "names").unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::IndexNotFound);
    }

    #[test]
    fn rename_column_keeps_tag_and_rows() {
        let t = people();
        let next = t.rename_column("people", "name", "full_name").expect("rename");
        assert_eq!(next.schema().column("full_name").map(|c| c.tag), Some(2));
        assert_eq!(next.rows(), t.rows());
        let err = t.rename_column("people", "name", "age").unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::ColumnAlreadyExists);
    }
}
