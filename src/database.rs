use crate::catalog::schema::{
    Column, ColumnOrder, ColumnSpec, IndexDef, IndexSpec, Schema, generate_tag,
};
use crate::config::{EditMode, SnapConfig};
use crate::error::{ResourceType, SnapError, SnapErrorCode};
use crate::hooks::{CommitEvent, CommitHook, CommitHookPipeline};
use crate::storage::address::Address;
use crate::storage::commit_store::CommitStore;
use crate::storage::root::{RootRef, RootSnapshot, RootSnapshotProvider};
use crate::storage::tuple::Tag;
use crate::table::{
    RowDeleter, RowInserter, RowReplacer, RowUpdater, Table, TableEditor, TableSnapshot,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Edit lifecycle of one table within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Clean,
    Editing { pending: usize },
    /// Edits were folded into the root and not yet committed.
    Flushed,
}

/// A session over one versioned database: the current root plus open
/// editors. Every change produces a new root; earlier roots stay valid.
pub struct Database {
    name: String,
    config: SnapConfig,
    store: Arc<dyn CommitStore>,
    root: RootSnapshot,
    editors: HashMap<String, TableEditor>,
    flushed: HashSet<String>,
    hooks: CommitHookPipeline,
}

impl Database {
    pub fn new(name: &str, store: Arc<dyn CommitStore>, config: SnapConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            store,
            root: RootSnapshot::new(),
            editors: HashMap::new(),
            flushed: HashSet::new(),
            hooks: CommitHookPipeline::default(),
        }
    }

    /// Opens a session at the dataset's working root, or its head, or empty
    /// when the dataset does not exist yet.
    pub fn open(
        name: &str,
        store: Arc<dyn CommitStore>,
        config: SnapConfig,
        dataset: &str,
    ) -> Result<Self, SnapError> {
        let provider = RootSnapshotProvider::new(Arc::clone(&store));
        let root = match provider.resolve(&RootRef::WorkingSet(dataset.to_string())) {
            Ok(root) => root,
            Err(e) if e.code() == SnapErrorCode::DatasetNotFound => RootSnapshot::new(),
            Err(e) => return Err(e),
        };
        let mut db = Self::new(name, store, config);
        db.root = root;
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CommitStore> {
        &self.store
    }

    /// The current root, excluding unflushed edits.
    pub fn root(&self) -> &RootSnapshot {
        &self.root
    }

    /// Replaces the current root. Open editors are discarded.
    pub fn set_root(&mut self, root: RootSnapshot) {
        let pending: usize = self.editors.values().map(TableEditor::pending_edits).sum();
        if pending > 0 {
            warn!(database = %self.name, pending, "discarding unflushed edits on root change");
        }
        self.editors.clear();
        self.flushed.clear();
        self.root = root;
    }

    pub fn set_commit_hooks(&mut self, hooks: Vec<CommitHook>) {
        self.hooks = CommitHookPipeline::new(hooks);
    }

    pub fn commit_hooks(&self) -> &CommitHookPipeline {
        &self.hooks
    }

    pub fn table_names(&self) -> Vec<String> {
        self.root.table_names()
    }

    fn resolve_name(&self, name: &str) -> Result<String, SnapError> {
        self.root
            .table_insensitive(name)
            .map(|(n, _)| n.to_string())
            .ok_or_else(|| SnapError::not_found(ResourceType::Table, name))
    }

    fn current_snapshot(&self, canonical: &str) -> Result<TableSnapshot, SnapError> {
        if let Some(editor) = self.editors.get(canonical) {
            return Ok(editor.snapshot().clone());
        }
        self.root
            .table(canonical)
            .cloned()
            .ok_or_else(|| SnapError::not_found(ResourceType::Table, canonical))
    }

    /// Read view including this session's unflushed edits.
    pub fn table_insensitive(&self, name: &str) -> Option<Table> {
        let canonical = self.resolve_name(name).ok()?;
        let snapshot = self.current_snapshot(&canonical).ok()?;
        Some(Table::new(&canonical, snapshot, self.config.clone()))
    }

    pub fn table(&self, name: &str) -> Result<Table, SnapError> {
        self.table_insensitive(name)
            .ok_or_else(|| SnapError::not_found(ResourceType::Table, name))
    }

    pub fn table_state(&self, name: &str) -> TableState {
        let Ok(canonical) = self.resolve_name(name) else {
            return TableState::Clean;
        };
        if let Some(editor) = self.editors.get(&canonical) {
            TableState::Editing {
                pending: editor.pending_edits(),
            }
        } else if self.flushed.contains(&canonical) {
            TableState::Flushed
        } else {
            TableState::Clean
        }
    }

    fn editor(&mut self, name: &str) -> Result<&mut TableEditor, SnapError> {
        let canonical = self.resolve_name(name)?;
        if !self.editors.contains_key(&canonical) {
            let base = self.current_snapshot(&canonical)?;
            debug!(table = %canonical, "editing started");
            self.editors
                .insert(canonical.clone(), TableEditor::new(&canonical, base));
        }
        self.editors
            .get_mut(&canonical)
            .ok_or_else(|| SnapError::InternalInvariantViolation(format!(
                "editor for '{canonical}' vanished"
            )))
    }

    pub fn inserter(&mut self, table: &str) -> Result<RowInserter<'_>, SnapError> {
        Ok(RowInserter::new(self.editor(table)?))
    }

    pub fn deleter(&mut self, table: &str) -> Result<RowDeleter<'_>, SnapError> {
        Ok(RowDeleter::new(self.editor(table)?))
    }

    pub fn replacer(&mut self, table: &str) -> Result<RowReplacer<'_>, SnapError> {
        Ok(RowReplacer::new(self.editor(table)?))
    }

    pub fn updater(&mut self, table: &str) -> Result<RowUpdater<'_>, SnapError> {
        Ok(RowUpdater::new(self.editor(table)?))
    }

    /// Ends a statement. In statement mode open editors are flushed, in
    /// batched mode they are checkpointed.
    pub fn statement_complete(&mut self) -> Result<(), SnapError> {
        match self.config.edit_mode {
            EditMode::Statement => self.flush().map(|_| ()),
            EditMode::Batched => {
                for editor in self.editors.values_mut() {
                    editor.checkpoint();
                }
                Ok(())
            }
        }
    }

    /// Rolls back every edit made since the last statement boundary.
    ///
    /// Call this when a statement fails part way. Editors left without
    /// pending edits are closed. Returns the number of edits dropped.
    pub fn discard_statement(&mut self) -> usize {
        let mut discarded = 0;
        for editor in self.editors.values_mut() {
            discarded += editor.discard_statement();
        }
        self.editors.retain(|_, editor| editor.pending_edits() > 0);
        if discarded > 0 {
            debug!(database = %self.name, discarded, "discarded statement edits");
        }
        discarded
    }

    /// Folds every open editor into a new root. Returns the flushed tables.
    pub fn flush(&mut self) -> Result<Vec<String>, SnapError> {
        let mut names: Vec<String> = self.editors.keys().cloned().collect();
        names.sort();
        for name in &names {
            self.flush_table(name);
        }
        Ok(names)
    }

    fn flush_table(&mut self, canonical: &str) {
        if let Some(editor) = self.editors.remove(canonical) {
            let pending = editor.pending_edits();
            self.root = self.root.with_table(canonical, editor.finish());
            self.flushed.insert(canonical.to_string());
            debug!(table = canonical, pending, "flushed editor");
        }
    }

    /// Applies a DDL change to one table as a new root.
    fn alter<F>(&mut self, table: &str, change: F) -> Result<(), SnapError>
    where
        F: FnOnce(&str, &TableSnapshot, &RootSnapshot) -> Result<TableSnapshot, SnapError>,
    {
        let canonical = self.resolve_name(table)?;
        self.flush_table(&canonical);
        let current = self.current_snapshot(&canonical)?;
        let next = change(&canonical, &current, &self.root)?;
        self.root = self.root.with_table(&canonical, next);
        Ok(())
    }

    fn check_tag_free(&self, tag: Tag, column: &str, table: &str) -> Result<(), SnapError> {
        if let Some((owner_table, owner_column)) = self.root.tag_owner(tag) {
            return Err(SnapError::TagInUse {
                tag,
                column: owner_column,
                table: owner_table,
            });
        }
        if self.root.tag_used(tag) {
            return Err(SnapError::TagInUse {
                tag,
                column: column.to_string(),
                table: table.to_string(),
            });
        }
        Ok(())
    }

    fn all_used_tags(&self) -> BTreeSet<Tag> {
        self.root
            .tables()
            .flat_map(|(_, t)| t.schema().used_tags())
            .collect()
    }

    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<(), SnapError> {
        if self.root.table_insensitive(name).is_some() {
            return Err(SnapError::already_exists(ResourceType::Table, name));
        }
        for col in &schema.columns {
            self.check_tag_free(col.tag, &col.name, name)?;
        }
        let table = TableSnapshot::new(schema)?;
        self.root = self.root.with_table(name, table);
        info!(table = name, "created table");
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), SnapError> {
        let canonical = self.resolve_name(name)?;
        self.editors.remove(&canonical);
        self.flushed.remove(&canonical);
        self.root = self.root.without_table(&canonical);
        info!(table = %canonical, "dropped table");
        Ok(())
    }

    pub fn rename_table(&mut self, old: &str, new: &str) -> Result<(), SnapError> {
        if old == new {
            return Ok(());
        }
        let canonical = self.resolve_name(old)?;
        if let Some((existing, _)) = self.root.table_insensitive(new)
            && existing != canonical
        {
            return Err(SnapError::already_exists(ResourceType::Table, new));
        }
        self.flush_table(&canonical);
        let table = self.current_snapshot(&canonical)?;
        self.root = self.root.without_table(&canonical).with_table(new, table);
        if self.flushed.remove(&canonical) {
            self.flushed.insert(new.to_string());
        }
        info!(from = %canonical, to = new, "renamed table");
        Ok(())
    }

    /// Adds a column and returns its tag.
    pub fn add_column(
        &mut self,
        table: &str,
        spec: ColumnSpec,
        order: Option<ColumnOrder>,
    ) -> Result<Tag, SnapError> {
        let canonical = self.resolve_name(table)?;
        let tag = match spec.tag {
            Some(tag) => {
                self.check_tag_free(tag, &spec.name, &canonical)?;
                tag
            }
            None => generate_tag(&canonical, &spec.name, spec.col_type, &self.all_used_tags()),
        };
        let column = Column {
            name: spec.name,
            tag,
            col_type: spec.col_type,
            nullable: spec.nullable,
            primary_key: spec.primary_key,
            default: spec.default,
            comment: spec.comment,
        };
        self.alter(&canonical, |name, current, _| {
            current.add_column(name, column, order.as_ref())
        })?;
        Ok(tag)
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<(), SnapError> {
        self.alter(table, |name, current, _| current.drop_column(name, column))
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<(), SnapError> {
        self.alter(table, |name, current, _| current.rename_column(name, from, to))
    }

    pub fn modify_column(
        &mut self,
        table: &str,
        column: &str,
        spec: ColumnSpec,
        order: Option<ColumnOrder>,
    ) -> Result<(), SnapError> {
        self.alter(table, |name, current, _| {
            current.modify_column(name, column, spec, order.as_ref())
        })
    }

    pub fn create_index(&mut self, table: &str, spec: IndexSpec) -> Result<(), SnapError> {
        self.alter(table, |name, current, _| {
            let mut tags = Vec::with_capacity(spec.columns.len());
            for col_name in &spec.columns {
                let col = current.schema().column(col_name).ok_or_else(|| {
                    SnapError::not_found(ResourceType::Column, format!("{name}.{col_name}"))
                })?;
                if tags.contains(&col.tag) {
                    return Err(SnapError::InvalidArgument(format!(
                        "column '{col_name}' listed twice in index '{}'",
                        spec.name
                    )));
                }
                tags.push(col.tag);
            }
            let mut def = IndexDef::new(&spec.name, tags, spec.unique);
            def.comment = spec.comment.clone();
            current.add_index(name, def)
        })
    }

    pub fn drop_index(&mut self, table: &str, index: &str) -> Result<(), SnapError> {
        self.alter(table, |name, current, _| current.drop_index(name, index))
    }

    pub fn rename_index(&mut self, table: &str, from: &str, to: &str) -> Result<(), SnapError> {
        self.alter(table, |name, current, _| current.rename_index(name, from, to))
    }

    /// Flushes, persists the root as the dataset's new head and runs the
    /// commit hooks. Hook failures are logged, never returned.
    pub async fn commit(&mut self, dataset: &str, message: &str) -> Result<Address, SnapError> {
        self.flush()?;
        let head = self.store.commit_root(dataset, &self.root, message)?;
        self.store.set_working_set(dataset, &self.root)?;
        self.flushed.clear();
        info!(database = %self.name, dataset, head = %head, "committed");
        let event = CommitEvent {
            dataset: dataset.to_string(),
            head: Some(head),
            source: Arc::clone(&self.store),
        };
        self.hooks.run(&event).await;
        Ok(head)
    }

    /// Deletes a dataset and tells the hooks, which propagate the delete.
    pub async fn delete_dataset(&mut self, dataset: &str) -> Result<(), SnapError> {
        self.store.delete_dataset(dataset)?;
        info!(database = %self.name, dataset, "deleted dataset");
        let event = CommitEvent {
            dataset: dataset.to_string(),
            head: None,
            source: Arc::clone(&self.store),
        };
        self.hooks.run(&event).await;
        Ok(())
    }

    /// Stops background replication started by the hooks.
    pub async fn close(&self) -> Result<(), SnapError> {
        self.hooks.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, TableState};
    use crate::catalog::schema::{Column, ColumnSpec, Schema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::config::{EditMode, SnapConfig};
    use crate::error::SnapErrorCode;
    use crate::storage::commit_store::MemoryCommitStore;
    use std::sync::Arc;

    fn db(mode: EditMode) -> Database {
        let mut db = Database::new(
            "test",
            Arc::new(MemoryCommitStore::new()),
            SnapConfig::default().with_edit_mode(mode),
        );
        db.create_table(
            "Items",
            Schema::new(vec![
                Column::new("id", 1, ColumnType::Integer).primary_key(),
                Column::new("label", 2, ColumnType::Text),
            ])
            .expect("schema"),
        )
        .expect("create");
        db
    }

    fn item(id: i64, label: &str) -> Row {
        Row::from_values(vec![Value::Integer(id), Value::from(label)])
    }

    #[test]
    fn statement_mode_flushes_at_statement_end() {
        let mut db = db(EditMode::Statement);
        assert_eq!(db.table_state("items"), TableState::Clean);
        db.inserter("items").expect("inserter").insert(item(1, "a")).expect("insert");
        assert_eq!(db.table_state("ITEMS"), TableState::Editing { pending: 1 });
        assert_eq!(db.root().table("Items").map(|t| t.row_count()), Some(0));
        assert_eq!(db.table("items").expect("table").row_count(), 1);

        db.statement_complete().expect("statement");
        assert_eq!(db.table_state("items"), TableState::Flushed);
        assert_eq!(db.root().table("Items").map(|t| t.row_count()), Some(1));
    }

    #[test]
    fn batched_mode_keeps_editor_across_statements() {
        let mut db = db(EditMode::Batched);
        db.inserter("items").expect("inserter").insert(item(1, "a")).expect("insert");
        db.statement_complete().expect("statement");
        db.replacer("items").expect("replacer").replace(item(1, "b")).expect("replace");
        db.statement_complete().expect("statement");
        assert_eq!(db.table_state("items"), TableState::Editing { pending: 2 });
        assert_eq!(db.flush().expect("flush"), vec!["Items".to_string()]);
        let rows: Vec<Row> = db.table("items").expect("table").rows().collect();
        assert_eq!(rows, vec![item(1, "b")]);
    }

    #[test]
    fn failed_statement_is_discarded_in_statement_mode() {
        let mut db = db(EditMode::Statement);
        {
            let mut ins = db.inserter("items").expect("inserter");
            ins.insert(item(1, "a")).expect("insert");
            let err = ins.insert(item(1, "b")).unwrap_err();
            assert_eq!(err.code(), SnapErrorCode::DuplicatePrimaryKey);
        }
        assert_eq!(db.discard_statement(), 1);
        assert_eq!(db.table_state("items"), TableState::Clean);
        db.statement_complete().expect("statement");
        assert_eq!(db.root().table("Items").map(|t| t.row_count()), Some(0));
    }

    #[test]
    fn failed_statement_is_discarded_in_batched_mode() {
        let mut db = db(EditMode::Batched);
        db.inserter("items").expect("inserter").insert(item(1, "a")).expect("insert");
        db.statement_complete().expect("statement");
        {
            let mut ins = db.inserter("items").expect("inserter");
            ins.insert(item(2, "b")).expect("insert");
            assert!(ins.insert(item(1, "c")).is_err());
        }
        assert_eq!(db.discard_statement(), 1);
        assert_eq!(db.table_state("items"), TableState::Editing { pending: 1 });

        db.flush().expect("flush");
        let rows: Vec<Row> = db.table("items").expect("table").rows().collect();
        assert_eq!(rows, vec![item(1, "a")]);
    }

    #[test]
    fn ddl_flushes_pending_edits_first() {
        let mut db = db(EditMode::Batched);
        db.inserter("items").expect("inserter").insert(item(1, "a")).expect("insert");
        let tag = db
            .add_column(
                "items",
                ColumnSpec::new("qty", ColumnType::Integer).with_default(Value::Integer(0)),
                None,
            )
            .expect("add column");
        assert!(tag > 2);
        let row = db
            .table("items")
            .expect("table")
            .snapshot()
            .get_row(&[Value::Integer(1)])
            .expect("get")
            .expect("row");
        assert_eq!(row.values[2], Value::Integer(0));
    }

    #[test]
    fn table_name_rules() {
        let mut db = db(EditMode::Statement);
        let err = db
            .create_table(
                "ITEMS",
                Schema::new(vec![Column::new("id", 9, ColumnType::Integer).primary_key()])
                    .expect("schema"),
            )
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::TableAlreadyExists);

        let err = db
            .create_table(
                "other",
                Schema::new(vec![Column::new("id", 1, ColumnType::Integer).primary_key()])
                    .expect("schema"),
            )
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::TagInUse);

        db.rename_table("Items", "Items").expect("no-op rename");
        db.rename_table("items", "goods").expect("rename");
        assert_eq!(db.table_names(), vec!["goods".to_string()]);
        db.drop_table("GOODS").expect("drop");
        assert!(db.table_names().is_empty());
        let err = db.drop_table("goods").unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::TableNotFound);
    }
}
