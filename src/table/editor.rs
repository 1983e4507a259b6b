use crate::catalog::types::Row;
use crate::error::SnapError;
use crate::table::TableSnapshot;

/// Accumulates row edits for one table on a private working copy.
///
/// The snapshot the editor started from is never touched; `finish` hands
/// back the edited copy as a new snapshot. A checkpoint taken at each
/// statement boundary lets a failed statement be rolled back on its own.
#[derive(Debug, Clone)]
pub struct TableEditor {
    table: String,
    base: TableSnapshot,
    working: TableSnapshot,
    pending: usize,
    checkpoint: TableSnapshot,
    checkpoint_pending: usize,
}

impl TableEditor {
    pub fn new(table: &str, base: TableSnapshot) -> Self {
        Self {
            table: table.to_string(),
            working: base.clone(),
            checkpoint: base.clone(),
            base,
            pending: 0,
            checkpoint_pending: 0,
        }
    }

    /// Marks the end of a statement; its edits survive a later discard.
    pub fn checkpoint(&mut self) {
        self.checkpoint = self.working.clone();
        self.checkpoint_pending = self.pending;
    }

    /// Drops edits made since the last checkpoint. Returns how many.
    pub fn discard_statement(&mut self) -> usize {
        let discarded = self.pending - self.checkpoint_pending;
        self.working = self.checkpoint.clone();
        self.pending = self.checkpoint_pending;
        discarded
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pending_edits(&self) -> usize {
        self.pending
    }

    /// Current state including unflushed edits.
    pub fn snapshot(&self) -> &TableSnapshot {
        &self.working
    }

    pub fn base(&self) -> &TableSnapshot {
        &self.base
    }

    pub fn insert(&mut self, row: Row) -> Result<(), SnapError> {
        self.working.apply_insert(&self.table, row)?;
        self.pending += 1;
        Ok(())
    }

    pub fn replace(&mut self, row: Row) -> Result<(), SnapError> {
        self.working.apply_upsert(&self.table, row)?;
        self.pending += 1;
        Ok(())
    }

    pub fn update(&mut self, old: &Row, new: Row) -> Result<(), SnapError> {
        self.working.apply_update(&self.table, old, new)?;
        self.pending += 1;
        Ok(())
    }

    /// Returns whether a row with that key existed.
    pub fn delete(&mut self, row: &Row) -> Result<bool, SnapError> {
        let removed = self.working.apply_delete(&self.table, row)?;
        if removed {
            self.pending += 1;
        }
        Ok(removed)
    }

    pub fn finish(self) -> TableSnapshot {
        self.working
    }
}

pub struct RowInserter<'a> {
    editor: &'a mut TableEditor,
}

pub struct RowDeleter<'a> {
    editor: &'a mut TableEditor,
}

pub struct RowReplacer<'a> {
    editor: &'a mut TableEditor,
}

pub struct RowUpdater<'a> {
    editor: &'a mut TableEditor,
}

impl<'a> RowInserter<'a> {
    pub(crate) fn new(editor: &'a mut TableEditor) -> Self {
        Self { editor }
    }

    pub fn insert(&mut self, row: Row) -> Result<(), SnapError> {
        self.editor.insert(row)
    }
}

impl<'a> RowDeleter<'a> {
    pub(crate) fn new(editor: &'a mut TableEditor) -> Self {
        Self { editor }
    }

    pub fn delete(&mut self, row: &Row) -> Result<bool, SnapError> {
        self.editor.delete(row)
    }
}

impl<'a> RowReplacer<'a> {
    pub(crate) fn new(editor: &'a mut TableEditor) -> Self {
        Self { editor }
    }

    pub fn replace(&mut self, row: Row) -> Result<(), SnapError> {
        self.editor.replace(row)
    }
}

impl<'a> RowUpdater<'a> {
    pub(crate) fn new(editor: &'a mut TableEditor) -> Self {
        Self { editor }
    }

    pub fn update(&mut self, old: &Row, new: Row) -> Result<(), SnapError> {
        self.editor.update(old, new)
    }
}
