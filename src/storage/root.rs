use crate::error::{ResourceType, SnapError};
use crate::storage::address::Address;
use crate::storage::commit_store::CommitStore;
use crate::storage::tuple::Tag;
use crate::table::TableSnapshot;
use im::OrdMap;
use std::sync::Arc;

/// Immutable map from table name to table snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootSnapshot {
    tables: OrdMap<String, TableSnapshot>,
}

impl RootSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.get(name)
    }

    /// Exact match first, then the first case-insensitive match.
    pub fn table_insensitive(&self, name: &str) -> Option<(&str, &TableSnapshot)> {
        self.tables
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
            })
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableSnapshot)> + '_ {
        self.tables.iter()
    }

    pub fn with_table(&self, name: &str, table: TableSnapshot) -> RootSnapshot {
        RootSnapshot {
            tables: self.tables.update(name.to_string(), table),
        }
    }

    pub fn without_table(&self, name: &str) -> RootSnapshot {
        RootSnapshot {
            tables: self.tables.without(name),
        }
    }

    /// Table and column currently owning `tag`, if any.
    pub fn tag_owner(&self, tag: Tag) -> Option<(String, String)> {
        self.tables.iter().find_map(|(name, t)| {
            t.schema()
                .column_by_tag(tag)
                .map(|c| (name.clone(), c.name.clone()))
        })
    }

    /// Whether any table uses or has retired `tag`.
    pub fn tag_used(&self, tag: Tag) -> bool {
        self.tables
            .values()
            .any(|t| t.schema().used_tags().contains(&tag))
    }

    pub(crate) fn from_tables(tables: OrdMap<String, TableSnapshot>) -> Self {
        Self { tables }
    }
}

/// Names a root to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootRef {
    /// Root of the head commit of a dataset.
    Head(String),
    /// Uncommitted working root of a dataset, falling back to its head.
    WorkingSet(String),
    Commit(Address),
}

/// Resolves named roots through a commit store.
#[derive(Clone)]
pub struct RootSnapshotProvider {
    store: Arc<dyn CommitStore>,
}

impl RootSnapshotProvider {
    pub fn new(store: Arc<dyn CommitStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CommitStore> {
        &self.store
    }

    pub fn resolve(&self, root: &RootRef) -> Result<RootSnapshot, SnapError> {
        match root {
            RootRef::Commit(addr) => {
                let commit = self.store.load_commit(addr)?;
                self.store.load_root(&commit.root)
            }
            RootRef::Head(dataset) => {
                let head = self
                    .store
                    .resolve_commit_ref(dataset)?
                    .ok_or_else(|| SnapError::not_found(ResourceType::Dataset, dataset.clone()))?;
                let commit = self.store.load_commit(&head)?;
                self.store.load_root(&commit.root)
            }
            RootRef::WorkingSet(dataset) => match self.store.resolve_working_set(dataset)? {
                Some(root) => Ok(root),
                None => self.resolve(&RootRef::Head(dataset.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RootSnapshot;
    use crate::catalog::schema::{Column, Schema};
    use crate::catalog::types::ColumnType;
    use crate::table::TableSnapshot;

    fn table(tag: u64) -> TableSnapshot {
        TableSnapshot::new(
            Schema::new(vec![Column::new("id", tag, ColumnType::Integer).primary_key()])
                .expect("schema"),
        )
        .expect("table")
    }

    #[test]
    fn with_and_without_do_not_alias() {
        let empty = RootSnapshot::new();
        let one = empty.with_table("Users", table(1));
        let two = one.with_table("orders", table(2));
        assert!(empty.is_empty());
        assert_eq!(one.table_names(), vec!["Users".to_string()]);
        assert_eq!(two.len(), 2);
        assert_eq!(two.without_table("Users").len(), 1);
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn case_insensitive_lookup_and_tag_owner() {
        let root = RootSnapshot::new().with_table("Users", table(7));
        assert_eq!(root.table_insensitive("users").map(|(n, _)| n), Some("Users"));
        assert!(root.table("users").is_none());
        assert_eq!(
            root.tag_owner(7),
            Some(("Users".to_string(), "id".to_string()))
        );
        assert!(root.tag_used(7));
        assert!(!root.tag_used(8));
    }
}
