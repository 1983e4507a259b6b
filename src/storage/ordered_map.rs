use crate::storage::tuple::Tuple;
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Persistent sorted map from key tuples to value tuples.
///
/// Clones share structure; writes through `&mut self` only copy the touched
/// path, so every clone taken before a write keeps seeing the old contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedMap {
    entries: OrdMap<Tuple, Tuple>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Tuple) -> Option<&Tuple> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &Tuple) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: Tuple, value: Tuple) -> Option<Tuple> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &Tuple) -> Option<Tuple> {
        self.entries.remove(key)
    }

    /// Returns a new map with `key` set; `self` is unchanged.
    pub fn with(&self, key: Tuple, value: Tuple) -> OrderedMap {
        OrderedMap {
            entries: self.entries.update(key, value),
        }
    }

    /// Returns a new map without `key`; `self` is unchanged.
    pub fn without(&self, key: &Tuple) -> OrderedMap {
        OrderedMap {
            entries: self.entries.without(key),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, &Tuple)> + '_ {
        self.entries.iter()
    }

    pub fn range(
        &self,
        lower: Bound<Tuple>,
        upper: Bound<Tuple>,
    ) -> impl Iterator<Item = (&Tuple, &Tuple)> + '_ {
        self.entries.range((lower, upper))
    }

    /// First entry at or after `position`, owned.
    ///
    /// Used by cursors that must not borrow the map across calls.
    pub fn seek(&self, position: &Bound<Tuple>) -> Option<(Tuple, Tuple)> {
        self.entries
            .range((position.clone(), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    /// True when any key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &Tuple) -> bool {
        self.seek(&Bound::Included(prefix.clone()))
            .is_some_and(|(k, _)| k.prefix(prefix.len()) == *prefix)
    }

    /// Rewrites every entry; used by schema changes that reshape rows.
    pub fn map_entries<F>(&self, mut f: F) -> OrderedMap
    where
        F: FnMut(&Tuple, &Tuple) -> (Tuple, Tuple),
    {
        OrderedMap {
            entries: self.entries.iter().map(|(k, v)| f(k, v)).collect(),
        }
    }
}

impl FromIterator<(Tuple, Tuple)> for OrderedMap {
    fn from_iter<I: IntoIterator<Item = (Tuple, Tuple)>>(iter: I) -> Self {
        OrderedMap {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OrderedMap;
    use crate::catalog::types::Value;
    use crate::storage::tuple::Tuple;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::ops::Bound;

    fn key(v: i64) -> Tuple {
        Tuple::from_fields([(1, Value::Integer(v))])
    }

    #[test]
    fn with_and_without_leave_original_untouched() {
        let base: OrderedMap = (0..10).map(|i| (key(i), Tuple::new())).collect();
        let added = base.with(key(42), Tuple::new());
        let removed = base.without(&key(3));
        assert_eq!(base.len(), 10);
        assert_eq!(added.len(), 11);
        assert_eq!(removed.len(), 9);
        assert!(base.contains_key(&key(3)));
    }

    #[test]
    fn seek_and_prefix() {
        let map: OrderedMap = [(5, 1), (5, 2), (7, 1)]
            .into_iter()
            .map(|(a, b)| {
                (
                    Tuple::from_fields([(1, Value::Integer(a)), (2, Value::Integer(b))]),
                    Tuple::new(),
                )
            })
            .collect();
        let (first, _) = map.seek(&Bound::Included(key(5))).expect("entry");
        assert_eq!(first.value_at(1), Some(&Value::Integer(1)));
        assert!(map.has_prefix(&key(7)));
        assert!(!map.has_prefix(&key(6)));
        assert!(map.seek(&Bound::Excluded(key(8))).is_none());
    }

    proptest! {
        #[test]
        fn iteration_matches_btreemap(ops in prop::collection::vec((any::<bool>(), 0i64..64), 0..128)) {
            let mut map = OrderedMap::new();
            let mut model = BTreeMap::new();
            for (insert, k) in ops {
                if insert {
                    map.insert(key(k), key(k * 2));
                    model.insert(k, k * 2);
                } else {
                    map.remove(&key(k));
                    model.remove(&k);
                }
            }
            let got: Vec<(Tuple, Tuple)> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let want: Vec<(Tuple, Tuple)> = model.into_iter().map(|(k, v)| (key(k), key(v))).collect();
            prop_assert_eq!(got, want);
        }
    }
}
