use crate::catalog::types::Value;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Stable numeric column identifier; survives renames.
pub type Tag = u64;

/// A tagged sequence of values used as an ordered-map key or value.
///
/// Ordering is lexicographic over the values; a tuple that is a prefix of
/// another sorts first, which lets a short tuple act as a seek position.
#[derive(Debug, Clone, Default, Hash, Serialize, Deserialize)]
pub struct Tuple {
    fields: SmallVec<[(Tag, Value); 4]>,
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: impl IntoIterator<Item = (Tag, Value)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn push(&mut self, tag: Tag, value: Value) {
        self.fields.push((tag, value));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, tag: Tag) -> Option<&Value> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v)
    }

    pub fn value_at(&self, position: usize) -> Option<&Value> {
        self.fields.get(position).map(|(_, v)| v)
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.fields.iter().map(|(t, _)| *t)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(Tag, Value)] {
        &self.fields
    }

    /// The first `len` fields.
    pub fn prefix(&self, len: usize) -> Tuple {
        Tuple {
            fields: self.fields.iter().take(len).cloned().collect(),
        }
    }

    /// Picks the given tags, in the given order. Missing tags are skipped.
    pub fn project(&self, tags: &[Tag]) -> Tuple {
        Tuple {
            fields: tags
                .iter()
                .filter_map(|tag| self.get(*tag).map(|v| (*tag, v.clone())))
                .collect(),
        }
    }

    pub fn without(&self, tag: Tag) -> Tuple {
        Tuple {
            fields: self.fields.iter().filter(|(t, _)| *t != tag).cloned().collect(),
        }
    }

    pub fn has_null(&self) -> bool {
        self.fields.iter().any(|(_, v)| v.is_null())
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Tuple {}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((ta, va), (tb, vb)) in self.fields.iter().zip(other.fields.iter()) {
            match va.cmp(vb).then(ta.cmp(tb)) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.fields.len().cmp(&other.fields.len())
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, (_, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::Tuple;
    use crate::catalog::types::Value;

    fn t(values: &[i64]) -> Tuple {
        Tuple::from_fields(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (i as u64 + 1, Value::Integer(*v))),
        )
    }

    #[test]
    fn prefix_sorts_before_extensions() {
        assert!(t(&[5]) < t(&[5, i64::MIN]));
        assert!(t(&[5, 9]) < t(&[6]));
        assert!(t(&[4, 100]) < t(&[5]));
    }

    #[test]
    fn project_keeps_requested_order() {
        let tuple = t(&[10, 20, 30]);
        let projected = tuple.project(&[3, 1]);
        assert_eq!(
            projected.values().cloned().collect::<Vec<_>>(),
            vec![Value::Integer(30), Value::Integer(10)]
        );
        assert_eq!(tuple.without(2).len(), 2);
        assert_eq!(tuple.to_string(), "(10, 20, 30)");
    }
}
