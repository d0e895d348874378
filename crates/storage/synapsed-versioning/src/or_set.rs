//! Observed-Remove Set (OR-Set) CRDT implementation
//!
//! Every add carries a unique tag (the [`OpId`] of the add). A remove
//! tombstones the tags it observed, so a concurrent add of the same value
//! under a fresh tag survives. Tombstones are kept even for tags that have
//! not arrived yet, which lets a remove delivered before its add still win.

use crate::{traits::Crdt, types::OpId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
};

/// Observed-Remove Set CRDT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrSet {
    /// Added elements keyed by their unique tag
    #[serde(with = "crate::types::entries")]
    adds: BTreeMap<OpId, Value>,
    /// Removed tags
    removed: BTreeSet<OpId>,
}

impl OrSet {
    /// Create new empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta holding a single add
    pub fn added(tag: OpId, element: Value) -> Self {
        let mut set = Self::new();
        set.adds.insert(tag, element);
        set
    }

    /// Delta holding removals of the given tags
    pub fn removed(tags: impl IntoIterator<Item = OpId>) -> Self {
        Self {
            adds: BTreeMap::new(),
            removed: tags.into_iter().collect(),
        }
    }

    /// Live tags paired with their elements, in tag order
    pub fn live(&self) -> impl Iterator<Item = (&OpId, &Value)> {
        self.adds
            .iter()
            .filter(move |(tag, _)| !self.removed.contains(*tag))
    }

    /// Check if element is in the set
    pub fn contains(&self, element: &Value) -> bool {
        self.live().any(|(_, value)| value == element)
    }

    /// Live tags currently carrying `element`
    pub fn tags_of(&self, element: &Value) -> BTreeSet<OpId> {
        self.live()
            .filter(|(_, value)| *value == element)
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Element stored under a tag, whether live or removed
    pub fn element(&self, tag: &OpId) -> Option<&Value> {
        self.adds.get(tag)
    }

    /// Distinct live elements, ordered by their earliest live tag
    pub fn elements(&self) -> Vec<Value> {
        let mut result: Vec<Value> = Vec::new();
        for (_, value) in self.live() {
            if !result.contains(value) {
                result.push(value.clone());
            }
        }
        result
    }

    /// Get size of the set
    pub fn len(&self) -> usize {
        self.elements().len()
    }

    /// Check if set is empty
    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    /// Number of retained tombstones
    pub fn tombstones(&self) -> usize {
        self.removed.len()
    }
}

impl Crdt for OrSet {
    fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (tag, value) in &other.adds {
            merged.adds.entry(tag.clone()).or_insert_with(|| value.clone());
        }
        merged.removed.extend(other.removed.iter().cloned());
        merged
    }

    fn value(&self) -> Value {
        Value::Array(self.elements())
    }
}

impl Display for OrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elements: Vec<String> = self.elements().iter().map(|e| e.to_string()).collect();
        write!(f, "OR-Set: {{{}}}", elements.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActorId;
    use serde_json::json;

    fn tag(counter: u64, actor: &str) -> OpId {
        OpId::new(counter, ActorId::from(actor), 0)
    }

    #[test]
    fn test_or_set_add_remove() {
        let set = OrSet::added(tag(1, "a"), json!("hello"))
            .merge(&OrSet::added(tag(2, "a"), json!("world")));
        assert_eq!(set.len(), 2);

        let set = set.merge(&OrSet::removed(set.tags_of(&json!("hello"))));
        assert!(!set.contains(&json!("hello")));
        assert!(set.contains(&json!("world")));
        assert_eq!(set.value(), json!(["world"]));
    }

    #[test]
    fn test_or_set_add_wins_over_unobserved_add() {
        // Both actors add the same value, a removes only the tag it observed
        let from_a = OrSet::added(tag(1, "a"), json!("x"));
        let from_b = OrSet::added(tag(1, "b"), json!("x"));
        let removed_by_a = from_a.merge(&OrSet::removed(from_a.tags_of(&json!("x"))));

        let merged = removed_by_a.merge(&from_b);
        assert!(merged.contains(&json!("x")));
        assert_eq!(merged, from_b.merge(&removed_by_a));
    }

    #[test]
    fn test_remove_before_add_stays_removed() {
        let remove = OrSet::removed([tag(1, "a")]);
        let add = OrSet::added(tag(1, "a"), json!("late"));

        assert!(remove.merge(&add).is_empty());
        assert!(add.merge(&remove).is_empty());
        assert_eq!(remove.merge(&add).tombstones(), 1);
    }

    #[test]
    fn test_duplicate_values_listed_once() {
        let set = OrSet::added(tag(1, "a"), json!(7)).merge(&OrSet::added(tag(1, "b"), json!(7)));
        assert_eq!(set.elements(), vec![json!(7)]);
        assert_eq!(set.tags_of(&json!(7)).len(), 2);
    }
}
