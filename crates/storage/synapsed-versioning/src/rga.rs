//! Replicated Growable Array (RGA) for ordered list fields
//!
//! Each element remembers the element it was inserted after (its origin).
//! The visible order is a pre-order walk of that origin tree where siblings
//! are ordered by descending [`OpId`], so the newest insert after an element
//! lands immediately behind it. Deletes tombstone element ids; tombstoned
//! elements keep anchoring their children.

use crate::{traits::Crdt, types::OpId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
};

/// RGA element with its insertion origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListElement {
    /// Element this one was inserted after, `None` for the list head
    pub origin: Option<OpId>,
    /// Element content
    pub value: Value,
}

/// Replicated Growable Array CRDT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rga {
    /// Every element ever inserted
    #[serde(with = "crate::types::entries")]
    elements: BTreeMap<OpId, ListElement>,
    /// Tombstoned element ids
    removed: BTreeSet<OpId>,
}

impl Rga {
    /// Create new empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta holding a single insert
    pub fn inserted(id: OpId, origin: Option<OpId>, value: Value) -> Self {
        let mut list = Self::new();
        list.elements.insert(id, ListElement { origin, value });
        list
    }

    /// Delta holding a single tombstone
    pub fn deleted(target: OpId) -> Self {
        let mut list = Self::new();
        list.removed.insert(target);
        list
    }

    /// Ids of all reachable elements in document order, tombstones included
    pub fn order(&self) -> Vec<OpId> {
        let mut children: BTreeMap<Option<&OpId>, Vec<&OpId>> = BTreeMap::new();
        for (id, element) in &self.elements {
            children.entry(element.origin.as_ref()).or_default().push(id);
        }

        // Ascending id order per sibling group; pushing onto the stack in that
        // order pops the highest id first
        let mut order = Vec::with_capacity(self.elements.len());
        let mut stack: Vec<&OpId> = children.get(&None).cloned().unwrap_or_default();
        while let Some(id) = stack.pop() {
            order.push(id.clone());
            if let Some(kids) = children.get(&Some(id)) {
                stack.extend(kids.iter().copied());
            }
        }
        order
    }

    /// Visible element ids in document order
    pub fn visible_ids(&self) -> Vec<OpId> {
        self.order()
            .into_iter()
            .filter(|id| !self.removed.contains(id))
            .collect()
    }

    /// Visible values in document order
    pub fn values(&self) -> Vec<Value> {
        self.visible_ids()
            .iter()
            .filter_map(|id| self.elements.get(id).map(|e| e.value.clone()))
            .collect()
    }

    /// Id of the visible element at `index`
    pub fn id_at(&self, index: usize) -> Option<OpId> {
        self.visible_ids().into_iter().nth(index)
    }

    /// Look up an element, visible or not
    pub fn element(&self, id: &OpId) -> Option<&ListElement> {
        self.elements.get(id)
    }

    /// Whether `id` is present and not tombstoned
    pub fn is_visible(&self, id: &OpId) -> bool {
        self.elements.contains_key(id) && !self.removed.contains(id)
    }

    /// Visible length
    pub fn len(&self) -> usize {
        self.visible_ids().len()
    }

    /// Check if no element is visible
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Crdt for Rga {
    fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (id, element) in &other.elements {
            merged
                .elements
                .entry(id.clone())
                .or_insert_with(|| element.clone());
        }
        merged.removed.extend(other.removed.iter().cloned());
        merged
    }

    fn value(&self) -> Value {
        Value::Array(self.values())
    }
}

impl Display for Rga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values().iter().map(|v| v.to_string()).collect();
        write!(f, "RGA: [{}]", values.join(", "))
    }
}
