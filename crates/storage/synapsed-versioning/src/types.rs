//! Core identifier and version vector types

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{self, Display},
};
use uuid::Uuid;

/// Opaque replica/session identifier, assigned by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Create a new random actor ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Document identifier within a collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&DocumentId> for DocumentId {
    fn from(id: &DocumentId) -> Self {
        id.clone()
    }
}

/// Identifier grouping the changes of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identity of a single operation
///
/// Doubles as the write timestamp of register values and as the element
/// identity of set tags and list elements. Ordered by `(counter, actor, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    /// Logical counter of the originating change
    pub counter: u64,
    /// Originating actor
    pub actor: ActorId,
    /// Index of the operation inside its change
    #[serde(default)]
    pub seq: u32,
}

impl OpId {
    pub fn new(counter: u64, actor: ActorId, seq: u32) -> Self {
        Self { counter, actor, seq }
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{}", self.counter, self.actor, self.seq)
    }
}

/// Per-actor logical clocks used for causal order and duplicate detection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector {
    clocks: BTreeMap<ActorId, u64>,
}

impl VersionVector {
    /// Create empty version vector
    pub fn new() -> Self {
        Self::default()
    }

    /// Get counter for an actor
    pub fn get(&self, actor: &ActorId) -> u64 {
        self.clocks.get(actor).copied().unwrap_or(0)
    }

    /// Raise an actor's counter to `counter` if it is higher
    pub fn observe(&mut self, actor: &ActorId, counter: u64) {
        let current = self.clocks.entry(actor.clone()).or_insert(0);
        *current = (*current).max(counter);
    }

    /// Whether `(actor, counter)` is already covered by this vector
    pub fn covers(&self, actor: &ActorId, counter: u64) -> bool {
        counter <= self.get(actor)
    }

    /// Merge with another vector (take maximum of each clock)
    pub fn merge(&mut self, other: &VersionVector) {
        for (actor, &counter) in &other.clocks {
            self.observe(actor, counter);
        }
    }

    /// Highest counter of any actor
    pub fn max_counter(&self) -> u64 {
        self.clocks.values().copied().max().unwrap_or(0)
    }

    /// Compare with another version vector
    pub fn compare(&self, other: &VersionVector) -> VectorComparison {
        let mut less_than = false;
        let mut greater_than = false;

        for actor in self.clocks.keys().chain(other.clocks.keys()) {
            match self.get(actor).cmp(&other.get(actor)) {
                Ordering::Less => less_than = true,
                Ordering::Greater => greater_than = true,
                Ordering::Equal => {}
            }
        }

        match (less_than, greater_than) {
            (false, false) => VectorComparison::Equal,
            (true, false) => VectorComparison::Before,
            (false, true) => VectorComparison::After,
            (true, true) => VectorComparison::Concurrent,
        }
    }

    /// Whether this vector is greater than or equal to `other` component-wise
    pub fn dominates(&self, other: &VersionVector) -> bool {
        matches!(
            self.compare(other),
            VectorComparison::After | VectorComparison::Equal
        )
    }

    /// Check if vectors are concurrent
    pub fn is_concurrent(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), VectorComparison::Concurrent)
    }

    /// Actors and counters in this vector
    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, u64)> {
        self.clocks.iter().map(|(actor, &counter)| (actor, counter))
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }
}

impl Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .clocks
            .iter()
            .map(|(actor, counter)| format!("{}:{}", actor, counter))
            .collect();
        write!(f, "[{}]", entries.join(", "))
    }
}

/// Version vector comparison result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorComparison {
    Before,
    After,
    Equal,
    Concurrent,
}

/// Serde helper storing maps with structured keys as `[key, value]` pairs
///
/// JSON object keys must be strings, so maps keyed by [`OpId`] go over the
/// wire as sequences.
pub(crate) mod entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_id_orders_by_counter_then_actor() {
        let a = ActorId::from("a");
        let b = ActorId::from("b");

        assert!(OpId::new(1, b.clone(), 0) < OpId::new(2, a.clone(), 0));
        assert!(OpId::new(1, a.clone(), 0) < OpId::new(1, b.clone(), 0));
        assert!(OpId::new(1, a.clone(), 0) < OpId::new(1, a, 1));
    }

    #[test]
    fn test_version_vector_compare() {
        let a = ActorId::from("a");
        let b = ActorId::from("b");

        let mut v1 = VersionVector::new();
        let mut v2 = VersionVector::new();
        assert_eq!(v1.compare(&v2), VectorComparison::Equal);

        v1.observe(&a, 1);
        assert_eq!(v1.compare(&v2), VectorComparison::After);
        assert_eq!(v2.compare(&v1), VectorComparison::Before);

        v2.observe(&b, 1);
        assert!(v1.is_concurrent(&v2));

        v1.merge(&v2);
        assert!(v1.dominates(&v2));
        assert_eq!(v1.max_counter(), 1);
    }

    #[test]
    fn test_observe_never_lowers() {
        let a = ActorId::from("a");
        let mut v = VersionVector::new();
        v.observe(&a, 5);
        v.observe(&a, 3);
        assert_eq!(v.get(&a), 5);
        assert!(v.covers(&a, 5));
        assert!(!v.covers(&a, 6));
    }
}
