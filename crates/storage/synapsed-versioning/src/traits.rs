//! Core traits shared by the field CRDTs

use serde_json::Value;

/// State-based CRDT
///
/// `merge` must be commutative, associative and idempotent. It never mutates
/// its inputs; callers replace the stored state with the returned value.
pub trait Crdt: Clone + PartialEq {
    /// Join this state with another replica's state
    fn merge(&self, other: &Self) -> Self;

    /// User-visible value of the state
    fn value(&self) -> Value;
}

/// Laws every [`Crdt`] must satisfy, checked by the test suites
pub mod laws {
    use super::Crdt;

    /// `merge(a, b) == merge(b, a)`
    pub fn commutative<T: Crdt>(a: &T, b: &T) -> bool {
        a.merge(b) == b.merge(a)
    }

    /// `merge(merge(a, b), c) == merge(a, merge(b, c))`
    pub fn associative<T: Crdt>(a: &T, b: &T, c: &T) -> bool {
        a.merge(b).merge(c) == a.merge(&b.merge(c))
    }

    /// `merge(a, a) == a`
    pub fn idempotent<T: Crdt>(a: &T) -> bool {
        a.merge(a) == *a
    }
}
