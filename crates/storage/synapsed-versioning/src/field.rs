//! Per-field conflict-free values
//!
//! [`FieldValue`] is a closed union over the supported CRDTs. Every merge
//! path matches exhaustively, so adding a variant forces every call site to
//! handle it.

use crate::{lww_register::LwwRegister, or_set::OrSet, rga::Rga, traits::Crdt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// Kind of a field value
///
/// Ordered `Register < Set < List`. When two replicas disagree on the kind
/// of a field the higher kind is kept, which keeps `merge` total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Register,
    Set,
    List,
}

impl FieldKind {
    /// Empty value of this kind, used when a field is initialized lazily
    pub fn default_value(self) -> FieldValue {
        match self {
            FieldKind::Register => FieldValue::Register(LwwRegister::new()),
            FieldKind::Set => FieldValue::Set(OrSet::new()),
            FieldKind::List => FieldValue::List(Rga::new()),
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Register => "register",
            FieldKind::Set => "set",
            FieldKind::List => "list",
        };
        f.write_str(name)
    }
}

/// Conflict-free value of one document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum FieldValue {
    /// Last-writer-wins scalar
    Register(LwwRegister),
    /// Observed-remove set
    Set(OrSet),
    /// Ordered list
    List(Rga),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Register(_) => FieldKind::Register,
            FieldValue::Set(_) => FieldKind::Set,
            FieldValue::List(_) => FieldKind::List,
        }
    }

    /// Join two values. Pure: neither input is modified.
    pub fn merge(&self, other: &FieldValue) -> FieldValue {
        match (self, other) {
            (FieldValue::Register(a), FieldValue::Register(b)) => FieldValue::Register(a.merge(b)),
            (FieldValue::Set(a), FieldValue::Set(b)) => FieldValue::Set(a.merge(b)),
            (FieldValue::List(a), FieldValue::List(b)) => FieldValue::List(a.merge(b)),
            (a, b) => {
                if a.kind() > b.kind() {
                    a.clone()
                } else {
                    b.clone()
                }
            }
        }
    }

    /// User-visible value
    pub fn value(&self) -> Value {
        match self {
            FieldValue::Register(register) => register.value(),
            FieldValue::Set(set) => set.value(),
            FieldValue::List(list) => list.value(),
        }
    }

    pub fn as_register(&self) -> Option<&LwwRegister> {
        match self {
            FieldValue::Register(register) => Some(register),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&OrSet> {
        match self {
            FieldValue::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rga> {
        match self {
            FieldValue::List(list) => Some(list),
            _ => None,
        }
    }
}

impl Crdt for FieldValue {
    fn merge(&self, other: &Self) -> Self {
        FieldValue::merge(self, other)
    }

    fn value(&self) -> Value {
        FieldValue::value(self)
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Register(register) => Display::fmt(register, f),
            FieldValue::Set(set) => Display::fmt(set, f),
            FieldValue::List(list) => Display::fmt(list, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActorId, OpId};
    use serde_json::json;

    #[test]
    fn test_kind_mismatch_keeps_higher_kind() {
        let register = FieldValue::Register(LwwRegister::written(
            json!("scalar"),
            OpId::new(9, ActorId::from("a"), 0),
        ));
        let set = FieldValue::Set(OrSet::added(
            OpId::new(1, ActorId::from("b"), 0),
            json!("member"),
        ));

        assert_eq!(register.merge(&set), set);
        assert_eq!(set.merge(&register), set);
    }

    #[test]
    fn test_default_values_are_empty() {
        assert_eq!(FieldKind::Register.default_value().value(), Value::Null);
        assert_eq!(FieldKind::Set.default_value().value(), json!([]));
        assert_eq!(FieldKind::List.default_value().value(), json!([]));
    }
}
