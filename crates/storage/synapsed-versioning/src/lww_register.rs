//! Last-Writer-Wins Register CRDT implementation
//!
//! LWW-Register stores a single value with the [`OpId`] of the write that
//! produced it. The higher `(counter, actor, seq)` stamp wins a conflict.

use crate::{traits::Crdt, types::OpId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// Last-Writer-Wins Register CRDT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister {
    /// Current value
    pub value: Value,
    /// Stamp of the winning write, `None` until first written
    pub stamp: Option<OpId>,
}

impl LwwRegister {
    /// Create new empty register
    pub fn new() -> Self {
        Self::default()
    }

    /// Register holding a single write
    pub fn written(value: Value, stamp: OpId) -> Self {
        Self {
            value,
            stamp: Some(stamp),
        }
    }

    /// Get current value
    pub fn get(&self) -> &Value {
        &self.value
    }

    /// Check if register was never written
    pub fn is_empty(&self) -> bool {
        self.stamp.is_none()
    }

    /// Stamp of the last winning write
    pub fn last_write(&self) -> Option<&OpId> {
        self.stamp.as_ref()
    }
}

impl Crdt for LwwRegister {
    fn merge(&self, other: &Self) -> Self {
        // Option orders None below any Some, so an unwritten register always loses
        if other.stamp > self.stamp {
            other.clone()
        } else {
            self.clone()
        }
    }

    fn value(&self) -> Value {
        self.value.clone()
    }
}

impl Display for LwwRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stamp {
            Some(stamp) => write!(f, "LWW: {} ({})", self.value, stamp),
            None => write!(f, "LWW: empty"),
        }
    }
}
