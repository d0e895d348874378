//! Operations and changes
//!
//! An [`Operation`] targets one field of one document. Operations that one
//! actor commits together against one document travel as a [`Change`] and
//! share the same `(actor, counter)` dot.

use crate::{
    clock::MAX_COUNTER,
    error::{Result, VersioningError},
    field::{FieldKind, FieldValue},
    lww_register::LwwRegister,
    or_set::OrSet,
    rga::Rga,
    types::{ActorId, DocumentId, OpId, TransactionId},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// CRDT-specific payload of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpPayload {
    /// Write a register value
    Assign { value: Value },
    /// Add an element to a set under the operation's tag
    SetAdd { value: Value },
    /// Tombstone observed set tags
    SetRemove { tags: BTreeSet<OpId> },
    /// Insert a list element after `after` (`None` for the head)
    ListInsert { after: Option<OpId>, value: Value },
    /// Tombstone a list element
    ListDelete { target: OpId },
}

impl OpPayload {
    /// Kind of field this payload applies to
    pub fn kind(&self) -> FieldKind {
        match self {
            OpPayload::Assign { .. } => FieldKind::Register,
            OpPayload::SetAdd { .. } | OpPayload::SetRemove { .. } => FieldKind::Set,
            OpPayload::ListInsert { .. } | OpPayload::ListDelete { .. } => FieldKind::List,
        }
    }

    /// State delta equivalent to this payload stamped with `id`
    ///
    /// Applying an operation is exactly `field.merge(&delta)`.
    pub fn to_delta(&self, id: &OpId) -> FieldValue {
        match self {
            OpPayload::Assign { value } => {
                FieldValue::Register(LwwRegister::written(value.clone(), id.clone()))
            }
            OpPayload::SetAdd { value } => FieldValue::Set(OrSet::added(id.clone(), value.clone())),
            OpPayload::SetRemove { tags } => FieldValue::Set(OrSet::removed(tags.iter().cloned())),
            OpPayload::ListInsert { after, value } => {
                FieldValue::List(Rga::inserted(id.clone(), after.clone(), value.clone()))
            }
            OpPayload::ListDelete { target } => FieldValue::List(Rga::deleted(target.clone())),
        }
    }
}

/// A single field operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub document_id: DocumentId,
    pub field: String,
    pub actor_id: ActorId,
    pub counter: u64,
    /// Index inside the originating change
    #[serde(default)]
    pub seq: u32,
    pub payload: OpPayload,
}

impl Operation {
    /// Identity of this operation
    pub fn id(&self) -> OpId {
        OpId::new(self.counter, self.actor_id.clone(), self.seq)
    }
}

/// Operations one actor committed atomically against one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub document_id: DocumentId,
    pub actor_id: ActorId,
    pub counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    pub operations: Vec<Operation>,
}

impl Change {
    /// Wrap a single operation
    pub fn single(operation: Operation) -> Self {
        Self {
            document_id: operation.document_id.clone(),
            actor_id: operation.actor_id.clone(),
            counter: operation.counter,
            transaction_id: None,
            operations: vec![operation],
        }
    }

    /// Check that every operation shares the change header
    pub fn validate(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(VersioningError::MalformedOperation(
                "change carries no operations".to_string(),
            ));
        }
        if self.counter == 0 {
            return Err(VersioningError::MalformedOperation(
                "counter must be positive".to_string(),
            ));
        }
        if self.counter > MAX_COUNTER {
            return Err(VersioningError::MalformedOperation(format!(
                "counter {} exceeds {}",
                self.counter, MAX_COUNTER
            )));
        }
        let mut seqs = BTreeSet::new();
        for op in &self.operations {
            if !seqs.insert(op.seq) {
                return Err(VersioningError::MalformedOperation(format!(
                    "operation seq {} repeated in change {}:{}",
                    op.seq, self.actor_id, self.counter
                )));
            }
            if op.document_id != self.document_id
                || op.actor_id != self.actor_id
                || op.counter != self.counter
            {
                return Err(VersioningError::MalformedOperation(format!(
                    "operation on {}/{} does not match change header {}@{}:{}",
                    op.document_id, op.field, self.actor_id, self.document_id, self.counter
                )));
            }
        }
        Ok(())
    }

    /// Names of the fields this change touches
    pub fn fields(&self) -> BTreeSet<String> {
        self.operations.iter().map(|op| op.field.clone()).collect()
    }
}
