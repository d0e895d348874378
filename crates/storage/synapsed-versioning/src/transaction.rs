//! Transactions: atomic, single-entry groups of field operations
//!
//! A [`Transaction`] only records intents. Nothing touches a document until
//! [`crate::VersionedCollection::commit`] resolves the intents against live
//! state and applies them all or none.

use crate::{
    document::Document,
    error::{Result, VersioningError},
    field::FieldValue,
    operation::{Change, OpPayload},
    types::{DocumentId, TransactionId},
};
use bytes::Bytes;
use serde_json::Value;
use std::fmt::{self, Display};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

impl Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Field edit expressed against the visible state
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Set a scalar value
    Assign(Value),
    /// Add an element to a set
    SetAdd(Value),
    /// Remove every observed copy of an element from a set
    SetRemove(Value),
    /// Insert into a list at a visible index
    ListInsert { index: usize, value: Value },
    /// Delete the list element at a visible index
    ListDelete { index: usize },
}

impl Intent {
    /// Turn the intent into a payload against the current field state
    pub(crate) fn resolve(&self, document: &Document, field: &str) -> Result<OpPayload> {
        let current = document.field(field);
        match self {
            Intent::Assign(value) => Ok(OpPayload::Assign {
                value: value.clone(),
            }),
            Intent::SetAdd(value) => Ok(OpPayload::SetAdd {
                value: value.clone(),
            }),
            Intent::SetRemove(value) => {
                let tags = current
                    .and_then(FieldValue::as_set)
                    .map(|set| set.tags_of(value))
                    .unwrap_or_default();
                if tags.is_empty() {
                    return Err(VersioningError::InvalidOperation(format!(
                        "cannot remove {} from {}.{}: element not present",
                        value,
                        document.id(),
                        field
                    )));
                }
                Ok(OpPayload::SetRemove { tags })
            }
            Intent::ListInsert { index, value } => {
                let list = current.and_then(FieldValue::as_list);
                let len = list.map(|l| l.len()).unwrap_or(0);
                if *index > len {
                    return Err(out_of_range(document, field, *index, len));
                }
                let after = match (index, list) {
                    (0, _) | (_, None) => None,
                    (i, Some(list)) => list.id_at(i - 1),
                };
                Ok(OpPayload::ListInsert {
                    after,
                    value: value.clone(),
                })
            }
            Intent::ListDelete { index } => {
                let list = current.and_then(FieldValue::as_list);
                let len = list.map(|l| l.len()).unwrap_or(0);
                match list.and_then(|l| l.id_at(*index)) {
                    Some(target) => Ok(OpPayload::ListDelete { target }),
                    None => Err(out_of_range(document, field, *index, len)),
                }
            }
        }
    }
}

fn out_of_range(document: &Document, field: &str, index: usize, len: usize) -> VersioningError {
    VersioningError::InvalidOperation(format!(
        "index {} out of range for {}.{} (len {})",
        index,
        document.id(),
        field,
        len
    ))
}

/// A staged field edit
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOp {
    pub document_id: DocumentId,
    pub field: String,
    pub intent: Intent,
}

/// Pending group of field edits
///
/// Created by [`crate::VersionedCollection::begin`]; consumed by `commit` or
/// `abort`, so it can never outlive either. Dropping an open transaction
/// discards it like `abort`.
#[derive(Debug)]
#[must_use = "a transaction does nothing until committed"]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    staged: Vec<StagedOp>,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Open,
            staged: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Append an intent
    pub fn stage(
        &mut self,
        document_id: impl Into<DocumentId>,
        field: impl Into<String>,
        intent: Intent,
    ) -> &mut Self {
        self.staged.push(StagedOp {
            document_id: document_id.into(),
            field: field.into(),
            intent,
        });
        self
    }

    pub fn set(
        &mut self,
        document_id: impl Into<DocumentId>,
        field: impl Into<String>,
        value: Value,
    ) -> &mut Self {
        self.stage(document_id, field, Intent::Assign(value))
    }

    pub fn add_to_set(
        &mut self,
        document_id: impl Into<DocumentId>,
        field: impl Into<String>,
        value: Value,
    ) -> &mut Self {
        self.stage(document_id, field, Intent::SetAdd(value))
    }

    pub fn remove_from_set(
        &mut self,
        document_id: impl Into<DocumentId>,
        field: impl Into<String>,
        value: Value,
    ) -> &mut Self {
        self.stage(document_id, field, Intent::SetRemove(value))
    }

    pub fn insert_at(
        &mut self,
        document_id: impl Into<DocumentId>,
        field: impl Into<String>,
        index: usize,
        value: Value,
    ) -> &mut Self {
        self.stage(document_id, field, Intent::ListInsert { index, value })
    }

    pub fn delete_at(
        &mut self,
        document_id: impl Into<DocumentId>,
        field: impl Into<String>,
        index: usize,
    ) -> &mut Self {
        self.stage(document_id, field, Intent::ListDelete { index })
    }

    pub fn staged(&self) -> &[StagedOp] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Touched documents in first-staged order
    pub fn documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = Vec::new();
        for op in &self.staged {
            if !ids.contains(&op.document_id) {
                ids.push(op.document_id.clone());
            }
        }
        ids
    }

    pub(crate) fn finish(mut self, state: TransactionState) -> (TransactionId, Vec<StagedOp>) {
        self.state = state;
        (self.id, std::mem::take(&mut self.staged))
    }
}

/// What a successful commit produced
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub transaction_id: TransactionId,
    pub state: TransactionState,
    /// Counter shared by every operation of the transaction
    pub counter: u64,
    /// One change per touched document
    pub changes: Vec<Change>,
    /// Encoded outbound message per change
    pub messages: Vec<Bytes>,
}
