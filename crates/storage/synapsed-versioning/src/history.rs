//! Undo/redo history
//!
//! Every [`crate::Document`] owns one [`History`]: an undo stack and a redo
//! stack of locally originated entries plus an append-only log of remote
//! changes. Remote changes are never undoable locally; the log only lets undo
//! tell who overwrote a field after the original edit.

use crate::{
    field::FieldValue,
    operation::{Change, OpPayload, Operation},
    types::{ActorId, DocumentId, OpId, TransactionId, VersionVector},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Default number of entries kept on each stack
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Template of an operation that reverts part of a change
///
/// Ids are assigned when the inverse is applied, so the undo itself is an
/// ordinary local change that replicates and merges like any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseOp {
    pub field: String,
    pub payload: OpPayload,
    /// Register write that must still be current for this inverse to apply
    pub guard: Option<OpId>,
    /// Register write whose value this inverse puts back
    #[serde(default)]
    pub restores: Option<OpId>,
}

/// One undoable unit of local work on a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub transaction_id: Option<TransactionId>,
    /// The change as it was applied
    pub change: Change,
    /// Inverse operations, in the order they must be applied
    pub inverse: Vec<InverseOp>,
    /// Document version right after the change was applied
    pub position: VersionVector,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(change: Change, inverse: Vec<InverseOp>, position: VersionVector) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: change.transaction_id,
            change,
            inverse,
            position,
            recorded_at: Utc::now(),
        }
    }
}

/// Remote change incorporated into a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub actor: ActorId,
    pub counter: u64,
    pub fields: BTreeSet<String>,
    pub received_at: DateTime<Utc>,
}

/// Field whose undo was skipped because a later write replaced the edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoConflict {
    pub document_id: DocumentId,
    pub field: String,
    pub modified_by: Option<ActorId>,
}

/// Result of an undo or redo
#[derive(Debug, Clone, PartialEq)]
pub enum UndoOutcome {
    /// Inverse applied as new local changes, one per touched document
    Applied {
        changes: Vec<Change>,
        conflicts: Vec<UndoConflict>,
    },
    /// Entry consumed but every inverse was blocked by a later write
    Skipped { conflicts: Vec<UndoConflict> },
    /// Nothing to undo or redo
    Empty,
}

impl UndoOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UndoOutcome::Applied { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, UndoOutcome::Empty)
    }

    /// Changes produced by this step
    pub fn changes(&self) -> &[Change] {
        match self {
            UndoOutcome::Applied { changes, .. } => changes,
            _ => &[],
        }
    }

    pub fn conflicts(&self) -> &[UndoConflict] {
        match self {
            UndoOutcome::Applied { conflicts, .. } | UndoOutcome::Skipped { conflicts } => {
                conflicts
            }
            UndoOutcome::Empty => &[],
        }
    }

    /// Fold the outcome for another document of the same transaction into this one
    pub(crate) fn absorb(self, other: UndoOutcome) -> UndoOutcome {
        let (mut changes, mut conflicts) = self.into_parts();
        let (more_changes, more_conflicts) = other.into_parts();
        let nothing = changes.is_empty() && more_changes.is_empty();
        changes.extend(more_changes);
        conflicts.extend(more_conflicts);

        if !nothing {
            UndoOutcome::Applied { changes, conflicts }
        } else if !conflicts.is_empty() {
            UndoOutcome::Skipped { conflicts }
        } else {
            UndoOutcome::Empty
        }
    }

    fn into_parts(self) -> (Vec<Change>, Vec<UndoConflict>) {
        match self {
            UndoOutcome::Applied { changes, conflicts } => (changes, conflicts),
            UndoOutcome::Skipped { conflicts } => (Vec::new(), conflicts),
            UndoOutcome::Empty => (Vec::new(), Vec::new()),
        }
    }
}

/// Accumulates inverse operations while a change is applied
///
/// Must see each operation together with the field state right before it.
/// Repeated register writes in one change collapse into a single inverse that
/// restores the value from before the first write, guarded by the last one.
#[derive(Debug, Default)]
pub(crate) struct InverseBuilder {
    ops: Vec<InverseOp>,
    registers: BTreeMap<String, usize>,
}

impl InverseBuilder {
    pub fn record(&mut self, op: &Operation, before: Option<&FieldValue>) {
        let id = op.id();
        match &op.payload {
            OpPayload::Assign { .. } => {
                if let Some(&index) = self.registers.get(&op.field) {
                    self.ops[index].guard = Some(id);
                    return;
                }
                // A register never written before is restored as `null`
                let register = before.and_then(FieldValue::as_register);
                let prior = register
                    .map(|register| register.get().clone())
                    .unwrap_or_default();
                self.registers.insert(op.field.clone(), self.ops.len());
                self.push(&op.field, OpPayload::Assign { value: prior }, Some(id));
                if let Some(last) = self.ops.last_mut() {
                    last.restores = register.and_then(|register| register.last_write()).cloned();
                }
            }
            OpPayload::SetAdd { .. } => {
                let tags = BTreeSet::from([id]);
                self.push(&op.field, OpPayload::SetRemove { tags }, None);
            }
            OpPayload::SetRemove { tags } => {
                let Some(set) = before.and_then(FieldValue::as_set) else {
                    return;
                };
                let mut restored = Vec::new();
                for tag in tags {
                    if let Some(value) = set.element(tag) {
                        if set.tags_of(value).contains(tag) && !restored.contains(value) {
                            restored.push(value.clone());
                        }
                    }
                }
                for value in restored {
                    self.push(&op.field, OpPayload::SetAdd { value }, None);
                }
            }
            OpPayload::ListInsert { .. } => {
                self.push(&op.field, OpPayload::ListDelete { target: id }, None);
            }
            OpPayload::ListDelete { target } => {
                let Some(list) = before.and_then(FieldValue::as_list) else {
                    return;
                };
                if let (true, Some(element)) = (list.is_visible(target), list.element(target)) {
                    // Re-inserting behind the tombstone puts the value back in place
                    let payload = OpPayload::ListInsert {
                        after: Some(target.clone()),
                        value: element.value.clone(),
                    };
                    self.push(&op.field, payload, None);
                }
            }
        }
    }

    fn push(&mut self, field: &str, payload: OpPayload, guard: Option<OpId>) {
        self.ops.push(InverseOp {
            field: field.to_string(),
            payload,
            guard,
            restores: None,
        });
    }

    /// Inverses in application order (last operation reverted first)
    pub fn finish(self) -> Vec<InverseOp> {
        let mut ops = self.ops;
        ops.reverse();
        ops
    }
}

/// Per-document undo/redo stacks and remote change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    remote_log: Vec<RemoteRecord>,
    /// Undo/redo writes mapped to the register write they restored
    #[serde(with = "crate::types::entries", default)]
    restored: BTreeMap<OpId, OpId>,
    max_depth: usize,
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            remote_log: Vec::new(),
            restored: BTreeMap::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Whether the register write `current` is `guard`, or an undo/redo
    /// chain leading back to it
    pub fn traces_to(&self, current: &OpId, guard: &OpId) -> bool {
        let mut stamp = current;
        loop {
            if stamp == guard {
                return true;
            }
            match self.restored.get(stamp) {
                Some(previous) => stamp = previous,
                None => return false,
            }
        }
    }

    /// Remember that `write` put back the value of `original`
    pub(crate) fn mark_restored(&mut self, write: OpId, original: OpId) {
        self.restored.insert(write, original);
    }

    /// Record a new local action. Invalidates the redo branch.
    pub fn record_local(&mut self, entry: HistoryEntry) {
        let discarded = !self.redo.is_empty();
        self.redo.clear();
        self.push_undo(entry);
        if discarded {
            self.prune_restored();
        }
    }

    /// Push onto the undo stack without touching redo
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
        if Self::trim(&mut self.undo, self.max_depth) {
            self.prune_restored();
        }
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
        if Self::trim(&mut self.redo, self.max_depth) {
            self.prune_restored();
        }
    }

    /// Keep only entries recorded by `actor`, capped at `max_depth`
    ///
    /// Used when a document built on another replica is adopted, so its
    /// author's edits do not become undoable here.
    pub fn retain_actor(&mut self, actor: &ActorId, max_depth: usize) {
        self.max_depth = max_depth.max(1);
        self.undo.retain(|entry| &entry.change.actor_id == actor);
        self.redo.retain(|entry| &entry.change.actor_id == actor);
        Self::trim(&mut self.undo, self.max_depth);
        Self::trim(&mut self.redo, self.max_depth);
        self.prune_restored();
    }

    /// Number of undo/redo writes remembered for guard tracing
    pub fn restored_len(&self) -> usize {
        self.restored.len()
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// Remove the most recent undo entry belonging to `transaction`
    pub fn take_undo(&mut self, transaction: TransactionId) -> Option<HistoryEntry> {
        Self::take(&mut self.undo, transaction)
    }

    /// Remove the most recent redo entry belonging to `transaction`
    pub fn take_redo(&mut self, transaction: TransactionId) -> Option<HistoryEntry> {
        Self::take(&mut self.redo, transaction)
    }

    pub fn peek_undo(&self) -> Option<&HistoryEntry> {
        self.undo.last()
    }

    pub fn peek_redo(&self) -> Option<&HistoryEntry> {
        self.redo.last()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Append a remote change to the log
    pub fn record_remote(&mut self, record: RemoteRecord) {
        self.remote_log.push(record);
    }

    pub fn remote_log(&self) -> &[RemoteRecord] {
        &self.remote_log
    }

    /// Remote edits to `field` that `position` had not seen
    pub fn remote_since<'a>(
        &'a self,
        position: &'a VersionVector,
        field: &'a str,
    ) -> impl Iterator<Item = &'a RemoteRecord> + 'a {
        self.remote_log.iter().filter(move |record| {
            !position.covers(&record.actor, record.counter) && record.fields.contains(field)
        })
    }

    fn take(stack: &mut Vec<HistoryEntry>, transaction: TransactionId) -> Option<HistoryEntry> {
        let index = stack
            .iter()
            .rposition(|entry| entry.transaction_id == Some(transaction))?;
        Some(stack.remove(index))
    }

    /// Drop restore links that no longer lead to the guard of any entry
    fn prune_restored(&mut self) {
        let guards: BTreeSet<&OpId> = self
            .undo
            .iter()
            .chain(&self.redo)
            .flat_map(|entry| entry.inverse.iter())
            .filter_map(|inverse| inverse.guard.as_ref())
            .collect();
        let live: BTreeSet<OpId> = self
            .restored
            .keys()
            .filter(|write| guards.iter().any(|guard| self.traces_to(write, guard)))
            .cloned()
            .collect();
        self.restored.retain(|write, _| live.contains(write));
    }

    /// Drop the oldest entries beyond `max_depth`; true if any were dropped
    fn trim(stack: &mut Vec<HistoryEntry>, max_depth: usize) -> bool {
        if stack.len() <= max_depth {
            return false;
        }
        let excess = stack.len() - max_depth;
        stack.drain(..excess);
        true
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}
