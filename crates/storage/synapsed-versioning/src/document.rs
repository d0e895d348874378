//! Documents: named fields of CRDT values plus a version vector

use crate::{
    error::{Result, VersioningError},
    field::FieldValue,
    history::{History, HistoryEntry, InverseBuilder, RemoteRecord, UndoConflict, UndoOutcome},
    operation::{Change, Operation},
    types::{ActorId, DocumentId, TransactionId, VersionVector},
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};
use tracing::{debug, info};

/// Result of applying a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Change merged into the document
    Applied,
    /// Change was already incorporated; nothing happened
    AlreadyApplied,
    /// Change targeted a deleted document and was dropped
    Discarded,
}

/// Which history stack a step consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// Operation seqs applied at an actor's latest counter, for actors whose
/// latest change may have arrived one operation at a time
pub type PartialChanges = BTreeMap<ActorId, BTreeSet<u32>>;

/// A versioned record
///
/// A field exists once any operation touched it; absence means "never set".
/// The version vector dominates every change the document incorporated.
/// For an actor listed in `partial`, only the listed operations of its
/// latest counter are incorporated.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    fields: BTreeMap<String, FieldValue>,
    version: VersionVector,
    partial: PartialChanges,
    history: History,
}

impl Document {
    /// Create an empty document
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self::with_history(id, History::default())
    }

    pub fn with_history(id: impl Into<DocumentId>, history: History) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
            version: VersionVector::new(),
            partial: PartialChanges::new(),
            history,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Visible value of a field, `None` if never set
    pub fn value(&self, name: &str) -> Option<Value> {
        self.fields.get(name).map(FieldValue::value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// All visible field values as a JSON object
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value()))
            .collect();
        Value::Object(map)
    }

    pub fn version(&self) -> &VersionVector {
        &self.version
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Operation seqs known at each actor's latest counter
    pub fn partial(&self) -> &PartialChanges {
        &self.partial
    }

    /// Whether operation `seq` of `(actor, counter)` is already incorporated
    pub fn has_applied(&self, actor: &ActorId, counter: u64, seq: u32) -> bool {
        match counter.cmp(&self.version.get(actor)) {
            Ordering::Less => true,
            Ordering::Equal => self
                .partial
                .get(actor)
                .map_or(true, |seen| seen.contains(&seq)),
            Ordering::Greater => false,
        }
    }

    /// Apply a change received from another replica
    ///
    /// Operations already incorporated are skipped, which makes redelivery
    /// harmless. A change at `version[actor]` still applies operations whose
    /// `seq` has not been seen, so a transaction delivered one operation at a
    /// time is not cut short. Unknown fields are created lazily.
    pub fn apply(&mut self, change: &Change) -> Result<ApplyOutcome> {
        change.validate()?;
        if change.document_id != self.id {
            return Err(VersioningError::MalformedOperation(format!(
                "change for {} routed to {}",
                change.document_id, self.id
            )));
        }

        let fresh: Vec<&Operation> = change
            .operations
            .iter()
            .filter(|op| !self.has_applied(&change.actor_id, change.counter, op.seq))
            .collect();
        if fresh.is_empty() {
            debug!(
                "Ignoring stale change {}:{} on {}",
                change.actor_id, change.counter, self.id
            );
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        for op in &fresh {
            self.merge_operation(op);
        }
        let seqs = fresh.iter().map(|op| op.seq);
        if change.counter > self.version.get(&change.actor_id) {
            self.partial.insert(change.actor_id.clone(), seqs.collect());
        } else {
            self.partial
                .entry(change.actor_id.clone())
                .or_default()
                .extend(seqs);
        }
        self.version.observe(&change.actor_id, change.counter);
        self.history.record_remote(RemoteRecord {
            actor: change.actor_id.clone(),
            counter: change.counter,
            fields: fresh.iter().map(|op| op.field.clone()).collect(),
            received_at: Utc::now(),
        });

        debug!(
            "Applied remote change {}:{} to {} ({} of {} ops)",
            change.actor_id,
            change.counter,
            self.id,
            fresh.len(),
            change.operations.len()
        );
        Ok(ApplyOutcome::Applied)
    }

    /// State-based join with another instance of the same document
    pub fn merge(&mut self, other: &Document) {
        for (name, field) in &other.fields {
            let merged = match self.fields.get(name) {
                Some(existing) => existing.merge(field),
                None => field.clone(),
            };
            self.fields.insert(name.clone(), merged);
        }
        self.join_partial(&other.version, &other.partial);
        self.version.merge(&other.version);
    }

    /// Whether this document already holds everything `version` and
    /// `partial` describe
    pub(crate) fn covers_state(&self, version: &VersionVector, partial: &PartialChanges) -> bool {
        self.version.dominates(version)
            && version.iter().all(|(actor, counter)| {
                counter < self.version.get(actor)
                    || match (self.partial.get(actor), partial.get(actor)) {
                        (None, _) => true,
                        (Some(mine), Some(theirs)) => theirs.is_subset(mine),
                        (Some(_), None) => false,
                    }
            })
    }

    /// Combine partial-change tracking with another state before its version
    /// is merged in
    pub(crate) fn join_partial(&mut self, version: &VersionVector, partial: &PartialChanges) {
        for (actor, counter) in version.iter() {
            match counter.cmp(&self.version.get(actor)) {
                Ordering::Greater => match partial.get(actor) {
                    Some(theirs) => {
                        self.partial.insert(actor.clone(), theirs.clone());
                    }
                    None => {
                        self.partial.remove(actor);
                    }
                },
                Ordering::Equal => match partial.get(actor) {
                    Some(theirs) => {
                        if let Some(mine) = self.partial.get_mut(actor) {
                            mine.extend(theirs.iter().copied());
                        }
                    }
                    None => {
                        self.partial.remove(actor);
                    }
                },
                Ordering::Less => {}
            }
        }
    }

    /// Merge one operation's payload into its field
    pub(crate) fn merge_operation(&mut self, op: &Operation) {
        let delta = op.payload.to_delta(&op.id());
        let field = self
            .fields
            .entry(op.field.clone())
            .or_insert_with(|| op.payload.kind().default_value());
        if field.kind() != delta.kind() {
            debug!(
                "Field {}.{} is a {}, {} payload resolved by kind order",
                self.id,
                op.field,
                field.kind(),
                delta.kind()
            );
        }
        *field = field.merge(&delta);
    }

    /// Apply a locally originated operation, capturing its inverse first
    pub(crate) fn apply_local_op(&mut self, op: &Operation, inverse: &mut InverseBuilder) {
        inverse.record(op, self.fields.get(&op.field));
        self.merge_operation(op);
    }

    /// Advance the version for a local change and push it onto the undo stack
    pub(crate) fn seal_local(&mut self, change: &Change, inverse: InverseBuilder) {
        self.version.observe(&change.actor_id, change.counter);
        self.partial.remove(&change.actor_id);
        let entry = HistoryEntry::new(change.clone(), inverse.finish(), self.version.clone());
        self.history.record_local(entry);
    }

    /// Undo or redo one history entry as a new local change
    ///
    /// With `transaction` set, the most recent entry of that transaction is
    /// used instead of the top of the stack.
    pub(crate) fn step(
        &mut self,
        direction: Direction,
        transaction: Option<TransactionId>,
        actor: &ActorId,
        counter: u64,
    ) -> Result<UndoOutcome> {
        let entry = match (direction, transaction) {
            (Direction::Undo, None) => self.history.pop_undo(),
            (Direction::Undo, Some(txn)) => self.history.take_undo(txn),
            (Direction::Redo, None) => self.history.pop_redo(),
            (Direction::Redo, Some(txn)) => self.history.take_redo(txn),
        };
        let Some(entry) = entry else {
            return Ok(UndoOutcome::Empty);
        };
        if let Err(e) = op_seq(entry.inverse.len().saturating_sub(1)) {
            match direction {
                Direction::Undo => self.history.push_undo(entry),
                Direction::Redo => self.history.push_redo(entry),
            }
            return Err(e);
        }

        // Guards are checked against the state before any inverse is applied
        let mut conflicts = Vec::new();
        let mut applicable = Vec::new();
        for inverse in &entry.inverse {
            let Some(guard) = &inverse.guard else {
                applicable.push(inverse);
                continue;
            };
            let current = self
                .fields
                .get(&inverse.field)
                .and_then(FieldValue::as_register)
                .and_then(|register| register.last_write());
            if current.is_some_and(|stamp| self.history.traces_to(stamp, guard)) {
                applicable.push(inverse);
            } else {
                let modified_by = self
                    .history
                    .remote_since(&entry.position, &inverse.field)
                    .last()
                    .map(|record| record.actor.clone())
                    .or_else(|| current.map(|stamp| stamp.actor.clone()));
                conflicts.push(UndoConflict {
                    document_id: self.id.clone(),
                    field: inverse.field.clone(),
                    modified_by,
                });
            }
        }

        if applicable.is_empty() {
            debug!(
                "{:?} of entry {} on {} skipped ({} conflicts)",
                direction,
                entry.id,
                self.id,
                conflicts.len()
            );
            return Ok(UndoOutcome::Skipped { conflicts });
        }

        let operations: Vec<Operation> = applicable
            .iter()
            .zip(0u32..)
            .map(|(inverse, seq)| Operation {
                document_id: self.id.clone(),
                field: inverse.field.clone(),
                actor_id: actor.clone(),
                counter,
                seq,
                payload: inverse.payload.clone(),
            })
            .collect();

        let mut builder = InverseBuilder::default();
        for (op, inverse) in operations.iter().zip(&applicable) {
            self.apply_local_op(op, &mut builder);
            if let Some(original) = &inverse.restores {
                self.history.mark_restored(op.id(), original.clone());
            }
        }
        self.version.observe(actor, counter);
        self.partial.remove(actor);

        let change = Change {
            document_id: self.id.clone(),
            actor_id: actor.clone(),
            counter,
            transaction_id: entry.transaction_id,
            operations,
        };
        let reverse = HistoryEntry::new(change.clone(), builder.finish(), self.version.clone());
        match direction {
            Direction::Undo => self.history.push_redo(reverse),
            Direction::Redo => self.history.push_undo(reverse),
        }

        info!(
            "{:?} on {} applied as change {}:{} ({} conflicts)",
            direction,
            self.id,
            actor,
            counter,
            conflicts.len()
        );
        Ok(UndoOutcome::Applied {
            changes: vec![change],
            conflicts,
        })
    }

    pub(crate) fn fields_mut(&mut self) -> &mut BTreeMap<String, FieldValue> {
        &mut self.fields
    }

    pub(crate) fn version_mut(&mut self) -> &mut VersionVector {
        &mut self.version
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }
}

/// Position of an operation inside its change
pub(crate) fn op_seq(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| {
        VersioningError::InvalidOperation(format!(
            "a change holds at most {} operations",
            u32::MAX as u64 + 1
        ))
    })
}
