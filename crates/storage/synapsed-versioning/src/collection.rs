//! Versioned collection: the owner and sole mutator of documents

use crate::{
    clock::LamportClock,
    codec::{Codec, WireMessage},
    config::VersioningConfig,
    document::{op_seq, ApplyOutcome, Direction, Document},
    error::{Result, VersioningError},
    history::{History, InverseBuilder, UndoOutcome},
    operation::{Change, Operation},
    store::DocumentStore,
    sync::DocumentDelta,
    transaction::{CommitReceipt, StagedOp, Transaction, TransactionState},
    types::{ActorId, DocumentId, TransactionId, VersionVector},
};
use bytes::Bytes;
use serde_json::Value;
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Tally of a [`VersionedCollection::drain_inbound`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundReport {
    pub applied: usize,
    pub stale: usize,
    pub discarded: usize,
    pub rejected: usize,
}

impl InboundReport {
    pub fn total(&self) -> usize {
        self.applied + self.stale + self.discarded + self.rejected
    }

    pub(crate) fn record(&mut self, result: &Result<ApplyOutcome>) {
        match result {
            Ok(ApplyOutcome::Applied) => self.applied += 1,
            Ok(ApplyOutcome::AlreadyApplied) => self.stale += 1,
            Ok(ApplyOutcome::Discarded) => self.discarded += 1,
            Err(_) => self.rejected += 1,
        }
    }
}

/// Keyed set of documents replicated by one actor
///
/// All mutation goes through here: local edits via transactions, remote
/// changes via `apply_remote*`, and undo/redo. Exactly one [`Document`]
/// instance exists per id. Deleted ids are remembered so late remote changes
/// cannot bring them back.
#[derive(Debug)]
pub struct VersionedCollection {
    name: String,
    clock: LamportClock,
    config: VersioningConfig,
    codec: Codec,
    documents: BTreeMap<DocumentId, Document>,
    deleted: BTreeSet<DocumentId>,
    outbound: Option<UnboundedSender<Bytes>>,
}

impl VersionedCollection {
    pub fn new(name: impl Into<String>, actor: ActorId, config: VersioningConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            clock: LamportClock::new(actor),
            codec: Codec::new(config.protocol_version),
            config,
            documents: BTreeMap::new(),
            deleted: BTreeSet::new(),
            outbound: None,
        })
    }

    /// Collection with default configuration
    pub fn with_defaults(name: impl Into<String>, actor: ActorId) -> Self {
        let config = VersioningConfig::default();
        Self {
            name: name.into(),
            clock: LamportClock::new(actor),
            codec: Codec::new(config.protocol_version),
            config,
            documents: BTreeMap::new(),
            deleted: BTreeSet::new(),
            outbound: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actor(&self) -> &ActorId {
        self.clock.actor_id()
    }

    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Latest logical counter issued or observed
    pub fn clock(&self) -> u64 {
        self.clock.current()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    pub fn get(&self, id: impl Into<DocumentId>) -> Option<&Document> {
        self.documents.get(&id.into())
    }

    pub fn contains(&self, id: impl Into<DocumentId>) -> bool {
        self.documents.contains_key(&id.into())
    }

    pub fn is_deleted(&self, id: impl Into<DocumentId>) -> bool {
        self.deleted.contains(&id.into())
    }

    /// Get or create an empty document
    pub fn create(&mut self, id: impl Into<DocumentId>) -> &Document {
        let id = id.into();
        self.deleted.remove(&id);
        let max_depth = self.config.history.max_depth;
        self.documents
            .entry(id.clone())
            .or_insert_with(|| Document::with_history(id, History::new(max_depth)))
    }

    /// Insert a document, merging into the existing instance with the same id
    ///
    /// Only state is merged into an existing instance. A new document keeps
    /// just the history entries this actor recorded, so edits made elsewhere
    /// never become locally undoable.
    pub fn insert(&mut self, mut document: Document) -> &Document {
        let id = document.id().clone();
        self.deleted.remove(&id);
        self.clock.observe_vector(document.version());
        match self.documents.entry(id) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                existing.merge(&document);
                existing
            }
            Entry::Vacant(entry) => {
                document
                    .history_mut()
                    .retain_actor(self.clock.actor_id(), self.config.history.max_depth);
                entry.insert(document)
            }
        }
    }

    /// Remove a document; later remote changes for its id are discarded
    pub fn delete(&mut self, id: impl Into<DocumentId>) -> Option<Document> {
        let id = id.into();
        let removed = self.documents.remove(&id);
        if removed.is_some() {
            info!("Deleted document {} from {}", id, self.name);
        }
        self.deleted.insert(id);
        removed
    }

    /// Apply one remote operation
    pub fn apply_remote(&mut self, operation: &Operation) -> Result<ApplyOutcome> {
        self.apply_remote_change(&Change::single(operation.clone()))
    }

    /// Apply one remote change
    ///
    /// Stale and duplicate changes are `AlreadyApplied`, never errors.
    pub fn apply_remote_change(&mut self, change: &Change) -> Result<ApplyOutcome> {
        change.validate()?;
        let Some(document) = self.route(&change.document_id)? else {
            return Ok(ApplyOutcome::Discarded);
        };
        let outcome = document.apply(change)?;
        self.clock.observe(change.counter);
        Ok(outcome)
    }

    /// Merge a state delta from another replica
    pub fn apply_remote_delta(&mut self, delta: &DocumentDelta) -> Result<ApplyOutcome> {
        let Some(document) = self.route(&delta.document_id)? else {
            return Ok(ApplyOutcome::Discarded);
        };
        let outcome = document.merge_delta(delta)?;
        self.clock.observe_vector(&delta.version);
        Ok(outcome)
    }

    /// Decode an inbound message and apply it
    pub fn apply_remote_bytes(&mut self, bytes: &[u8]) -> Result<ApplyOutcome> {
        let message = self.codec.decode_message(bytes).map_err(|e| {
            warn!("Dropping undecodable message on {}: {}", self.name, e);
            e
        })?;
        let result = match &message {
            WireMessage::Operation(operation) => self.apply_remote(operation),
            WireMessage::Change(change) => self.apply_remote_change(change),
            WireMessage::Delta(delta) => self.apply_remote_delta(delta),
        };
        if let Err(e) = &result {
            warn!("Rejected inbound {} on {}: {}", message.type_name(), self.name, e);
        }
        result
    }

    /// Apply every message currently queued on `inbound`
    pub fn drain_inbound(&mut self, inbound: &mut UnboundedReceiver<Bytes>) -> InboundReport {
        let mut report = InboundReport::default();
        loop {
            match inbound.try_recv() {
                Ok(bytes) => {
                    let result = self.apply_remote_bytes(&bytes);
                    report.record(&result);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if report.total() > 0 {
            debug!("Drained inbound on {}: {:?}", self.name, report);
        }
        report
    }

    /// Send every locally committed change to `sender`
    pub fn connect_outbound(&mut self, sender: UnboundedSender<Bytes>) {
        self.outbound = Some(sender);
    }

    pub fn disconnect_outbound(&mut self) {
        self.outbound = None;
    }

    /// State `id` is missing relative to `since`
    pub fn delta_since(
        &self,
        id: impl Into<DocumentId>,
        since: &VersionVector,
    ) -> Result<Option<DocumentDelta>> {
        let id = id.into();
        self.documents
            .get(&id)
            .map(|document| document.diff_since(since))
            .ok_or(VersioningError::UnknownDocument { id })
    }

    pub fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Apply every staged intent atomically
    ///
    /// All operations share one counter. On failure nothing in the
    /// collection changes and the error is `TransactionAborted`.
    pub fn commit(&mut self, transaction: Transaction) -> Result<CommitReceipt> {
        let (transaction_id, staged) = transaction.finish(TransactionState::Committed);
        if staged.is_empty() {
            return Ok(CommitReceipt {
                transaction_id,
                state: TransactionState::Committed,
                counter: self.clock.current(),
                changes: Vec::new(),
                messages: Vec::new(),
            });
        }

        let prepared = self.clock.next().and_then(|counter| {
            let prepared = self.prepare(transaction_id, &staged, counter)?;
            let messages = prepared
                .iter()
                .map(|(_, change)| self.codec.encode_change(change))
                .collect::<Result<Vec<_>>>()?;
            Ok((counter, prepared, messages))
        });
        let (counter, prepared, messages) = match prepared {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!("Transaction {} aborted: {}", transaction_id, reason);
                return Err(VersioningError::TransactionAborted {
                    transaction: transaction_id,
                    reason: Box::new(reason),
                });
            }
        };

        self.clock.observe(counter);
        let mut changes = Vec::with_capacity(prepared.len());
        for (document, change) in prepared {
            self.documents.insert(document.id().clone(), document);
            changes.push(change);
        }
        self.publish(&messages);

        info!(
            "Committed transaction {} at {}:{} ({} documents)",
            transaction_id,
            self.actor(),
            counter,
            changes.len()
        );
        Ok(CommitReceipt {
            transaction_id,
            state: TransactionState::Committed,
            counter,
            changes,
            messages,
        })
    }

    /// Discard a transaction without touching any document
    pub fn abort(&self, transaction: Transaction) {
        let (transaction_id, staged) = transaction.finish(TransactionState::Aborted);
        debug!(
            "Transaction {} aborted with {} staged operations",
            transaction_id,
            staged.len()
        );
    }

    pub fn set(
        &mut self,
        id: impl Into<DocumentId>,
        field: impl Into<String>,
        value: Value,
    ) -> Result<CommitReceipt> {
        let mut transaction = self.begin();
        transaction.set(id, field, value);
        self.commit(transaction)
    }

    pub fn add_to_set(
        &mut self,
        id: impl Into<DocumentId>,
        field: impl Into<String>,
        value: Value,
    ) -> Result<CommitReceipt> {
        let mut transaction = self.begin();
        transaction.add_to_set(id, field, value);
        self.commit(transaction)
    }

    pub fn remove_from_set(
        &mut self,
        id: impl Into<DocumentId>,
        field: impl Into<String>,
        value: Value,
    ) -> Result<CommitReceipt> {
        let mut transaction = self.begin();
        transaction.remove_from_set(id, field, value);
        self.commit(transaction)
    }

    pub fn insert_at(
        &mut self,
        id: impl Into<DocumentId>,
        field: impl Into<String>,
        index: usize,
        value: Value,
    ) -> Result<CommitReceipt> {
        let mut transaction = self.begin();
        transaction.insert_at(id, field, index, value);
        self.commit(transaction)
    }

    pub fn delete_at(
        &mut self,
        id: impl Into<DocumentId>,
        field: impl Into<String>,
        index: usize,
    ) -> Result<CommitReceipt> {
        let mut transaction = self.begin();
        transaction.delete_at(id, field, index);
        self.commit(transaction)
    }

    /// Undo the most recent local entry of a document
    ///
    /// If the entry came from a multi-document transaction, the matching
    /// entries on the other documents are undone in the same step.
    pub fn undo(&mut self, id: impl Into<DocumentId>) -> Result<UndoOutcome> {
        self.step(Direction::Undo, id.into())
    }

    pub fn redo(&mut self, id: impl Into<DocumentId>) -> Result<UndoOutcome> {
        self.step(Direction::Redo, id.into())
    }

    /// Load a document from `store`, merging into any local instance
    pub fn load(
        &mut self,
        store: &dyn DocumentStore,
        id: impl Into<DocumentId>,
    ) -> Result<Option<&Document>> {
        let id = id.into();
        match store.load(&id)? {
            Some(document) => {
                debug!("Loaded {} into {}", id, self.name);
                Ok(Some(self.insert(document)))
            }
            None => Ok(None),
        }
    }

    pub fn persist(&self, store: &dyn DocumentStore, id: impl Into<DocumentId>) -> Result<()> {
        let id = id.into();
        let document = self
            .documents
            .get(&id)
            .ok_or_else(|| VersioningError::UnknownDocument { id: id.clone() })?;
        store.save(document)?;
        Ok(())
    }

    /// Save every document; returns how many were written
    pub fn persist_all(&self, store: &dyn DocumentStore) -> Result<usize> {
        for document in self.documents.values() {
            store.save(document)?;
        }
        Ok(self.documents.len())
    }

    /// Delete a document here and in `store`
    pub fn forget(
        &mut self,
        store: &dyn DocumentStore,
        id: impl Into<DocumentId>,
    ) -> Result<Option<Document>> {
        let id = id.into();
        store.delete(&id)?;
        Ok(self.delete(id))
    }

    /// Document a remote change should land on, `None` if it was deleted
    fn route(&mut self, id: &DocumentId) -> Result<Option<&mut Document>> {
        if self.deleted.contains(id) {
            warn!("Discarding remote change for deleted document {}", id);
            return Ok(None);
        }
        if !self.documents.contains_key(id) {
            if !self.config.create_on_remote {
                return Err(VersioningError::UnknownDocument { id: id.clone() });
            }
            debug!("Creating {} on first remote change", id);
            self.create(id.clone());
        }
        Ok(self.documents.get_mut(id))
    }

    /// Resolve and apply staged intents on copies of the touched documents
    fn prepare(
        &self,
        transaction_id: TransactionId,
        staged: &[StagedOp],
        counter: u64,
    ) -> Result<Vec<(Document, Change)>> {
        let mut working: Vec<(Document, InverseBuilder, Vec<Operation>)> = Vec::new();

        for (seq, staged_op) in staged.iter().enumerate() {
            let index = match working
                .iter()
                .position(|(document, _, _)| document.id() == &staged_op.document_id)
            {
                Some(index) => index,
                None => {
                    let document = self.documents.get(&staged_op.document_id).ok_or_else(|| {
                        VersioningError::UnknownDocument {
                            id: staged_op.document_id.clone(),
                        }
                    })?;
                    working.push((document.clone(), InverseBuilder::default(), Vec::new()));
                    working.len() - 1
                }
            };

            let (document, builder, operations) = &mut working[index];
            let payload = staged_op.intent.resolve(document, &staged_op.field)?;
            let operation = Operation {
                document_id: staged_op.document_id.clone(),
                field: staged_op.field.clone(),
                actor_id: self.actor().clone(),
                counter,
                seq: op_seq(seq)?,
                payload,
            };
            document.apply_local_op(&operation, builder);
            operations.push(operation);
        }

        Ok(working
            .into_iter()
            .map(|(mut document, builder, operations)| {
                let change = Change {
                    document_id: document.id().clone(),
                    actor_id: self.actor().clone(),
                    counter,
                    transaction_id: Some(transaction_id),
                    operations,
                };
                document.seal_local(&change, builder);
                (document, change)
            })
            .collect())
    }

    fn step(&mut self, direction: Direction, id: DocumentId) -> Result<UndoOutcome> {
        let actor = self.clock.actor_id().clone();
        let counter = self.clock.next()?;

        let Some(document) = self.documents.get_mut(&id) else {
            return Err(VersioningError::UnknownDocument { id });
        };
        let top = match direction {
            Direction::Undo => document.history().peek_undo(),
            Direction::Redo => document.history().peek_redo(),
        };
        let Some(transaction) = top.map(|entry| entry.transaction_id) else {
            debug!("{:?} on {}: nothing to do", direction, id);
            return Ok(UndoOutcome::Empty);
        };

        let mut outcome = document.step(direction, None, &actor, counter)?;
        if let Some(transaction) = transaction {
            for (other_id, other) in self.documents.iter_mut() {
                if other_id != &id {
                    let sibling = other.step(direction, Some(transaction), &actor, counter)?;
                    outcome = outcome.absorb(sibling);
                }
            }
        }

        if outcome.is_applied() {
            self.clock.observe(counter);
            let messages: Vec<Bytes> = outcome
                .changes()
                .iter()
                .filter_map(|change| match self.codec.encode_change(change) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!("Failed to encode {:?} change for {}: {}", direction, id, e);
                        None
                    }
                })
                .collect();
            self.publish(&messages);
        }
        for conflict in outcome.conflicts() {
            warn!(
                "{:?} skipped {}.{}: modified by {:?}",
                direction, conflict.document_id, conflict.field, conflict.modified_by
            );
        }
        Ok(outcome)
    }

    fn publish(&mut self, messages: &[Bytes]) {
        let Some(sender) = &self.outbound else {
            return;
        };
        let delivered = messages
            .iter()
            .all(|message| sender.send(message.clone()).is_ok());
        if !delivered {
            warn!("Outbound channel for {} closed; disconnecting", self.name);
            self.outbound = None;
        }
    }
}
