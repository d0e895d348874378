//! State deltas for catching up replicas
//!
//! A [`DocumentDelta`] carries the full CRDT state of a document's fields and
//! its version vector. The transport decides when to ask for one; the core
//! only produces and merges them.

use crate::{
    clock::MAX_COUNTER,
    document::{ApplyOutcome, Document, PartialChanges},
    error::{Result, VersioningError},
    field::FieldValue,
    history::RemoteRecord,
    types::{DocumentId, VersionVector},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Full field state of a document at a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDelta {
    pub document_id: DocumentId,
    pub version: VersionVector,
    /// Actors whose latest counter the source only holds in part
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partial: PartialChanges,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// State a replica at `since` is missing, if any
    pub fn diff_since(&self, since: &VersionVector) -> Option<DocumentDelta> {
        if since.dominates(self.version()) {
            return None;
        }
        Some(DocumentDelta {
            document_id: self.id().clone(),
            version: self.version().clone(),
            partial: self.partial().clone(),
            fields: self
                .fields()
                .map(|(name, field)| (name.clone(), field.clone()))
                .collect(),
        })
    }

    /// Join a delta produced by another replica
    pub fn merge_delta(&mut self, delta: &DocumentDelta) -> Result<ApplyOutcome> {
        if &delta.document_id != self.id() {
            return Err(VersioningError::MalformedOperation(format!(
                "delta for {} routed to {}",
                delta.document_id,
                self.id()
            )));
        }
        if delta.version.max_counter() > MAX_COUNTER {
            return Err(VersioningError::MalformedOperation(format!(
                "delta for {} carries a counter beyond {}",
                delta.document_id, MAX_COUNTER
            )));
        }
        if self.covers_state(&delta.version, &delta.partial) {
            debug!("Delta for {} already covered by {}", self.id(), self.version());
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let fields = self.fields_mut();
        for (name, field) in &delta.fields {
            let merged = match fields.get(name) {
                Some(existing) => existing.merge(field),
                None => field.clone(),
            };
            fields.insert(name.clone(), merged);
        }

        let touched: std::collections::BTreeSet<String> = delta.fields.keys().cloned().collect();
        let advanced: Vec<RemoteRecord> = delta
            .version
            .iter()
            .filter(|(actor, counter)| !self.version().covers(actor, *counter))
            .map(|(actor, counter)| RemoteRecord {
                actor: actor.clone(),
                counter,
                fields: touched.clone(),
                received_at: Utc::now(),
            })
            .collect();
        for record in advanced {
            self.history_mut().record_remote(record);
        }
        self.join_partial(&delta.version, &delta.partial);
        self.version_mut().merge(&delta.version);

        debug!("Merged delta into {} now at {}", self.id(), self.version());
        Ok(ApplyOutcome::Applied)
    }
}
