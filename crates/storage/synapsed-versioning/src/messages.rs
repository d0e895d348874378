//! Human-readable descriptions for errors and outcomes
//!
//! Merge logic never consults a catalog. Applications supply their own
//! [`Catalog`] to localize what they show to users.

use crate::{
    error::VersioningError,
    document::Direction,
    history::{UndoConflict, UndoOutcome},
};
use std::collections::HashMap;

/// Identifies a user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    UnknownDocument,
    MalformedOperation,
    InvalidOperation,
    TransactionAborted,
    Serialization,
    Configuration,
    Storage,
    NothingToUndo,
    NothingToRedo,
    UndoApplied,
    RedoApplied,
    UndoSkipped,
    RedoSkipped,
    UndoConflict,
}

impl MessageKey {
    pub fn for_error(error: &VersioningError) -> Self {
        match error {
            VersioningError::UnknownDocument { .. } => MessageKey::UnknownDocument,
            VersioningError::MalformedOperation(_) => MessageKey::MalformedOperation,
            VersioningError::InvalidOperation(_) => MessageKey::InvalidOperation,
            VersioningError::TransactionAborted { .. } => MessageKey::TransactionAborted,
            VersioningError::SerializationError(_) => MessageKey::Serialization,
            VersioningError::ConfigError(_) => MessageKey::Configuration,
            VersioningError::StorageError(_) => MessageKey::Storage,
        }
    }
}

/// Source of message templates
///
/// Templates may contain `{name}` placeholders filled by [`render`].
pub trait Catalog: Send + Sync {
    fn template(&self, key: MessageKey) -> Option<&str>;
}

/// Built-in English messages
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishCatalog;

impl EnglishCatalog {
    pub fn text(key: MessageKey) -> &'static str {
        match key {
            MessageKey::UnknownDocument => "Document {id} does not exist",
            MessageKey::MalformedOperation => "An incoming change could not be read: {detail}",
            MessageKey::InvalidOperation => "That edit is not possible: {detail}",
            MessageKey::TransactionAborted => "Nothing was saved: {detail}",
            MessageKey::Serialization => "A change could not be encoded: {detail}",
            MessageKey::Configuration => "Invalid configuration: {detail}",
            MessageKey::Storage => "Storage failed: {detail}",
            MessageKey::NothingToUndo => "Nothing to undo",
            MessageKey::NothingToRedo => "Nothing to redo",
            MessageKey::UndoApplied => "Undone",
            MessageKey::RedoApplied => "Redone",
            MessageKey::UndoSkipped => "Could not undo: the edit was replaced by a later change",
            MessageKey::RedoSkipped => "Could not redo: the field was changed since the undo",
            MessageKey::UndoConflict => "{field} was changed by {actor} and was left as is",
        }
    }
}

impl Catalog for EnglishCatalog {
    fn template(&self, key: MessageKey) -> Option<&str> {
        Some(Self::text(key))
    }
}

/// Catalog backed by a map, falling back to English for missing keys
#[derive(Debug, Clone, Default)]
pub struct MapCatalog {
    templates: HashMap<MessageKey, String>,
}

impl MapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: MessageKey, template: impl Into<String>) -> Self {
        self.templates.insert(key, template.into());
        self
    }
}

impl Catalog for MapCatalog {
    fn template(&self, key: MessageKey) -> Option<&str> {
        self.templates
            .get(&key)
            .map(String::as_str)
            .or(Some(EnglishCatalog::text(key)))
    }
}

/// Fill `{name}` placeholders in a template
pub fn render(template: &str, args: &[(&str, String)]) -> String {
    args.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

/// Describe an error for display
pub fn describe_error(catalog: &dyn Catalog, error: &VersioningError) -> String {
    let key = MessageKey::for_error(error);
    let Some(template) = catalog.template(key) else {
        return error.to_string();
    };
    let detail = match error {
        VersioningError::TransactionAborted { reason, .. } => {
            describe_error(catalog, reason.root_cause())
        }
        VersioningError::UnknownDocument { id } => id.to_string(),
        VersioningError::MalformedOperation(detail)
        | VersioningError::InvalidOperation(detail)
        | VersioningError::SerializationError(detail)
        | VersioningError::ConfigError(detail)
        | VersioningError::StorageError(detail) => detail.clone(),
    };
    let id = match error.root_cause() {
        VersioningError::UnknownDocument { id } => id.to_string(),
        _ => String::new(),
    };
    render(template, &[("id", id), ("detail", detail)])
}

/// Describe one skipped field
pub fn describe_conflict(catalog: &dyn Catalog, conflict: &UndoConflict) -> String {
    let template = catalog
        .template(MessageKey::UndoConflict)
        .unwrap_or("{field} was changed by {actor}");
    let actor = conflict
        .modified_by
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "another replica".to_string());
    render(template, &[("field", conflict.field.clone()), ("actor", actor)])
}

/// Describe an undo or redo result
pub fn describe_outcome(
    catalog: &dyn Catalog,
    direction: Direction,
    outcome: &UndoOutcome,
) -> String {
    let key = match (direction, outcome) {
        (Direction::Undo, UndoOutcome::Applied { .. }) => MessageKey::UndoApplied,
        (Direction::Undo, UndoOutcome::Skipped { .. }) => MessageKey::UndoSkipped,
        (Direction::Undo, UndoOutcome::Empty) => MessageKey::NothingToUndo,
        (Direction::Redo, UndoOutcome::Applied { .. }) => MessageKey::RedoApplied,
        (Direction::Redo, UndoOutcome::Skipped { .. }) => MessageKey::RedoSkipped,
        (Direction::Redo, UndoOutcome::Empty) => MessageKey::NothingToRedo,
    };
    catalog.template(key).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActorId, DocumentId, TransactionId};

    #[test]
    fn test_describe_unknown_document() {
        let err = VersioningError::UnknownDocument {
            id: DocumentId::from("doc-7"),
        };
        assert_eq!(describe_error(&EnglishCatalog, &err), "Document doc-7 does not exist");
    }

    #[test]
    fn test_describe_aborted_uses_root_cause() {
        let err = VersioningError::TransactionAborted {
            transaction: TransactionId::new(),
            reason: Box::new(VersioningError::UnknownDocument {
                id: DocumentId::from("gone"),
            }),
        };
        assert_eq!(
            describe_error(&EnglishCatalog, &err),
            "Nothing was saved: Document gone does not exist"
        );
    }

    #[test]
    fn test_map_catalog_overrides() {
        let catalog = MapCatalog::new().with(MessageKey::NothingToUndo, "Rien à annuler");
        assert_eq!(
            describe_outcome(&catalog, Direction::Undo, &UndoOutcome::Empty),
            "Rien à annuler"
        );
        assert_eq!(
            describe_outcome(
                &catalog,
                Direction::Undo,
                &UndoOutcome::Skipped { conflicts: vec![] }
            ),
            "Could not undo: the edit was replaced by a later change"
        );
    }

    #[test]
    fn test_redo_outcomes_have_their_own_messages() {
        assert_eq!(
            describe_outcome(&EnglishCatalog, Direction::Redo, &UndoOutcome::Empty),
            "Nothing to redo"
        );
        assert_eq!(
            describe_outcome(&EnglishCatalog, Direction::Undo, &UndoOutcome::Empty),
            "Nothing to undo"
        );
        let applied = UndoOutcome::Applied {
            changes: vec![],
            conflicts: vec![],
        };
        assert_eq!(
            describe_outcome(&EnglishCatalog, Direction::Redo, &applied),
            "Redone"
        );
    }

    #[test]
    fn test_describe_conflict() {
        let conflict = UndoConflict {
            document_id: DocumentId::from("doc"),
            field: "title".to_string(),
            modified_by: Some(ActorId::from("bob")),
        };
        assert_eq!(
            describe_conflict(&EnglishCatalog, &conflict),
            "title was changed by bob and was left as is"
        );
    }
}
