//! # Synapsed Versioning
//!
//! Versioned document collections for records edited concurrently by
//! several, possibly disconnected, replicas.
//!
//! ## Building blocks
//!
//! - **FieldValue**: closed union of field CRDTs (last-writer-wins register,
//!   observed-remove set, replicated list) with an exhaustive merge
//! - **Document**: named fields plus a version vector for duplicate detection
//! - **History**: per-document undo/redo of local intent, aware of remote edits
//! - **VersionedCollection**: owner of all documents; routes remote changes
//! - **Transaction**: atomic multi-document commits undone as one unit
//! - **Codec**: versioned JSON wire format for operations, changes and deltas
//!
//! ## Example
//!
//! ```rust
//! use synapsed_versioning::{ActorId, VersionedCollection};
//! use serde_json::json;
//!
//! # fn main() -> synapsed_versioning::Result<()> {
//! let mut alice = VersionedCollection::with_defaults("notes", ActorId::from("alice"));
//! let mut bob = VersionedCollection::with_defaults("notes", ActorId::from("bob"));
//!
//! alice.create("doc");
//! let draft = alice.set("doc", "title", json!("Draft"))?;
//!
//! // Bob has not seen Alice's write yet
//! bob.create("doc");
//! let fin = bob.set("doc", "title", json!("Final"))?;
//!
//! for change in &fin.changes {
//!     alice.apply_remote_change(change)?;
//! }
//! for change in &draft.changes {
//!     bob.apply_remote_change(change)?;
//! }
//!
//! assert_eq!(
//!     alice.get("doc").map(|d| d.to_json()),
//!     bob.get("doc").map(|d| d.to_json())
//! );
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod types;
pub mod traits;

// Field CRDTs
pub mod field;
pub mod lww_register;
pub mod or_set;
pub mod rga;

// Documents and history
pub mod document;
pub mod history;
pub mod operation;

// Collection surface
pub mod collection;
pub mod transaction;

// Utilities
pub mod clock;
pub mod codec;
pub mod config;
pub mod inbound;
pub mod messages;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use error::{Result, VersioningError};
pub use types::{ActorId, DocumentId, OpId, TransactionId, VectorComparison, VersionVector};
pub use traits::Crdt;

pub use field::{FieldKind, FieldValue};
pub use lww_register::LwwRegister;
pub use or_set::OrSet;
pub use rga::Rga;

pub use document::{ApplyOutcome, Direction, Document, PartialChanges};
pub use history::{History, HistoryEntry, InverseOp, UndoConflict, UndoOutcome};
pub use operation::{Change, OpPayload, Operation};

pub use collection::{InboundReport, VersionedCollection};
pub use transaction::{CommitReceipt, Intent, Transaction, TransactionState};

pub use clock::{LamportClock, MAX_COUNTER};
pub use codec::{Codec, WireMessage};
pub use config::{HistoryConfig, VersioningConfig, PROTOCOL_VERSION};
pub use inbound::{run_pump, spawn_pump, SharedCollection};
pub use messages::{describe_error, describe_outcome, Catalog, EnglishCatalog, MapCatalog, MessageKey};
pub use store::{DocumentStore, MemoryStore};
pub use sync::DocumentDelta;
