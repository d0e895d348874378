//! Inbound message pump
//!
//! The transport pushes encoded messages into a tokio channel; the pump
//! applies them one at a time, holding the collection lock only for each
//! synchronous apply and never across an await.

use crate::collection::{InboundReport, VersionedCollection};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tracing::info;

/// Collection shared between local callers and the inbound pump
pub type SharedCollection = Arc<Mutex<VersionedCollection>>;

pub fn shared(collection: VersionedCollection) -> SharedCollection {
    Arc::new(Mutex::new(collection))
}

/// Apply messages until every sender is dropped
pub async fn run_pump(
    collection: SharedCollection,
    mut inbound: UnboundedReceiver<Bytes>,
) -> InboundReport {
    let mut report = InboundReport::default();
    while let Some(bytes) = inbound.recv().await {
        let result = collection.lock().apply_remote_bytes(&bytes);
        report.record(&result);
    }
    info!("Inbound pump finished: {:?}", report);
    report
}

/// Run [`run_pump`] on the current tokio runtime
pub fn spawn_pump(
    collection: SharedCollection,
    inbound: UnboundedReceiver<Bytes>,
) -> JoinHandle<InboundReport> {
    tokio::spawn(run_pump(collection, inbound))
}
