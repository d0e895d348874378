//! Shared helpers for integration tests

use synapsed_versioning::{ActorId, VersionedCollection};
use tracing_subscriber::EnvFilter;

/// Initialize test logging
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("synapsed_versioning=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Collection with default configuration for `actor`
pub fn replica(actor: &str) -> VersionedCollection {
    VersionedCollection::with_defaults("notes", ActorId::from(actor))
}
