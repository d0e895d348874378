//! Logical clock for locally originated changes

use crate::{
    error::{Result, VersioningError},
    types::{ActorId, VersionVector},
};

/// Largest counter accepted locally or on the wire
///
/// Kept within the exact integer range of a JSON double.
pub const MAX_COUNTER: u64 = (1 << 53) - 1;

/// Lamport clock owned by a collection
///
/// Every local change takes `tick()`, which is higher than any counter this
/// replica has incorporated. The actor's own version vector entry therefore
/// only grows, and a write made after seeing another write always outranks it
/// under last-writer-wins.
#[derive(Debug, Clone)]
pub struct LamportClock {
    actor_id: ActorId,
    counter: u64,
}

impl LamportClock {
    pub fn new(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            counter: 0,
        }
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    /// Latest counter issued or observed
    pub fn current(&self) -> u64 {
        self.counter
    }

    /// Counter the next local change will take, without issuing it
    pub fn next(&self) -> Result<u64> {
        self.counter
            .checked_add(1)
            .filter(|next| *next <= MAX_COUNTER)
            .ok_or_else(|| {
                VersioningError::InvalidOperation(format!(
                    "logical clock of {} exhausted at {}",
                    self.actor_id, self.counter
                ))
            })
    }

    /// Issue the counter for a new local change
    pub fn tick(&mut self) -> Result<u64> {
        let next = self.next()?;
        self.counter = next;
        Ok(next)
    }

    /// Account for a counter seen on an incoming change
    pub fn observe(&mut self, counter: u64) {
        self.counter = self.counter.max(counter);
    }

    /// Account for every counter in a version vector
    pub fn observe_vector(&mut self, version: &VersionVector) {
        self.observe(version.max_counter());
    }
}
