//! Generation counter used for cooperative cancellation.
//!
//! Every started query advances the shared counter and carries a [`Ticket`]
//! with the value it started under. Work is stale once the counter has moved
//! on; stale work stops at its next check and its result is never published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Error;

#[derive(Debug, Clone, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Supersede all outstanding tickets and return the new generation.
    pub fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Ticket bound to the current generation.
    pub fn ticket(&self) -> Ticket {
        Ticket { generation: self.current(), counter: Arc::clone(&self.counter) }
    }
}

#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    counter: Arc<AtomicU64>,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.counter.load(Ordering::Acquire) != self.generation
    }

    /// `Err(Error::Cancelled)` once superseded.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_stale() { Err(Error::Cancelled) } else { Ok(()) }
    }
}
