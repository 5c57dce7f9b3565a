//! In-memory record stores backing the scheduler.
//!
//! Each store is a plain struct mutated through `&mut self` and shared behind
//! an `Arc<RwLock<_>>` by the [`Scheduler`](crate::scheduler::Scheduler).
//! Holding the write lock makes every store method atomic, which is what the
//! dispatch compare-and-swap relies on.
//!
//! Lock order when more than one store is held: workers, then jobs, then
//! outputs.

pub mod jobs;
pub mod output;
pub mod workers;

use std::collections::BTreeSet;

pub use jobs::JobStore;
pub use output::{OutputChunk, OutputStore};
pub use workers::{WorkerRecord, WorkerRegistry};

/// Query modifier restricting results to records a caller owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Owner(String),
}

impl Scope {
    pub fn permits(&self, owner_ids: &BTreeSet<String>) -> bool {
        match self {
            Scope::All => true,
            Scope::Owner(caller) => owner_ids.contains(caller),
        }
    }
}
