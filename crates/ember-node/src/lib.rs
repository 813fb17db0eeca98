//! Node binary internals: the axum HTTP surface and the peer gossip
//! service. Exposed as a library so integration tests can drive full
//! in-process nodes.

pub mod api;
pub mod sync;

use std::sync::{Arc, Mutex, MutexGuard};

use ember_core::Node;

/// The single unit of mutable shared state. Every ledger mutation runs
/// under this one lock for its full duration, so cross-field invariants
/// (pool flush, cumulative difficulty, mining jobs) never interleave.
#[derive(Clone)]
pub struct SharedNode(Arc<Mutex<Node>>);

impl SharedNode {
    pub fn new(node: Node) -> Self {
        Self(Arc::new(Mutex::new(node)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Node> {
        self.0.lock().expect("node lock poisoned")
    }
}
