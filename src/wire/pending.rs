//! In-flight request table
//!
//! Maps request ids to the continuation that should run when the reply
//! arrives. Ids come from a per-connection counter starting at 0 and are
//! never handed out twice, so an entry can only be completed once.

use std::collections::BTreeMap;

/// Request id allocator plus id → continuation table
#[derive(Debug)]
pub struct PendingRequests<C> {
    next_id: u64,
    entries: BTreeMap<u64, C>,
}

impl<C> Default for PendingRequests<C> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl<C> PendingRequests<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Reserve the next id and park `continuation` under it
    pub fn register(&mut self, continuation: C) -> u64 {
        let id = self.allocate();
        self.entries.insert(id, continuation);
        id
    }

    /// Remove and return the continuation waiting on `id`
    pub fn complete(&mut self, id: u64) -> Option<C> {
        self.entries.remove(&id)
    }

    /// Remove every waiting continuation, lowest id first
    pub fn drain(&mut self) -> Vec<C> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
