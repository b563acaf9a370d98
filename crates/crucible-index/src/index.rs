use std::sync::{Arc, RwLock};

use crate::descriptor::ToolDescriptor;
use crate::error::IndexError;
use crate::search::IndexSnapshot;

/// Shared tool index with double-buffered reads.
///
/// Requests clone an `Arc` to the current snapshot and search against it
/// without holding any lock; `rebuild` constructs the next snapshot off to
/// the side and swaps it in. A rebuild never blocks in-flight searches.
#[derive(Debug)]
pub struct ToolIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl Default for ToolIndex {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ToolIndex {
    #[must_use]
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::build(descriptors))),
        }
    }

    /// Current snapshot; cheap to call per request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the active snapshot with one built from `descriptors`.
    pub fn rebuild(&self, descriptors: Vec<ToolDescriptor>) {
        let next = Arc::new(IndexSnapshot::build(descriptors));
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = next;
        tracing::info!(tools = guard.len(), "tool index rebuilt");
    }

    /// Top-k descriptors for a natural-language query (owned copies).
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<ToolDescriptor> {
        self.snapshot()
            .search(query, k)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Exact lookup by server and tool name.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] for unknown names; the index never
    /// fabricates descriptors.
    pub fn get(&self, server: &str, name: &str) -> Result<ToolDescriptor, IndexError> {
        self.snapshot()
            .get(server, name)
            .cloned()
            .ok_or_else(|| IndexError::NotFound {
                server: server.to_owned(),
                name: name.to_owned(),
            })
    }
}
