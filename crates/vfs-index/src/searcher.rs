//! Pluggable index backends.
//!
//! This module provides:
//! - The `Searcher` contract every backend implements
//! - The optional `AsyncUpdate` capability for backends that reconcile
//!   directory changes themselves
//! - `SearcherSlot`, the swappable handle the rest of the crate goes through
//! - In-process backends: `MemorySearcher` and `DeferredSearcher`

mod deferred;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::paths::path_is_ignored;
use crate::request::SearchRequest;
use crate::source::ObjectSource;
use crate::types::{Entry, QueuedItem, SearchNode};

pub use deferred::DeferredSearcher;
pub use memory::MemorySearcher;

pub const MODE_NONE: &str = "none";
pub const MODE_MEMORY: &str = "memory";
pub const MODE_DEFERRED: &str = "deferred";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearcherConfig {
    pub name: String,
    /// Whether directory-change notifications should be applied to this backend.
    pub auto_update: bool,
}

#[async_trait]
pub trait Searcher: Send + Sync {
    fn config(&self) -> SearcherConfig;

    /// Returns one page of matches and the total number of matches.
    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchNode>, u64)>;

    /// Indexes a batch. Nodes already present at the same path are replaced.
    async fn batch_index(&self, nodes: Vec<SearchNode>) -> Result<()>;

    /// Indexed direct children of `parent`.
    async fn get_children(&self, parent: &str) -> Result<Vec<SearchNode>>;

    /// Removes the node at `prefix` and everything below it.
    async fn delete(&self, prefix: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Called when the backend is replaced.
    async fn release(&self) -> Result<()> {
        Ok(())
    }

    /// Capability query for backends that diff directory updates themselves.
    fn async_updates(&self) -> Option<&dyn AsyncUpdate> {
        None
    }
}

/// Backends that accept raw directory updates and reconcile them at their
/// own consumption time.
pub trait AsyncUpdate: Send + Sync {
    fn enqueue_update(&self, parent: &str, children: Vec<Entry>);
}

/// Swappable handle to the configured backend, if any.
#[derive(Clone, Default)]
pub struct SearcherSlot {
    inner: Arc<RwLock<Option<Arc<dyn Searcher>>>>,
}

impl std::fmt::Debug for SearcherSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearcherSlot")
            .field("searcher", &self.get().map(|s| s.config().name))
            .finish()
    }
}

impl SearcherSlot {
    pub fn new(searcher: Option<Arc<dyn Searcher>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(searcher)),
        }
    }

    pub fn get(&self) -> Option<Arc<dyn Searcher>> {
        self.inner.read().clone()
    }

    /// The configured backend, or `SearchNotAvailable`.
    pub fn require(&self) -> Result<Arc<dyn Searcher>> {
        self.get().ok_or(IndexError::SearchNotAvailable)
    }

    /// Installs a new backend and returns the previous one.
    pub fn replace(&self, searcher: Option<Arc<dyn Searcher>>) -> Option<Arc<dyn Searcher>> {
        std::mem::replace(&mut *self.inner.write(), searcher)
    }
}

/// Sends discovered items to a backend, dropping those whose parent is an
/// ignored path. An empty batch is a no-op.
pub async fn batch_index(
    searcher: &dyn Searcher,
    ignore_paths: &[String],
    items: &[QueuedItem],
) -> Result<()> {
    let nodes: Vec<SearchNode> = items
        .iter()
        .filter(|item| !path_is_ignored(ignore_paths, &item.parent))
        .map(QueuedItem::to_node)
        .collect();
    if nodes.is_empty() {
        return Ok(());
    }
    searcher.batch_index(nodes).await
}

/// Creates the backend for a search mode. `"none"` disables search.
pub fn new_searcher(
    mode: &str,
    source: Arc<dyn ObjectSource>,
    ignore_paths: Vec<String>,
) -> Result<Option<Arc<dyn Searcher>>> {
    match mode {
        MODE_NONE => Ok(None),
        MODE_MEMORY => Ok(Some(Arc::new(MemorySearcher::new()))),
        MODE_DEFERRED => {
            let inner: Arc<dyn Searcher> = Arc::new(MemorySearcher::new());
            let deferred = DeferredSearcher::spawn(inner, source, ignore_paths)?;
            Ok(Some(Arc::new(deferred)))
        }
        other => Err(IndexError::InvalidInput(format!(
            "unsupported search mode: {other} (expected one of: none, memory, deferred)"
        ))),
    }
}
