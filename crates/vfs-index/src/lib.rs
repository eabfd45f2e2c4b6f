//! Search index build and maintenance over a virtual filesystem.
//!
//! This crate provides:
//! - A cancellable, process-wide singleton index build driven by a
//!   concurrent tree walk and a batching control loop
//! - Incremental updates from directory-change notifications
//! - Pluggable search backends behind the `Searcher` trait
//! - Permission filtering and de-duplication of search results

pub mod builder;
pub mod config;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod paths;
pub mod progress;
pub mod queue;
pub mod request;
pub mod run_token;
pub mod searcher;
pub mod service;
pub mod source;
pub mod types;
pub mod updater;
pub mod walker;

// Re-export main types
pub use builder::IndexBuilder;
pub use config::{BuildOptions, IndexSettings};
pub use error::{IndexError, Result};
pub use filter::{Principal, SearchQueryFilter};
pub use hooks::{DirectoryChangeHook, HookRegistry};
pub use progress::{BuildProgress, FileProgressStore, MemoryProgressStore, ProgressStore};
pub use queue::IndexQueue;
pub use request::{OrderBy, OrderDirection, Scope, SearchRequest};
pub use run_token::{RunSlot, RunToken};
pub use searcher::{
    new_searcher, AsyncUpdate, DeferredSearcher, MemorySearcher, Searcher, SearcherConfig,
    SearcherSlot,
};
pub use service::IndexService;
pub use source::{Meta, MemoryObjectSource, ObjectSource, StorageInfo};
pub use types::{Entry, ObjType, PageResp, QueuedItem, SearchNode, SearchResult};
pub use updater::IncrementalUpdater;
pub use walker::TreeWalker;
