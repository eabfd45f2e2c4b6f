//! Backend wrapper that reconciles directory updates on its own task.
//!
//! `enqueue_update` only records the latest listing per parent. The consumer
//! task diffs it against the wrapped index when it gets to it, so the diff
//! always sees whatever earlier updates already applied. Repeated updates
//! for a parent that has not been consumed yet collapse into the newest one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{AsyncUpdate, Searcher, SearcherConfig, MODE_DEFERRED};
use crate::error::{IndexError, Result};
use crate::paths::{is_sub_path, normalize};
use crate::request::SearchRequest;
use crate::source::ObjectSource;
use crate::types::{Entry, SearchNode};
use crate::updater::reconcile_children;

#[derive(Debug, Default)]
struct PendingUpdates {
    order: VecDeque<String>,
    latest: FnvHashMap<String, Vec<Entry>>,
    in_flight: bool,
}

impl PendingUpdates {
    fn pop(&mut self) -> Option<(String, Vec<Entry>)> {
        while let Some(parent) = self.order.pop_front() {
            if let Some(children) = self.latest.remove(&parent) {
                return Some((parent, children));
            }
        }
        None
    }

    fn is_idle(&self) -> bool {
        self.latest.is_empty() && !self.in_flight
    }
}

struct Shared {
    inner: Arc<dyn Searcher>,
    source: Arc<dyn ObjectSource>,
    ignore_paths: Vec<String>,
    pending: Mutex<PendingUpdates>,
    wake: Notify,
    idle: Notify,
    closed: AtomicBool,
}

pub struct DeferredSearcher {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeferredSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSearcher")
            .field("inner", &self.shared.inner.config().name)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl DeferredSearcher {
    /// Wraps `inner` and starts the consumer on the current tokio runtime.
    pub fn spawn(
        inner: Arc<dyn Searcher>,
        source: Arc<dyn ObjectSource>,
        ignore_paths: Vec<String>,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|error| IndexError::Internal(format!("deferred searcher needs a runtime: {error}")))?;
        let shared = Arc::new(Shared {
            inner,
            source,
            ignore_paths,
            pending: Mutex::new(PendingUpdates::default()),
            wake: Notify::new(),
            idle: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let consumer = handle.spawn(consume(shared.clone()));
        Ok(Self {
            shared,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Parents with an update waiting to be consumed.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().latest.len()
    }

    /// Resolves once every enqueued update has been applied.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.pending.lock().is_idle() || self.shared.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }
}

impl Drop for DeferredSearcher {
    fn drop(&mut self) {
        self.close();
    }
}

async fn consume(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut pending = shared.pending.lock();
            let next = pending.pop();
            pending.in_flight = next.is_some();
            next
        };
        let Some((parent, children)) = next else {
            shared.idle.notify_waiters();
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            shared.wake.notified().await;
            continue;
        };

        if let Err(error) = reconcile_children(
            shared.inner.as_ref(),
            shared.source.as_ref(),
            &shared.ignore_paths,
            &parent,
            &children,
        )
        .await
        {
            log::error!("deferred index update for {parent} failed: {error}");
        }
        shared.pending.lock().in_flight = false;
    }
    log::debug!("deferred index consumer stopped");
}

impl AsyncUpdate for DeferredSearcher {
    fn enqueue_update(&self, parent: &str, children: Vec<Entry>) {
        if self.shared.closed.load(Ordering::SeqCst) {
            log::debug!("deferred index update for {parent} dropped, searcher released");
            return;
        }
        let parent = normalize(parent);
        {
            let mut pending = self.shared.pending.lock();
            if pending.latest.insert(parent.clone(), children).is_none() {
                pending.order.push_back(parent);
            }
        }
        self.shared.wake.notify_one();
    }
}

#[async_trait]
impl Searcher for DeferredSearcher {
    fn config(&self) -> SearcherConfig {
        SearcherConfig {
            name: MODE_DEFERRED.to_string(),
            auto_update: self.shared.inner.config().auto_update,
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchNode>, u64)> {
        self.shared.inner.search(request).await
    }

    async fn batch_index(&self, nodes: Vec<SearchNode>) -> Result<()> {
        self.shared.inner.batch_index(nodes).await
    }

    async fn get_children(&self, parent: &str) -> Result<Vec<SearchNode>> {
        self.shared.inner.get_children(parent).await
    }

    /// Also drops waiting updates for parents under `prefix`.
    async fn delete(&self, prefix: &str) -> Result<()> {
        {
            let prefix = normalize(prefix);
            let mut pending = self.shared.pending.lock();
            pending.latest.retain(|parent, _| !is_sub_path(&prefix, parent));
        }
        self.shared.inner.delete(prefix).await
    }

    async fn clear(&self) -> Result<()> {
        {
            let mut pending = self.shared.pending.lock();
            pending.latest.clear();
            pending.order.clear();
        }
        self.shared.inner.clear().await
    }

    async fn release(&self) -> Result<()> {
        self.close();
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            if let Err(error) = consumer.await {
                log::warn!("deferred index consumer ended abnormally: {error}");
            }
        }
        self.shared.inner.release().await
    }

    fn async_updates(&self) -> Option<&dyn AsyncUpdate> {
        Some(self)
    }
}
