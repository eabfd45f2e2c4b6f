//! Concurrent, depth-limited walk of one root of the virtual tree.
//!
//! A fixed pool of workers pulls `WorkItem`s from a bounded channel, lists
//! directories through the object source and fans new directories back into
//! the channel. Nobody knows the size of the tree up front, so an
//! outstanding-work counter (starting at 1 for the root) tracks every item
//! that was handed off but not yet finished; a closer task waits for it to
//! reach zero and closes the channel, which ends the workers.
//!
//! The channel bound limits queued work, not memory. A worker that finds the
//! channel full parks the send on its own task rather than waiting, since
//! the workers are the only consumers and a waiting worker could deadlock
//! the pool. On a wide directory every surplus child becomes a parked task,
//! so peak memory grows with the widest fan-out, not with the channel size.
//!
//! Every discovered entry is handed to `emit`. A directory is always emitted
//! before its children, because children are only seen once the directory
//! itself is dequeued and listed. There is no ordering across siblings.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::sync::Notify;

use crate::config::BuildOptions;
use crate::paths::{is_system_file, join, parent_of, path_is_ignored};
use crate::source::ObjectSource;
use crate::types::{Entry, QueuedItem};

/// One unit of recursion.
#[derive(Debug, Clone)]
struct WorkItem {
    path: String,
    entry: Entry,
    remaining_depth: usize,
}

/// Outstanding-work counter with a one-shot "reached zero" signal.
#[derive(Debug)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

impl Pending {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
            drained: Notify::new(),
        }
    }

    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Stores a permit, so the closer cannot miss it.
            self.drained.notify_one();
        }
    }
}

#[derive(Clone)]
pub struct TreeWalker {
    source: Arc<dyn ObjectSource>,
    ignore_paths: Arc<[String]>,
    ignore_system_files: bool,
    dispatch_capacity: usize,
    workers: usize,
}

impl std::fmt::Debug for TreeWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWalker")
            .field("ignore_paths", &self.ignore_paths)
            .field("ignore_system_files", &self.ignore_system_files)
            .field("dispatch_capacity", &self.dispatch_capacity)
            .field("workers", &self.workers)
            .finish()
    }
}

struct WalkShared<E> {
    walker: TreeWalker,
    running: Arc<AtomicBool>,
    emit: E,
    pending: Pending,
    work_tx: Sender<WorkItem>,
}

impl TreeWalker {
    pub fn new(source: Arc<dyn ObjectSource>, ignore_paths: Vec<String>) -> Self {
        let options = BuildOptions::default();
        Self {
            source,
            ignore_paths: ignore_paths.into(),
            ignore_system_files: false,
            dispatch_capacity: options.dispatch_capacity,
            workers: options.workers,
        }
    }

    pub fn with_system_file_filter(mut self, ignore_system_files: bool) -> Self {
        self.ignore_system_files = ignore_system_files;
        self
    }

    pub fn with_options(mut self, options: &BuildOptions) -> Self {
        self.dispatch_capacity = options.dispatch_capacity.max(1);
        self.workers = options.workers.max(1);
        self
    }

    /// Walks everything under `root` up to `max_depth` levels, handing each
    /// discovered entry to `emit`.
    ///
    /// Returns once every spawned unit of work has finished. Clearing
    /// `running` makes the remaining work drain without further listings.
    pub async fn walk<E>(
        &self,
        root: &str,
        root_entry: Entry,
        max_depth: usize,
        running: Arc<AtomicBool>,
        emit: E,
    ) where
        E: Fn(QueuedItem) + Send + Sync + 'static,
    {
        let (work_tx, work_rx) = async_channel::bounded(self.dispatch_capacity);
        let shared = Arc::new(WalkShared {
            walker: self.clone(),
            running,
            emit,
            pending: Pending::new(),
            work_tx,
        });

        let workers: Vec<_> = (0..self.workers)
            .map(|_| tokio::spawn(worker_loop(shared.clone(), work_rx.clone())))
            .collect();
        drop(work_rx);

        let root_item = WorkItem {
            path: root.to_string(),
            entry: root_entry,
            remaining_depth: max_depth,
        };
        dispatch(&shared, root_item).await;

        let closer = {
            let shared = shared.clone();
            tokio::spawn(async move {
                shared.pending.drained.notified().await;
                shared.work_tx.close();
            })
        };

        for worker in workers {
            if let Err(error) = worker.await {
                log::warn!("index walk worker for {root} ended abnormally: {error}");
            }
        }
        let _ = closer.await;
    }

    fn should_skip(&self, path: &str) -> bool {
        if path_is_ignored(&self.ignore_paths, path) {
            return true;
        }
        self.source
            .storage(path)
            .is_some_and(|storage| storage.disable_index)
    }
}

/// Hands a counted item to the workers. If the channel is full the send is
/// parked on its own task so the worker can keep draining. Parked sends are
/// unbounded.
async fn dispatch<E>(shared: &Arc<WalkShared<E>>, item: WorkItem)
where
    E: Fn(QueuedItem) + Send + Sync + 'static,
{
    match shared.work_tx.try_send(item) {
        Ok(()) => {}
        Err(TrySendError::Full(item)) => {
            let shared = shared.clone();
            tokio::spawn(async move {
                if shared.work_tx.send(item).await.is_err() {
                    shared.pending.done();
                }
            });
        }
        Err(TrySendError::Closed(_)) => shared.pending.done(),
    }
}

async fn worker_loop<E>(shared: Arc<WalkShared<E>>, work_rx: Receiver<WorkItem>)
where
    E: Fn(QueuedItem) + Send + Sync + 'static,
{
    while let Ok(item) = work_rx.recv().await {
        process(&shared, item).await;
        shared.pending.done();
    }
}

async fn process<E>(shared: &Arc<WalkShared<E>>, item: WorkItem)
where
    E: Fn(QueuedItem) + Send + Sync + 'static,
{
    if !shared.running.load(Ordering::Relaxed) {
        return;
    }
    let walker = &shared.walker;
    if walker.should_skip(&item.path) {
        log::debug!("index walk skipped {}", item.path);
        return;
    }

    if item.path != "/" {
        (shared.emit)(QueuedItem::new(item.entry.clone(), parent_of(&item.path)));
    }

    if !item.entry.is_dir || item.remaining_depth == 0 {
        return;
    }

    let meta = walker.source.nearest_meta(&item.path).ok().flatten();
    let children = match walker.source.list(&item.path, meta.as_ref()).await {
        Ok(children) => children,
        Err(error) => {
            log::warn!("index walk abandoned subtree {}: {}", item.path, error);
            return;
        }
    };

    for child in children {
        if walker.ignore_system_files && is_system_file(&child.name) {
            continue;
        }
        let child_path = join(&item.path, &child.name);
        if walker.should_skip(&child_path) {
            continue;
        }
        (shared.emit)(QueuedItem::new(child.clone(), item.path.clone()));
        if child.is_dir && item.remaining_depth != 1 {
            shared.pending.add();
            let next = WorkItem {
                path: child_path,
                entry: child,
                remaining_depth: item.remaining_depth - 1,
            };
            dispatch(shared, next).await;
        }
    }
}
