//! Keeps the index in step with the tree between full builds.
//!
//! The filesystem layer reports "the children of this directory are now X"
//! whenever it refreshes a listing. The updater diffs that against what the
//! index holds for the directory and applies the difference, or hands the raw
//! listing to a backend that reconciles updates on its own schedule.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::{Mutex, RwLock};

use crate::config::IndexSettings;
use crate::error::Result;
use crate::hooks::DirectoryChangeHook;
use crate::paths::{join, normalize};
use crate::progress::ProgressStore;
use crate::run_token::RunSlot;
use crate::searcher::{self, Searcher, SearcherSlot};
use crate::source::ObjectSource;
use crate::types::{Entry, QueuedItem};

pub struct IncrementalUpdater {
    source: Arc<dyn ObjectSource>,
    searcher: SearcherSlot,
    settings: Arc<RwLock<IndexSettings>>,
    progress: Arc<dyn ProgressStore>,
    run_slot: Arc<RunSlot>,
    parent_locks: Mutex<FnvHashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for IncrementalUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalUpdater")
            .field("searcher", &self.searcher)
            .field("build_running", &self.run_slot.is_running())
            .finish()
    }
}

impl IncrementalUpdater {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        searcher: SearcherSlot,
        settings: Arc<RwLock<IndexSettings>>,
        progress: Arc<dyn ProgressStore>,
        run_slot: Arc<RunSlot>,
    ) -> Self {
        Self {
            source,
            searcher,
            settings,
            progress,
            run_slot,
            parent_locks: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Applies a refreshed listing of `parent` to the index.
    ///
    /// Returns `Ok(())` without touching the index when updates are not
    /// wanted right now: no backend, auto update off in the backend or the
    /// settings, a full build running, an ignored parent, or no finished
    /// build yet.
    pub async fn on_directory_changed(&self, parent: &str, children: &[Entry]) -> Result<()> {
        let Some(searcher) = self.searcher.get() else {
            return Ok(());
        };
        let (auto_update, ignore_paths) = {
            let settings = self.settings.read();
            if settings.is_ignored_path(parent) {
                return Ok(());
            }
            (settings.auto_update_index, settings.ignore_paths.clone())
        };
        if !searcher.config().auto_update || !auto_update || self.run_slot.is_running() {
            return Ok(());
        }

        let progress = match self.progress.read().await {
            Ok(progress) => progress,
            Err(error) => {
                log::error!("index update for {parent} could not read build progress: {error}");
                return Err(error);
            }
        };
        if !progress.is_done {
            return Ok(());
        }

        if let Some(deferred) = searcher.async_updates() {
            deferred.enqueue_update(parent, children.to_vec());
            return Ok(());
        }

        let lock = self.parent_lock(parent);
        let _guard = lock.lock().await;
        reconcile_children(
            searcher.as_ref(),
            self.source.as_ref(),
            &ignore_paths,
            parent,
            children,
        )
        .await
    }

    /// One async lock per parent path, dropped once nobody holds it.
    fn parent_lock(&self, parent: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = normalize(parent);
        let mut locks = self.parent_locks.lock();
        if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }
}

#[async_trait]
impl DirectoryChangeHook for IncrementalUpdater {
    async fn on_directory_changed(&self, parent: &str, children: &[Entry]) -> Result<()> {
        IncrementalUpdater::on_directory_changed(self, parent, children).await
    }
}

/// Diffs `children` against the indexed children of `parent` by name and
/// applies the difference. Stops at the first failing delete or add.
///
/// A removed name is kept in the index while a storage is still mounted at
/// its exact path.
pub(crate) async fn reconcile_children(
    searcher: &dyn Searcher,
    source: &dyn ObjectSource,
    ignore_paths: &[String],
    parent: &str,
    children: &[Entry],
) -> Result<()> {
    let indexed = searcher.get_children(parent).await.map_err(|error| {
        log::error!("index update for {parent} could not read indexed children: {error}");
        error
    })?;

    let now: FnvHashSet<&str> = children.iter().map(|child| child.name.as_str()).collect();
    let old: FnvHashSet<&str> = indexed.iter().map(|node| node.name.as_str()).collect();

    for node in &indexed {
        if now.contains(node.name.as_str()) {
            continue;
        }
        let path = join(parent, &node.name);
        if source.has_storage(&path) {
            log::debug!("index update kept {path}, a storage is still mounted there");
            continue;
        }
        log::debug!("delete index: {path}");
        if let Err(error) = searcher.delete(&path).await {
            log::error!("index update could not delete {path}: {error}");
            return Err(error);
        }
    }

    let added: Vec<QueuedItem> = children
        .iter()
        .filter(|child| !old.contains(child.name.as_str()))
        .map(|child| {
            log::debug!("add index: {}", join(parent, &child.name));
            QueuedItem::new(child.clone(), parent)
        })
        .collect();
    if let Err(error) = searcher::batch_index(searcher, ignore_paths, &added).await {
        log::error!("index update could not add {} items under {parent}: {error}", added.len());
        return Err(error);
    }
    Ok(())
}
