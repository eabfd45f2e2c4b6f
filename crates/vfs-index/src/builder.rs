//! Full index builds.
//!
//! A build owns the process-wide `RunSlot` for its whole lifetime. The
//! calling task walks each root in turn and publishes into an `IndexQueue`;
//! a control task drains that queue into the searcher on a timer and
//! performs the final flush when the build stops, whichever side stops it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::{BuildOptions, IndexSettings};
use crate::error::{IndexError, Result};
use crate::paths::normalize;
use crate::progress::{BuildProgress, ProgressStore};
use crate::queue::IndexQueue;
use crate::run_token::{RunSlot, RunToken};
use crate::searcher::{self, Searcher, SearcherSlot};
use crate::source::ObjectSource;
use crate::walker::TreeWalker;

#[derive(Clone)]
pub struct IndexBuilder {
    source: Arc<dyn ObjectSource>,
    searcher: SearcherSlot,
    progress: Arc<dyn ProgressStore>,
    settings: Arc<RwLock<IndexSettings>>,
    run_slot: Arc<RunSlot>,
    options: BuildOptions,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("searcher", &self.searcher)
            .field("running", &self.run_slot.is_running())
            .field("options", &self.options)
            .finish()
    }
}

/// Everything the control task needs, moved into it at build start.
struct ControlLoop {
    queue: Arc<IndexQueue>,
    searcher: Arc<dyn Searcher>,
    progress: Arc<dyn ProgressStore>,
    batch_ignore_paths: Vec<String>,
    report_progress: bool,
    options: BuildOptions,
    token: Arc<RunToken>,
    run_slot: Arc<RunSlot>,
    first_error: Arc<Mutex<Option<String>>>,
    object_count: Arc<AtomicU64>,
}

/// Owned by the control task. Clears the live flag and frees the run slot
/// however the task ends, unwinding and abort included.
struct SlotRelease {
    token: Arc<RunToken>,
    run_slot: Arc<RunSlot>,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.token.mark_stopped();
        self.run_slot.release(self.token.id());
    }
}

/// Owned by the calling future. If the caller goes away before the build
/// finishes, the control loop is told to stop instead of ticking on.
struct StopOnDrop {
    token: Arc<RunToken>,
    run_slot: Arc<RunSlot>,
}

impl StopOnDrop {
    fn stop_if_owner(&self) -> bool {
        if self.run_slot.is_owner(self.token.id()) {
            self.token.request_stop();
            return true;
        }
        false
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.stop_if_owner() {
            log::debug!("build index {} abandoned by its caller", self.token.id());
        }
    }
}

impl IndexBuilder {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        searcher: SearcherSlot,
        progress: Arc<dyn ProgressStore>,
        settings: Arc<RwLock<IndexSettings>>,
    ) -> Self {
        Self {
            source,
            searcher,
            progress,
            settings,
            run_slot: RunSlot::global(),
            options: BuildOptions::default(),
        }
    }

    pub fn with_run_slot(mut self, run_slot: Arc<RunSlot>) -> Self {
        self.run_slot = run_slot;
        self
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run_slot(&self) -> &Arc<RunSlot> {
        &self.run_slot
    }

    pub fn is_running(&self) -> bool {
        self.run_slot.is_running()
    }

    /// Asks the running build to stop. Does not wait for it.
    pub fn stop_index(&self) -> Result<()> {
        self.run_slot.request_stop()
    }

    /// Walks every root in `root_paths` and indexes what it finds.
    ///
    /// Fails with `BuildAlreadyRunning` if another build holds the run slot.
    /// Returns after the control task has flushed the queue and released the
    /// slot. Listing failures only abandon the affected subtree; batch
    /// failures end up in the terminal progress record. A root that cannot
    /// be resolved stops the build and is returned.
    pub async fn build_index(
        &self,
        root_paths: &[String],
        ignore_paths: &[String],
        max_depth: usize,
        report_progress: bool,
    ) -> Result<()> {
        let searcher = self.searcher.require()?;
        let (token, stop_rx) = self.run_slot.acquire()?;
        log::info!("build index for: {root_paths:?}");
        log::info!("ignore paths: {ignore_paths:?}");

        let (batch_ignore_paths, ignore_system_files) = {
            let settings = self.settings.read();
            (settings.ignore_paths.clone(), settings.ignore_system_files)
        };
        let queue = Arc::new(IndexQueue::new());
        let first_error = Arc::new(Mutex::new(None));
        let object_count = Arc::new(AtomicU64::new(0));
        let caller = StopOnDrop {
            token: token.clone(),
            run_slot: self.run_slot.clone(),
        };

        if report_progress {
            write_progress(self.progress.as_ref(), &BuildProgress::running(0)).await;
        }

        let control = tokio::spawn(
            ControlLoop {
                queue: queue.clone(),
                searcher,
                progress: self.progress.clone(),
                batch_ignore_paths,
                report_progress,
                options: self.options,
                token: token.clone(),
                run_slot: self.run_slot.clone(),
                first_error: first_error.clone(),
                object_count: object_count.clone(),
            }
            .run(stop_rx),
        );

        let walker = TreeWalker::new(self.source.clone(), ignore_paths.to_vec())
            .with_system_file_filter(ignore_system_files)
            .with_options(&self.options);

        let mut result = Ok(());
        for root in root_paths {
            if !token.is_running() {
                break;
            }
            let root = normalize(root);
            let root_entry = match self.source.get(&root).await {
                Ok(entry) => entry,
                Err(error) => {
                    log::error!("build index could not resolve root {root}: {error}");
                    first_error.lock().get_or_insert_with(|| error.to_string());
                    result = Err(error);
                    break;
                }
            };
            let queue = queue.clone();
            walker
                .walk(&root, root_entry, max_depth, token.live_flag(), move |item| {
                    queue.publish(item)
                })
                .await;
        }

        if !caller.stop_if_owner() {
            log::debug!("build index for {root_paths:?} stopped by stop_index");
        }
        if let Err(error) = control.await {
            let error = format!("index control task failed: {error}");
            log::error!("{error}");
            if report_progress {
                let count = object_count.load(Ordering::SeqCst);
                write_progress(
                    self.progress.as_ref(),
                    &BuildProgress::finished(count, Some(error.clone())),
                )
                .await;
            }
            self.run_slot.release(token.id());
            return Err(IndexError::Internal(error));
        }
        result
    }
}

impl ControlLoop {
    async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        let _release = SlotRelease {
            token: self.token.clone(),
            run_slot: self.run_slot.clone(),
        };
        let tick = self.options.tick;
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    if self.queue.len() < self.options.high_water_mark
                        && ticks < self.options.stale_ticks
                    {
                        continue;
                    }
                    ticks = 0;
                    log::info!("index obj count: {}", self.count());
                    self.drain().await;
                    if self.report_progress {
                        write_progress(
                            self.progress.as_ref(),
                            &BuildProgress::running(self.count()),
                        )
                        .await;
                    }
                }
                _ = stop_rx.recv() => {
                    log::debug!("build index {} received stop", self.token.id());
                    break;
                }
            }
        }

        self.token.mark_stopped();
        self.drain().await;

        let error = self.first_error.lock().clone();
        match &error {
            Some(error) => log::error!("build index error: {error}"),
            None => log::info!("success build index, count: {}", self.count()),
        }
        if self.report_progress {
            write_progress(
                self.progress.as_ref(),
                &BuildProgress::finished(self.count(), error),
            )
            .await;
        }
    }

    fn count(&self) -> u64 {
        self.object_count.load(Ordering::SeqCst)
    }

    /// Sends everything queued right now to the searcher as one batch.
    async fn drain(&self) {
        let items = self.queue.consume_all();
        if items.is_empty() {
            return;
        }
        if let Some(last) = items.last() {
            log::debug!("current index: {}", last.parent);
        }
        match searcher::batch_index(self.searcher.as_ref(), &self.batch_ignore_paths, &items).await
        {
            Ok(()) => {
                self.object_count
                    .fetch_add(items.len() as u64, Ordering::SeqCst);
            }
            Err(error) => {
                log::error!("build index in batch error: {error}");
                self.first_error
                    .lock()
                    .get_or_insert_with(|| error.to_string());
            }
        }
    }
}

async fn write_progress(store: &dyn ProgressStore, progress: &BuildProgress) {
    if let Err(error) = store.write(progress).await {
        log::warn!("failed to write index progress: {error}");
    }
}
