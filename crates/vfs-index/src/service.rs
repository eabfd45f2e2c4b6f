//! IndexService - the control and query surface of the index.
//!
//! Wires the object source, the searcher slot, the settings and the progress
//! store to the builder, the incremental updater and the result filter.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::builder::IndexBuilder;
use crate::config::{BuildOptions, IndexSettings};
use crate::error::{IndexError, Result};
use crate::filter::{Principal, SearchQueryFilter};
use crate::hooks::HookRegistry;
use crate::progress::{recover_interrupted, BuildProgress, ProgressStore};
use crate::request::SearchRequest;
use crate::run_token::RunSlot;
use crate::searcher::{new_searcher, SearcherConfig, SearcherSlot, MODE_NONE};
use crate::source::ObjectSource;
use crate::types::{PageResp, SearchResult};
use crate::updater::IncrementalUpdater;

pub struct IndexService {
    source: Arc<dyn ObjectSource>,
    searcher: SearcherSlot,
    settings: Arc<RwLock<IndexSettings>>,
    progress: Arc<dyn ProgressStore>,
    builder: IndexBuilder,
    updater: Arc<IncrementalUpdater>,
    filter: SearchQueryFilter,
    hooks: HookRegistry,
}

impl std::fmt::Debug for IndexService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexService")
            .field("searcher", &self.searcher)
            .field("settings", &*self.settings.read())
            .field("builder", &self.builder)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl IndexService {
    /// Creates a service bound to the process-wide run slot. No searcher is
    /// installed until `init` or `init_searcher` runs.
    pub fn new(
        source: Arc<dyn ObjectSource>,
        settings: IndexSettings,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self::with_build(source, settings, progress, RunSlot::global(), BuildOptions::default())
    }

    pub fn with_build(
        source: Arc<dyn ObjectSource>,
        settings: IndexSettings,
        progress: Arc<dyn ProgressStore>,
        run_slot: Arc<RunSlot>,
        options: BuildOptions,
    ) -> Self {
        let searcher = SearcherSlot::default();
        let settings = Arc::new(RwLock::new(settings));
        let builder = IndexBuilder::new(
            source.clone(),
            searcher.clone(),
            progress.clone(),
            settings.clone(),
        )
        .with_run_slot(run_slot.clone())
        .with_options(options);
        let updater = Arc::new(IncrementalUpdater::new(
            source.clone(),
            searcher.clone(),
            settings.clone(),
            progress.clone(),
            run_slot,
        ));
        let hooks = HookRegistry::new();
        hooks.register(updater.clone());

        Self {
            filter: SearchQueryFilter::new(source.clone()),
            source,
            searcher,
            settings,
            progress,
            builder,
            updater,
            hooks,
        }
    }

    /// Startup: repairs a progress record left behind by a crashed build and
    /// installs the searcher named in the settings.
    pub async fn init(&self) -> Result<()> {
        if recover_interrupted(self.progress.as_ref()).await? {
            log::info!("previous index build was interrupted");
        }
        let mode = self.settings.read().search_mode.clone();
        self.init_searcher(&mode).await
    }

    /// Replaces the searcher. Refused while a build is running.
    pub async fn init_searcher(&self, mode: &str) -> Result<()> {
        let current = self.searcher.get();
        let current_mode = current
            .as_ref()
            .map(|searcher| searcher.config().name)
            .unwrap_or_else(|| MODE_NONE.to_string());
        if current_mode == mode {
            return Ok(());
        }
        if self.builder.is_running() {
            return Err(IndexError::BuildAlreadyRunning);
        }

        let ignore_paths = self.settings.read().ignore_paths.clone();
        let next = new_searcher(mode, self.source.clone(), ignore_paths)?;
        if next.is_none() {
            log::warn!("search is disabled");
        }
        if let Some(previous) = self.searcher.replace(next) {
            if let Err(error) = previous.release().await {
                log::error!("failed to release searcher {}: {error}", previous.config().name);
            }
        }
        self.settings.write().search_mode = mode.to_string();
        log::info!("searcher switched from {current_mode} to {mode}");
        Ok(())
    }

    /// Clears the index and rebuilds it from `paths` in the background,
    /// reporting progress.
    pub fn start_build(&self, paths: Vec<String>, max_depth: usize) -> Result<JoinHandle<Result<()>>> {
        if self.builder.is_running() {
            return Err(IndexError::BuildAlreadyRunning);
        }
        let searcher = self.searcher.require()?;
        let ignore_paths = self.settings.read().ignore_paths.clone();
        let builder = self.builder.clone();
        Ok(tokio::spawn(async move {
            if let Err(error) = searcher.clear().await {
                log::error!("clear index error: {error}");
                return Err(error);
            }
            let result = builder.build_index(&paths, &ignore_paths, max_depth, true).await;
            if let Err(error) = &result {
                log::error!("build index error: {error}");
            }
            result
        }))
    }

    /// Re-indexes `paths` in place: drops what is indexed under each one and
    /// walks them again without touching the progress record.
    pub fn update_index(&self, paths: Vec<String>, max_depth: usize) -> Result<JoinHandle<Result<()>>> {
        if self.builder.is_running() {
            return Err(IndexError::BuildAlreadyRunning);
        }
        let searcher = self.searcher.require()?;
        if !searcher.config().auto_update {
            return Err(IndexError::InvalidInput(
                "update is not supported for the current searcher".into(),
            ));
        }
        let ignore_paths = self.settings.read().ignore_paths.clone();
        let builder = self.builder.clone();
        Ok(tokio::spawn(async move {
            for path in &paths {
                if let Err(error) = searcher.delete(path).await {
                    log::error!("delete index of {path} error: {error}");
                    return Err(error);
                }
            }
            let result = builder.build_index(&paths, &ignore_paths, max_depth, false).await;
            if let Err(error) = &result {
                log::error!("update index error: {error}");
            }
            result
        }))
    }

    pub fn stop_build(&self) -> Result<()> {
        self.builder.stop_index()
    }

    pub fn is_building(&self) -> bool {
        self.builder.is_running()
    }

    pub async fn progress(&self) -> Result<BuildProgress> {
        self.progress.read().await
    }

    pub async fn delete_index(&self, prefix: &str) -> Result<()> {
        self.searcher.require()?.delete(prefix).await
    }

    pub async fn clear_index(&self) -> Result<()> {
        self.searcher.require()?.clear().await
    }

    pub fn config(&self) -> Result<SearcherConfig> {
        Ok(self.searcher.require()?.config())
    }

    pub fn settings(&self) -> IndexSettings {
        self.settings.read().clone()
    }

    /// Replaces the settings. The search mode is only applied by
    /// `init_searcher`.
    pub fn update_settings(&self, settings: IndexSettings) {
        *self.settings.write() = settings;
    }

    /// Registry the filesystem layer notifies after refreshing a listing.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn updater(&self) -> &Arc<IncrementalUpdater> {
        &self.updater
    }

    /// Runs a query on behalf of `principal`.
    pub async fn search(
        &self,
        mut request: SearchRequest,
        principal: &Principal,
    ) -> Result<PageResp<SearchResult>> {
        request.parent = principal.join_path(&request.parent)?;
        request.validate()?;
        let searcher = self.searcher.require()?;
        let (nodes, total) = searcher.search(&request).await?;
        let (nodes, total) =
            self.filter
                .apply(nodes, total, principal, &request.password, request.distinct);
        Ok(PageResp {
            content: nodes.into_iter().map(SearchResult::from).collect(),
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemoryProgressStore, INTERRUPTED_BUILD_ERROR};
    use crate::searcher::{MODE_DEFERRED, MODE_MEMORY};
    use crate::source::MemoryObjectSource;
    use std::time::Duration;

    fn service(source: Arc<MemoryObjectSource>) -> (IndexService, Arc<MemoryProgressStore>) {
        let progress = Arc::new(MemoryProgressStore::new());
        let service = IndexService::with_build(
            source,
            IndexSettings::default(),
            progress.clone(),
            Arc::new(RunSlot::new()),
            BuildOptions::default().with_tick(Duration::from_millis(10)),
        );
        (service, progress)
    }

    #[tokio::test]
    async fn init_recovers_progress_and_installs_searcher() {
        let (service, progress) = service(Arc::new(MemoryObjectSource::new()));
        progress.write(&BuildProgress::running(9)).await.expect("write");

        service.init().await.expect("init");

        let recovered = service.progress().await.expect("progress");
        assert!(recovered.is_done);
        assert_eq!(recovered.error, INTERRUPTED_BUILD_ERROR);
        assert_eq!(service.config().expect("config").name, MODE_MEMORY);
    }

    #[tokio::test]
    async fn operations_need_a_searcher() {
        let (service, _progress) = service(Arc::new(MemoryObjectSource::new()));
        assert!(matches!(service.config(), Err(IndexError::SearchNotAvailable)));
        assert!(matches!(
            service.clear_index().await,
            Err(IndexError::SearchNotAvailable)
        ));
        assert!(matches!(
            service.start_build(vec!["/".into()], 5),
            Err(IndexError::SearchNotAvailable)
        ));
        assert!(matches!(service.stop_build(), Err(IndexError::BuildNotRunning)));
    }

    #[tokio::test]
    async fn switching_searchers() {
        let (service, _progress) = service(Arc::new(MemoryObjectSource::new()));
        service.init_searcher(MODE_MEMORY).await.expect("memory");
        service.init_searcher(MODE_MEMORY).await.expect("unchanged");
        service.init_searcher(MODE_DEFERRED).await.expect("deferred");
        assert_eq!(service.config().expect("config").name, MODE_DEFERRED);
        assert_eq!(service.settings().search_mode, MODE_DEFERRED);

        service.init_searcher(MODE_NONE).await.expect("none");
        assert!(service.config().is_err());
        assert!(service.init_searcher("elastic").await.is_err());
    }

    #[tokio::test]
    async fn start_build_then_search() {
        let source = Arc::new(MemoryObjectSource::new());
        source.add_file("/docs/report.pdf", 10);
        source.add_file("/docs/notes.txt", 1);
        let (service, _progress) = service(source);
        service.init_searcher(MODE_MEMORY).await.expect("searcher");

        service
            .start_build(vec!["/".into()], 20)
            .expect("start")
            .await
            .expect("join")
            .expect("build");

        let page = service
            .search(SearchRequest::new("/", "report"), &Principal::admin("admin"))
            .await
            .expect("search");
        assert_eq!(page.total, 1);
        assert_eq!(page.content[0].name, "report.pdf");
        assert_eq!(page.content[0].parent, "/docs");

        let progress = service.progress().await.expect("progress");
        assert!(progress.is_done);
        // "/docs" is published by the root listing and again by its own walk item.
        assert_eq!(progress.object_count, 4);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let (service, _progress) = service(Arc::new(MemoryObjectSource::new()));
        service.init_searcher(MODE_MEMORY).await.expect("searcher");
        let request = SearchRequest {
            per_page: 0,
            ..SearchRequest::default()
        };
        let error = service
            .search(request, &Principal::admin("admin"))
            .await
            .expect_err("invalid");
        assert!(matches!(error, IndexError::InvalidInput(_)));
    }
}
