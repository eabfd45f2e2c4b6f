//! Directory-change notifications from the filesystem layer.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::Entry;

#[async_trait]
pub trait DirectoryChangeHook: Send + Sync {
    /// `children` is the complete, freshly refreshed listing of `parent`.
    async fn on_directory_changed(&self, parent: &str, children: &[Entry]) -> Result<()>;
}

/// Callbacks invoked whenever a directory listing is refreshed.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Arc<RwLock<Vec<Arc<dyn DirectoryChangeHook>>>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn DirectoryChangeHook>) {
        self.hooks.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Runs every hook in registration order. All hooks run; the first
    /// error is returned.
    pub async fn notify(&self, parent: &str, children: &[Entry]) -> Result<()> {
        let hooks = self.hooks.read().clone();
        let mut first_error = None;
        for hook in hooks {
            if let Err(error) = hook.on_directory_changed(parent, children).await {
                log::warn!("directory change hook failed for {parent}: {error}");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl DirectoryChangeHook for Recorder {
        async fn on_directory_changed(&self, parent: &str, children: &[Entry]) -> Result<()> {
            self.calls.lock().push((parent.to_string(), children.len()));
            if self.fail {
                return Err(IndexError::Backend("hook failed".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn notify_reaches_every_hook() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());

        let failing = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let healthy = Arc::new(Recorder::default());
        registry.register(failing.clone());
        registry.register(healthy.clone());
        assert_eq!(registry.len(), 2);

        let result = registry
            .notify("/docs", &[Entry::file("a", 1), Entry::dir("b")])
            .await;
        assert!(matches!(result, Err(IndexError::Backend(_))));
        assert_eq!(*healthy.calls.lock(), vec![("/docs".to_string(), 2)]);
        assert_eq!(failing.calls.lock().len(), 1);
    }
}
