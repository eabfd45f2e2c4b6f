//! Object source - the virtual filesystem as seen by the indexer.
//!
//! The indexer never touches storage drivers directly. It only needs to
//! resolve a path, list a directory with the right meta context, find the
//! storage a path belongs to, and look up the nearest meta for permission
//! checks. `MemoryObjectSource` implements all of that over an in-process
//! tree with mounts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::paths::{is_sub_path, normalize, parent_of};
use crate::types::Entry;

/// Storage backing a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub mount_path: String,
    /// Storages with indexing disabled are skipped by the walker.
    pub disable_index: bool,
}

/// Per-path access metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub path: String,
    pub password: String,
    /// Password also applies to sub paths.
    pub p_sub: bool,
    /// Newline-separated regexes of names hidden from principals that cannot see hides.
    pub hide: String,
    /// Hide rules also apply to sub paths.
    pub h_sub: bool,
}

impl Meta {
    /// Whether a meta rule at `self.path` applies to `path`.
    pub fn applies_to(&self, path: &str, sub: bool) -> bool {
        if normalize(&self.path) == normalize(path) {
            return true;
        }
        sub && is_sub_path(&self.path, path)
    }
}

#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Resolves a single object.
    async fn get(&self, path: &str) -> Result<Entry>;

    /// Lists a directory, using `meta` as the permission context.
    async fn list(&self, path: &str, meta: Option<&Meta>) -> Result<Vec<Entry>>;

    /// Storage that serves `path`, if any.
    fn storage(&self, path: &str) -> Option<StorageInfo>;

    /// True when a storage is mounted exactly at `path`.
    fn has_storage(&self, path: &str) -> bool;

    /// The meta closest to `path` walking up. `Ok(None)` when no meta exists.
    fn nearest_meta(&self, path: &str) -> Result<Option<Meta>>;
}

/// In-process object source.
#[derive(Debug)]
pub struct MemoryObjectSource {
    entries: RwLock<BTreeMap<String, Entry>>,
    mounts: RwLock<Vec<StorageInfo>>,
    metas: RwLock<HashMap<String, Meta>>,
    failing: RwLock<HashSet<String>>,
    list_delay: RwLock<Option<Duration>>,
    list_calls: AtomicUsize,
}

impl Default for MemoryObjectSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectSource {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), Entry::dir("/"));
        Self {
            entries: RwLock::new(entries),
            mounts: RwLock::new(Vec::new()),
            metas: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            list_delay: RwLock::new(None),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Adds a directory, creating missing ancestors.
    pub fn add_dir(&self, path: &str) {
        let path = normalize(path);
        self.ensure_ancestors(&path);
        let name = leaf_name(&path);
        self.entries.write().insert(path, Entry::dir(name));
    }

    /// Adds a file, creating missing ancestors.
    pub fn add_file(&self, path: &str, size: u64) {
        let path = normalize(path);
        self.ensure_ancestors(&path);
        let name = leaf_name(&path);
        self.entries.write().insert(path, Entry::file(name, size));
    }

    /// Removes an object and everything below it.
    pub fn remove(&self, path: &str) {
        let path = normalize(path);
        self.entries
            .write()
            .retain(|candidate, _| candidate == "/" || !is_sub_path(&path, candidate));
    }

    /// Mounts a storage at `path`; the mount point becomes a directory.
    pub fn mount(&self, path: &str, disable_index: bool) {
        let path = normalize(path);
        self.add_dir(&path);
        let mut mounts = self.mounts.write();
        mounts.retain(|mount| mount.mount_path != path);
        mounts.push(StorageInfo {
            mount_path: path,
            disable_index,
        });
    }

    pub fn set_meta(&self, meta: Meta) {
        let key = normalize(&meta.path);
        self.metas.write().insert(key, meta);
    }

    /// Makes every `list` of `path` fail.
    pub fn fail_listing(&self, path: &str) {
        self.failing.write().insert(normalize(path));
    }

    /// Slows every `list` call down.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.write() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Current children of a directory, sorted by name.
    pub fn children(&self, path: &str) -> Vec<Entry> {
        let path = normalize(path);
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.entries
            .read()
            .range(prefix.clone()..)
            .take_while(|(candidate, _)| candidate.starts_with(&prefix))
            .filter(|(candidate, _)| {
                candidate.len() > prefix.len() && !candidate[prefix.len()..].contains('/')
            })
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn ensure_ancestors(&self, path: &str) {
        let mut missing = Vec::new();
        let mut current = parent_of(path);
        {
            let entries = self.entries.read();
            while current != "/" && !entries.contains_key(&current) {
                missing.push(current.clone());
                current = parent_of(&current);
            }
        }
        let mut entries = self.entries.write();
        for dir in missing {
            let name = leaf_name(&dir);
            entries.entry(dir).or_insert_with(|| Entry::dir(name));
        }
    }
}

fn leaf_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_string()
}

#[async_trait]
impl ObjectSource for MemoryObjectSource {
    async fn get(&self, path: &str) -> Result<Entry> {
        let path = normalize(path);
        self.entries
            .read()
            .get(&path)
            .cloned()
            .ok_or(IndexError::ObjectNotFound(path))
    }

    async fn list(&self, path: &str, _meta: Option<&Meta>) -> Result<Vec<Entry>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.list_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let path = normalize(path);
        if self.failing.read().contains(&path) {
            return Err(IndexError::Listing {
                path,
                message: "listing failed".to_string(),
            });
        }
        match self.entries.read().get(&path) {
            None => return Err(IndexError::ObjectNotFound(path)),
            Some(entry) if !entry.is_dir => {
                return Err(IndexError::Listing {
                    path,
                    message: "not a directory".to_string(),
                })
            }
            Some(_) => {}
        }
        Ok(self.children(&path))
    }

    fn storage(&self, path: &str) -> Option<StorageInfo> {
        let path = normalize(path);
        self.mounts
            .read()
            .iter()
            .filter(|mount| is_sub_path(&mount.mount_path, &path))
            .max_by_key(|mount| mount.mount_path.len())
            .cloned()
    }

    fn has_storage(&self, path: &str) -> bool {
        let path = normalize(path);
        self.mounts.read().iter().any(|mount| mount.mount_path == path)
    }

    fn nearest_meta(&self, path: &str) -> Result<Option<Meta>> {
        let metas = self.metas.read();
        let mut current = normalize(path);
        loop {
            if let Some(meta) = metas.get(&current) {
                return Ok(Some(meta.clone()));
            }
            if current == "/" {
                return Ok(None);
            }
            current = parent_of(&current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_file_creates_ancestors() {
        let source = MemoryObjectSource::new();
        source.add_file("/a/b/c.txt", 5);

        assert!(source.get("/a").await.expect("a").is_dir);
        assert!(source.get("/a/b").await.expect("b").is_dir);
        let names: Vec<_> = source
            .list("/a/b", None)
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn list_only_returns_direct_children() {
        let source = MemoryObjectSource::new();
        source.add_file("/a/x", 1);
        source.add_file("/a/y/z", 1);
        source.add_file("/ab", 1);

        let names: Vec<_> = source
            .list("/a", None)
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["x", "y"]);

        let root: Vec<_> = source
            .list("/", None)
            .await
            .expect("list root")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(root, vec!["a", "ab"]);
    }

    #[tokio::test]
    async fn failing_and_missing_listings() {
        let source = MemoryObjectSource::new();
        source.add_dir("/locked");
        source.add_file("/file", 1);
        source.fail_listing("/locked");

        assert!(matches!(
            source.list("/locked", None).await,
            Err(IndexError::Listing { .. })
        ));
        assert!(matches!(
            source.list("/file", None).await,
            Err(IndexError::Listing { .. })
        ));
        assert!(matches!(
            source.list("/nope", None).await,
            Err(IndexError::ObjectNotFound(_))
        ));
        assert_eq!(source.list_calls(), 3);
    }

    #[tokio::test]
    async fn remove_drops_subtree() {
        let source = MemoryObjectSource::new();
        source.add_file("/a/b/c", 1);
        source.add_file("/ab", 1);
        source.remove("/a");

        assert!(source.get("/a/b").await.is_err());
        assert!(source.get("/ab").await.is_ok());
        assert!(source.get("/").await.is_ok());
    }

    #[test]
    fn storage_resolves_longest_mount() {
        let source = MemoryObjectSource::new();
        source.mount("/m", false);
        source.mount("/m/private", true);

        assert_eq!(
            source.storage("/m/private/x").map(|s| s.mount_path),
            Some("/m/private".to_string())
        );
        assert!(!source.storage("/m/x").expect("storage").disable_index);
        assert!(source.storage("/other").is_none());
        assert!(source.has_storage("/m/private"));
        assert!(!source.has_storage("/m/private/x"));
    }

    #[test]
    fn nearest_meta_walks_up() {
        let source = MemoryObjectSource::new();
        source.set_meta(Meta {
            path: "/a".into(),
            password: "pw".into(),
            ..Meta::default()
        });

        let meta = source.nearest_meta("/a/b/c").expect("lookup").expect("meta");
        assert_eq!(meta.path, "/a");
        assert!(source.nearest_meta("/z").expect("lookup").is_none());
    }

    #[test]
    fn meta_applies_to_sub_paths_only_when_flagged() {
        let meta = Meta {
            path: "/a".into(),
            ..Meta::default()
        };
        assert!(meta.applies_to("/a", false));
        assert!(!meta.applies_to("/a/b", false));
        assert!(meta.applies_to("/a/b", true));
        assert!(!meta.applies_to("/ab", true));
    }
}
