//! Permission filtering and de-duplication of raw search matches.
//!
//! Backends know nothing about users. Every match is re-checked here against
//! the requesting principal before it leaves the crate.

use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::paths::{is_sub_path, join, normalize, parent_of};
use crate::source::{Meta, ObjectSource};
use crate::types::SearchNode;

/// The user a query runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    /// Every path the principal can see lives under this one.
    pub base_path: String,
    pub is_admin: bool,
    pub can_see_hides: bool,
    pub can_access_without_password: bool,
}

impl Principal {
    pub fn new(username: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            base_path: normalize(&base_path.into()),
            is_admin: false,
            can_see_hides: false,
            can_access_without_password: false,
        }
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            can_see_hides: true,
            can_access_without_password: true,
            ..Self::new(username, "/")
        }
    }

    pub fn can_see_hides(&self) -> bool {
        self.is_admin || self.can_see_hides
    }

    pub fn can_access_without_password(&self) -> bool {
        self.is_admin || self.can_access_without_password
    }

    /// Resolves a request path relative to the base path. Paths that try to
    /// climb out with `..` are rejected.
    pub fn join_path(&self, request_path: &str) -> Result<String> {
        if request_path.split('/').any(|segment| segment == "..") {
            return Err(IndexError::InvalidInput(format!(
                "relative path is not allowed: {request_path}"
            )));
        }
        Ok(normalize(&join(&self.base_path, request_path.trim_start_matches('/'))))
    }

    /// Whether `principal` may see the object at `path`, given the meta
    /// nearest to its parent.
    pub fn can_access(&self, meta: Option<&Meta>, path: &str, password: &str) -> bool {
        self.can_access_with(meta, path, password, &mut HideRules::default())
    }

    fn can_access_with(
        &self,
        meta: Option<&Meta>,
        path: &str,
        password: &str,
        hide_rules: &mut HideRules,
    ) -> bool {
        if let Some(meta) = meta {
            if !self.can_see_hides()
                && !meta.hide.is_empty()
                && meta.applies_to(&parent_of(path), meta.h_sub)
            {
                let name = path.rsplit('/').next().unwrap_or_default();
                if hide_rules.get(meta).iter().any(|rule| rule.is_match(name)) {
                    return false;
                }
            }
        }
        if self.can_access_without_password() {
            return true;
        }
        let Some(meta) = meta else {
            return true;
        };
        if meta.password.is_empty() || !meta.applies_to(path, meta.p_sub) {
            return true;
        }
        meta.password == password
    }
}

/// Compiled hide patterns, keyed by meta path.
#[derive(Default)]
struct HideRules {
    compiled: FnvHashMap<String, Vec<Regex>>,
}

impl HideRules {
    fn get(&mut self, meta: &Meta) -> &[Regex] {
        self.compiled
            .entry(meta.path.clone())
            .or_insert_with(|| {
                meta.hide
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| match Regex::new(line) {
                        Ok(rule) => Some(rule),
                        Err(error) => {
                            log::warn!("ignoring invalid hide rule {line:?} on {}: {error}", meta.path);
                            None
                        }
                    })
                    .collect()
            })
    }
}

#[derive(Clone)]
pub struct SearchQueryFilter {
    source: Arc<dyn ObjectSource>,
}

impl std::fmt::Debug for SearchQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchQueryFilter").finish_non_exhaustive()
    }
}

impl SearchQueryFilter {
    pub fn new(source: Arc<dyn ObjectSource>) -> Self {
        Self { source }
    }

    /// Narrows one page of raw matches to what `principal` may see.
    ///
    /// With `distinct`, files sharing a case-insensitive name and size
    /// collapse onto the first one seen and the returned total is the
    /// filtered count. Without it the backend's total is passed through.
    pub fn apply(
        &self,
        nodes: Vec<SearchNode>,
        total: u64,
        principal: &Principal,
        password: &str,
        distinct: bool,
    ) -> (Vec<SearchNode>, u64) {
        let mut hide_rules = HideRules::default();
        let mut visible: Vec<SearchNode> = nodes
            .into_iter()
            .filter(|node| {
                if !is_sub_path(&principal.base_path, &node.parent) {
                    return false;
                }
                let meta = match self.source.nearest_meta(&node.parent) {
                    Ok(meta) => meta,
                    Err(error) => {
                        log::debug!("search result under {} dropped: {error}", node.parent);
                        return false;
                    }
                };
                principal.can_access_with(meta.as_ref(), &node.path(), password, &mut hide_rules)
            })
            .collect();

        if !distinct {
            return (visible, total);
        }
        visible = dedup(visible);
        let total = visible.len() as u64;
        (visible, total)
    }
}

fn dedup(nodes: Vec<SearchNode>) -> Vec<SearchNode> {
    let mut seen = FnvHashSet::default();
    nodes
        .into_iter()
        .filter(|node| node.is_dir || seen.insert(format!("{}|{}", node.name.to_lowercase(), node.size)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryObjectSource;

    fn node(parent: &str, name: &str, is_dir: bool, size: u64) -> SearchNode {
        SearchNode {
            parent: parent.into(),
            name: name.into(),
            is_dir,
            size,
        }
    }

    fn filter_with(metas: Vec<Meta>) -> SearchQueryFilter {
        let source = MemoryObjectSource::new();
        for meta in metas {
            source.set_meta(meta);
        }
        SearchQueryFilter::new(Arc::new(source))
    }

    #[test]
    fn distinct_collapses_same_name_and_size_files() {
        let filter = filter_with(Vec::new());
        let nodes = vec![
            node("/a", "X.txt", false, 10),
            node("/b", "x.TXT", false, 10),
            node("/c", "X.txt", false, 20),
            node("/d", "x", true, 0),
        ];
        let (kept, total) = filter.apply(nodes, 99, &Principal::admin("admin"), "", true);
        assert_eq!(kept.len(), 3);
        assert_eq!(total, 3);
        assert_eq!(kept[0].parent, "/a");
        assert!(kept.iter().any(|n| n.is_dir));
    }

    #[test]
    fn directories_are_never_collapsed() {
        let filter = filter_with(Vec::new());
        let nodes = vec![node("/a", "same", true, 0), node("/b", "same", true, 0)];
        let (kept, _) = filter.apply(nodes, 2, &Principal::admin("admin"), "", true);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn password_protected_results_are_dropped() {
        let filter = filter_with(vec![Meta {
            path: "/secret".into(),
            password: "hunter2".into(),
            p_sub: true,
            ..Meta::default()
        }]);
        let guest = Principal::new("guest", "/");
        let nodes = vec![node("/secret", "plans.txt", false, 1), node("/public", "readme", false, 1)];

        let (kept, total) = filter.apply(nodes.clone(), 40, &guest, "", false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].parent, "/public");
        assert_eq!(total, 40);

        let (kept, total) = filter.apply(nodes.clone(), 40, &guest, "", true);
        assert_eq!(kept.len(), 1);
        assert_eq!(total, 1);

        let (kept, _) = filter.apply(nodes, 40, &guest, "hunter2", false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn results_outside_base_path_are_dropped() {
        let filter = filter_with(Vec::new());
        let user = Principal {
            can_access_without_password: true,
            ..Principal::new("alice", "/home/alice")
        };
        let nodes = vec![
            node("/home/alice", "a", false, 1),
            node("/home/alice/docs", "b", false, 1),
            node("/home/alicex", "c", false, 1),
            node("/home/bob", "d", false, 1),
        ];
        let (kept, _) = filter.apply(nodes, 4, &user, "", false);
        let names: Vec<_> = kept.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn hide_rules_apply_unless_principal_sees_hides() {
        let meta = Meta {
            path: "/media".into(),
            hide: "^\\.\n[invalid\n\\.nfo$".into(),
            h_sub: true,
            ..Meta::default()
        };
        let filter = filter_with(vec![meta]);
        let nodes = vec![
            node("/media/show", ".hidden", false, 1),
            node("/media/show", "ep1.nfo", false, 1),
            node("/media/show", "ep1.mkv", false, 1),
        ];

        let (kept, _) = filter.apply(nodes.clone(), 3, &Principal::new("guest", "/"), "", false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "ep1.mkv");

        let (kept, _) = filter.apply(nodes, 3, &Principal::admin("admin"), "", false);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn hide_rules_without_sub_flag_only_cover_the_meta_directory() {
        let meta = Meta {
            path: "/media".into(),
            hide: "secret".into(),
            ..Meta::default()
        };
        let guest = Principal::new("guest", "/");
        assert!(!guest.can_access(Some(&meta), "/media/secret", ""));
        assert!(guest.can_access(Some(&meta), "/media/show/secret", ""));
    }

    #[test]
    fn join_path_confines_to_base() {
        let user = Principal::new("alice", "/home/alice");
        assert_eq!(user.join_path("/docs").expect("join"), "/home/alice/docs");
        assert_eq!(user.join_path("").expect("join"), "/home/alice");
        assert!(user.join_path("/../bob").is_err());
        assert!(user.join_path("docs/..").is_err());
    }
}
