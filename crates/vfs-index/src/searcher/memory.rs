//! In-process backend: exact, prefix and keyword matching over a sorted map
//! of full paths.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Searcher, SearcherConfig, MODE_MEMORY};
use crate::error::Result;
use crate::paths::{extension, is_sub_path, normalize};
use crate::request::{OrderBy, OrderDirection, Scope, SearchRequest};
use crate::types::SearchNode;

#[derive(Debug)]
pub struct MemorySearcher {
    nodes: RwLock<BTreeMap<String, SearchNode>>,
    auto_update: bool,
}

impl Default for MemorySearcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySearcher {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            auto_update: true,
        }
    }

    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.read().contains_key(&normalize(path))
    }

    /// Every indexed path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }
}

fn matches(node: &SearchNode, request: &SearchRequest, keywords: &[String]) -> bool {
    if !is_sub_path(&request.parent, &node.parent) {
        return false;
    }
    match request.scope {
        Scope::Any => {}
        Scope::DirOnly => {
            if !node.is_dir {
                return false;
            }
        }
        Scope::ByExtension => {
            if node.is_dir {
                return false;
            }
            match extension(&node.name) {
                Some(ext) if request.extensions.contains(&ext) => {}
                _ => return false,
            }
        }
    }
    if request.size_min > 0 && node.size < request.size_min {
        return false;
    }
    if request.size_max > 0 && node.size > request.size_max {
        return false;
    }
    let name = node.name.to_lowercase();
    keywords.iter().all(|keyword| name.contains(keyword.as_str()))
}

fn compare(a: &SearchNode, b: &SearchNode, order_by: OrderBy) -> Ordering {
    match order_by {
        OrderBy::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        OrderBy::Size => a.size.cmp(&b.size),
    }
}

#[async_trait]
impl Searcher for MemorySearcher {
    fn config(&self) -> SearcherConfig {
        SearcherConfig {
            name: MODE_MEMORY.to_string(),
            auto_update: self.auto_update,
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchNode>, u64)> {
        let keywords: Vec<String> = request
            .keywords
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let mut hits: Vec<SearchNode> = self
            .nodes
            .read()
            .values()
            .filter(|node| matches(node, request, &keywords))
            .cloned()
            .collect();

        if let Some(order_by) = request.order_by {
            hits.sort_by(|a, b| {
                let ordering = compare(a, b, order_by);
                match request.order_direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                }
            });
        }

        let total = hits.len() as u64;
        let page = hits
            .into_iter()
            .skip(request.offset())
            .take(request.per_page)
            .collect();
        Ok((page, total))
    }

    async fn batch_index(&self, nodes: Vec<SearchNode>) -> Result<()> {
        let mut index = self.nodes.write();
        for node in nodes {
            index.insert(node.path(), node);
        }
        Ok(())
    }

    async fn get_children(&self, parent: &str) -> Result<Vec<SearchNode>> {
        let parent = normalize(parent);
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|node| normalize(&node.parent) == parent)
            .cloned()
            .collect())
    }

    async fn delete(&self, prefix: &str) -> Result<()> {
        let prefix = normalize(prefix);
        self.nodes
            .write()
            .retain(|path, _| !is_sub_path(&prefix, path));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.nodes.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(parent: &str, name: &str, is_dir: bool, size: u64) -> SearchNode {
        SearchNode {
            parent: parent.into(),
            name: name.into(),
            is_dir,
            size,
        }
    }

    async fn seeded() -> MemorySearcher {
        let searcher = MemorySearcher::new();
        searcher
            .batch_index(vec![
                node("/", "docs", true, 0),
                node("/docs", "Report.PDF", false, 300),
                node("/docs", "report-draft.txt", false, 20),
                node("/docs", "reports", true, 0),
                node("/media", "movie.mkv", false, 5000),
                node("/mediax", "report.pdf", false, 1),
            ])
            .await
            .expect("seed");
        searcher
    }

    #[tokio::test]
    async fn keyword_match_is_case_insensitive_and_scoped() {
        let searcher = seeded().await;
        let (hits, total) = searcher
            .search(&SearchRequest::new("/docs", "report"))
            .await
            .expect("search");
        assert_eq!(total, 3);
        assert!(hits.iter().all(|hit| hit.parent == "/docs"));
    }

    #[tokio::test]
    async fn all_keywords_must_match() {
        let searcher = seeded().await;
        let (hits, _) = searcher
            .search(&SearchRequest::new("/", "report draft"))
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "report-draft.txt");
    }

    #[tokio::test]
    async fn scope_and_size_filters() {
        let searcher = seeded().await;

        let dirs = SearchRequest {
            scope: Scope::DirOnly,
            ..SearchRequest::new("/", "")
        };
        let (hits, _) = searcher.search(&dirs).await.expect("search");
        assert!(hits.iter().all(|hit| hit.is_dir));
        assert_eq!(hits.len(), 2);

        let pdfs = SearchRequest {
            scope: Scope::ByExtension,
            extensions: vec!["pdf".into()],
            size_min: 100,
            ..SearchRequest::new("/", "")
        };
        let (hits, _) = searcher.search(&pdfs).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Report.PDF");
    }

    #[tokio::test]
    async fn ordering_and_paging_use_unfiltered_total() {
        let searcher = seeded().await;
        let request = SearchRequest {
            order_by: Some(OrderBy::Size),
            order_direction: OrderDirection::Desc,
            per_page: 2,
            page: 1,
            ..SearchRequest::new("/", "")
        };
        let (hits, total) = searcher.search(&request).await.expect("search");
        assert_eq!(total, 6);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "movie.mkv");

        let last_page = SearchRequest { page: 3, ..request };
        let (hits, _) = searcher.search(&last_page).await.expect("search");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_component_wise() {
        let searcher = seeded().await;
        searcher.delete("/docs").await.expect("delete");

        assert!(!searcher.contains("/docs"));
        assert!(!searcher.contains("/docs/reports"));
        assert!(searcher.contains("/media/movie.mkv"));
        assert_eq!(searcher.len(), 2);
    }

    #[tokio::test]
    async fn get_children_and_upsert() {
        let searcher = seeded().await;
        let children = searcher.get_children("/docs").await.expect("children");
        assert_eq!(children.len(), 3);

        searcher
            .batch_index(vec![node("/docs", "reports", true, 0)])
            .await
            .expect("reindex");
        assert_eq!(searcher.len(), 6);

        searcher.clear().await.expect("clear");
        assert!(searcher.is_empty());
    }
}
