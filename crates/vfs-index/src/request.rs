//! Search request model and validation.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

pub const MAX_PER_PAGE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Any,
    DirOnly,
    /// Files whose extension is in `SearchRequest::extensions`.
    ByExtension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    Name,
    Size,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub parent: String,
    pub keywords: String,
    pub scope: Scope,
    pub extensions: Vec<String>,
    /// Inclusive lower size bound; 0 means unbounded.
    pub size_min: u64,
    /// Inclusive upper size bound; 0 means unbounded.
    pub size_max: u64,
    pub order_by: Option<OrderBy>,
    pub order_direction: OrderDirection,
    /// Collapse files with the same case-insensitive name and size.
    pub distinct: bool,
    pub page: usize,
    pub per_page: usize,
    /// Password presented for password-protected metas.
    pub password: String,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            parent: "/".to_string(),
            keywords: String::new(),
            scope: Scope::Any,
            extensions: Vec::new(),
            size_min: 0,
            size_max: 0,
            order_by: None,
            order_direction: OrderDirection::Asc,
            distinct: false,
            page: 1,
            per_page: 100,
            password: String::new(),
        }
    }
}

impl SearchRequest {
    pub fn new(parent: impl Into<String>, keywords: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            keywords: keywords.into(),
            ..Self::default()
        }
    }

    /// Checks paging bounds and normalises extensions (lowercase, no dot).
    pub fn validate(&mut self) -> Result<()> {
        if self.page < 1 {
            return Err(IndexError::InvalidInput("page must be at least 1".into()));
        }
        if self.per_page < 1 || self.per_page > MAX_PER_PAGE {
            return Err(IndexError::InvalidInput(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        if self.size_max != 0 && self.size_min > self.size_max {
            return Err(IndexError::InvalidInput(
                "size_min must not exceed size_max".into(),
            ));
        }
        self.extensions = self
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.scope == Scope::ByExtension && self.extensions.is_empty() {
            return Err(IndexError::InvalidInput(
                "extension scope requires at least one extension".into(),
            ));
        }
        Ok(())
    }

    /// Offset of the first result of the requested page.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1)).saturating_mul(self.per_page)
    }
}
