pub mod catalog;
pub mod sqlite;

pub use catalog::{import_catalog, load_catalog, CatalogFile};
pub use sqlite::SqliteResourceStore;

use anyhow::Result;
use async_trait::async_trait;
use keith_schema::Resource;

/// Lookup against the resource catalog.
///
/// `term` is matched case-insensitively as a substring of the description.
/// `category`, when set, restricts matches to resources carrying that tag as
/// primary or secondary category.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceQuery {
    pub term: String,
    pub category: Option<String>,
    pub limit: usize,
}

impl ResourceQuery {
    pub fn description_contains(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            category: None,
            limit: 1,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Results come back in store (insertion) order.
    async fn search(&self, query: &ResourceQuery) -> Result<Vec<Resource>>;

    /// Exact case-insensitive name match first, then the first name containing `name`.
    async fn find_by_name(&self, name: &str) -> Result<Option<Resource>>;

    async fn count(&self) -> Result<usize>;

    /// Distinct primary categories, sorted.
    async fn categories(&self) -> Result<Vec<String>>;

    /// Most recently added first.
    async fn recent(&self, limit: usize) -> Result<Vec<Resource>>;

    async fn insert(&self, resource: Resource) -> Result<Resource>;
}
