//! Filters and pagination

use serde::{Deserialize, Serialize};

use super::condition_tree::ConditionTree;
use super::errors::{QueryError, QueryResult};
use super::record::RecordData;
use super::sort::Sort;

/// Skip/limit window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(skip: usize, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }

    pub fn apply(&self, records: Vec<RecordData>) -> Vec<RecordData> {
        let window = records.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }
}

/// Everything that narrows and orders a listing.
///
/// `search` and `segment` are resolved into the condition tree by the
/// request layer before a filter reaches a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_tree: Option<ConditionTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default)]
    pub search_extended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition_tree(mut self, tree: ConditionTree) -> Self {
        self.condition_tree = Some(tree);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>, extended: bool) -> Self {
        self.search = Some(search.into());
        self.search_extended = extended;
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    /// Only filters without search or segment can move under a relation
    pub fn is_nestable(&self) -> bool {
        self.search.is_none() && self.segment.is_none()
    }

    pub fn nest(&self, prefix: &str) -> QueryResult<Filter> {
        if !self.is_nestable() {
            return Err(QueryError::malformed("Filter can't be nested"));
        }
        Ok(Filter {
            condition_tree: self.condition_tree.as_ref().map(|t| t.nest(prefix)),
            sort: self.sort.as_ref().map(|s| s.nest(prefix)),
            ..self.clone()
        })
    }
}
