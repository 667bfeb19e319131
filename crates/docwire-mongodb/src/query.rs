//! Query builder for find operations

use docwire_common::Result;
use std::time::Duration;

use crate::collection::Collection;
use crate::cursor::Cursor;
use crate::document::Document;

/// Query builder for find operations
///
/// Collects a filter and the usual find options, then runs against any
/// [`Collection`]. Options left unset are not sent.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    filter: Document,
    sort: Option<Document>,
    skip: Option<u64>,
    limit: Option<i64>,
    projection: Option<Document>,
    batch_size: Option<u32>,
    max_time: Option<Duration>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    /// Create a query matching every document
    pub fn new() -> Self {
        Self {
            filter: Document::object(),
            sort: None,
            skip: None,
            limit: None,
            projection: None,
            batch_size: None,
            max_time: None,
        }
    }

    /// Set the filter document
    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    /// Set the sort order, e.g. `{"created_at": -1}`
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Server-side time limit; sent as whole milliseconds
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    pub fn get_filter(&self) -> &Document {
        &self.filter
    }

    pub fn get_sort(&self) -> Option<&Document> {
        self.sort.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn get_projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    /// The options document handed to `find_with_options`
    pub fn options(&self) -> Document {
        let mut options = Document::object();
        if let Some(sort) = &self.sort {
            options.insert("sort", sort.clone());
        }
        if let Some(skip) = self.skip {
            options.insert("skip", i64::try_from(skip).unwrap_or(i64::MAX));
        }
        if let Some(limit) = self.limit {
            options.insert("limit", limit);
        }
        if let Some(projection) = &self.projection {
            options.insert("projection", projection.clone());
        }
        if let Some(batch_size) = self.batch_size {
            options.insert("batchSize", i64::from(batch_size));
        }
        if let Some(max_time) = self.max_time {
            options.insert("maxTimeMS", i64::try_from(max_time.as_millis()).unwrap_or(i64::MAX));
        }
        options
    }

    /// Open a cursor over the matching documents
    pub async fn cursor<'c>(&self, collection: &Collection<'c>) -> Result<Cursor<'c>> {
        collection.find_with_options(&self.filter, &self.options()).await
    }

    /// Execute the query and return all matching documents
    pub async fn to_list(&self, collection: &Collection<'_>) -> Result<Vec<Document>> {
        let mut cursor = self.cursor(collection).await?;
        cursor.drain().await
    }

    /// First matching document in sort order
    pub async fn first(&self, collection: &Collection<'_>) -> Result<Option<Document>> {
        collection.find_one_with_options(&self.filter, &self.options()).await
    }
}
