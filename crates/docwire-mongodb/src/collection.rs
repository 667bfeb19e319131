//! CRUD surface bound to one collection
//!
//! Every argument is encoded through [`crate::codec`] before it reaches the
//! transport and every result is decoded on the way back. Server errors are
//! returned as-is; nothing here retries.

use docwire_common::Result;

use crate::client::Client;
use crate::codec;
use crate::cursor::Cursor;
use crate::database::Database;
use crate::document::Document;
use crate::transport::{CollectionRef, Namespace};

/// Handle to a named collection
///
/// Owns its own server-side collection reference, released when the handle
/// is dropped. Any number of handles may point at the same collection.
pub struct Collection<'c> {
    client: &'c Client,
    namespace: Namespace,
    inner: Box<dyn CollectionRef>,
}

impl<'c> Collection<'c> {
    pub(crate) fn new(client: &'c Client, namespace: Namespace) -> Self {
        let inner = client.transport().collection(&namespace);
        Self {
            client,
            namespace,
            inner,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.namespace.collection
    }

    pub fn database_name(&self) -> &str {
        &self.namespace.database
    }

    /// Handle to the database this collection currently lives in
    pub fn database(&self) -> Database<'c> {
        self.client.database(&self.namespace.database)
    }

    /// Insert a single document
    pub async fn insert_one(&self, document: &Document) -> Result<()> {
        tracing::debug!("insert_one into {}", self.namespace);
        let wire = codec::encode(document)?;
        self.inner.insert_one(wire).await
    }

    /// Insert a batch in one ordered call
    ///
    /// Every document is encoded before anything is sent, so an encoding
    /// failure inserts nothing. If the server rejects part of the batch,
    /// documents before the failing one stay inserted and the error is
    /// returned; nothing is retried or rolled back. An empty slice is a no-op.
    pub async fn insert_many(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        tracing::debug!("insert_many into {} ({} documents)", self.namespace, documents.len());
        let batch = codec::encode_all(documents)?;
        self.inner.insert_many(batch).await
    }

    /// Query the collection
    pub async fn find(&self, filter: &Document) -> Result<Cursor<'c>> {
        self.find_with_options(filter, &Document::object()).await
    }

    /// Query with driver options such as `projection`, `sort`, `limit`,
    /// `skip` or `maxTimeMS`
    ///
    /// Option keys are conveyed to the transport without validation.
    pub async fn find_with_options(&self, filter: &Document, options: &Document) -> Result<Cursor<'c>> {
        tracing::debug!("find on {}", self.namespace);
        Cursor::open(self.inner.as_ref(), filter, options).await
    }

    /// First matching document, or `None` when nothing matches
    pub async fn find_one(&self, filter: &Document) -> Result<Option<Document>> {
        self.find_one_with_options(filter, &Document::object()).await
    }

    /// Like [`Collection::find_one`], honouring `sort`/`projection` options
    pub async fn find_one_with_options(&self, filter: &Document, options: &Document) -> Result<Option<Document>> {
        tracing::debug!("find_one on {}", self.namespace);
        let mut options = options.clone();
        if options.get("limit").is_none() {
            options.insert("limit", 1);
        }
        let mut cursor = self.find_with_options(filter, &options).await?;
        let first = cursor.next().await;
        cursor.close();
        first
    }

    /// Number of documents matching `filter`
    pub async fn count(&self, filter: &Document) -> Result<u64> {
        tracing::debug!("count on {}", self.namespace);
        let wire = codec::encode(filter)?;
        self.inner.count_documents(wire).await
    }

    /// Approximate total from collection metadata; ignores any filter
    pub async fn estimated_count(&self) -> Result<u64> {
        tracing::debug!("estimated_count on {}", self.namespace);
        self.inner.estimated_document_count().await
    }

    /// Apply an update document (e.g. `{"$set": {...}}`) to the first match
    ///
    /// Update operators are passed through uninterpreted.
    pub async fn update_one(&self, filter: &Document, update: &Document) -> Result<()> {
        tracing::debug!("update_one on {}", self.namespace);
        let filter = codec::encode(filter)?;
        let update = codec::encode(update)?;
        self.inner.update_one(filter, update).await
    }

    pub async fn update_many(&self, filter: &Document, update: &Document) -> Result<()> {
        tracing::debug!("update_many on {}", self.namespace);
        let filter = codec::encode(filter)?;
        let update = codec::encode(update)?;
        self.inner.update_many(filter, update).await
    }

    /// Replace the first document matching `filter` wholesale
    pub async fn replace_one(&self, filter: &Document, replacement: &Document) -> Result<()> {
        tracing::debug!("replace_one on {}", self.namespace);
        let filter = codec::encode(filter)?;
        let replacement = codec::encode(replacement)?;
        self.inner.replace_one(filter, replacement).await
    }

    pub async fn delete_one(&self, filter: &Document) -> Result<()> {
        tracing::debug!("delete_one on {}", self.namespace);
        let wire = codec::encode(filter)?;
        self.inner.delete_one(wire).await
    }

    pub async fn delete_many(&self, filter: &Document) -> Result<()> {
        tracing::debug!("delete_many on {}", self.namespace);
        let wire = codec::encode(filter)?;
        self.inner.delete_many(wire).await
    }

    /// Drop the collection and every document in it (irreversible)
    pub async fn drop(&self) -> Result<()> {
        tracing::info!("Dropping collection {}", self.namespace);
        self.inner.drop_collection().await
    }

    /// Rename the collection, possibly into another database
    ///
    /// With `drop_target`, an existing collection at the destination is
    /// dropped first. On success this handle follows the collection to its
    /// new name; on failure it keeps pointing at the old one.
    pub async fn rename(&mut self, database: &str, name: &str, drop_target: bool) -> Result<()> {
        let target = Namespace::new(database, name);
        tracing::info!("Renaming collection {} to {}", self.namespace, target);
        self.inner.rename(&target, drop_target).await?;

        self.inner = self.client.transport().collection(&target);
        self.namespace = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use crate::memory::MemoryTransport;
    use docwire_common::DocWireError;
    use std::sync::{Arc, Mutex};

    struct LogWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_names() {
        let client = Client::with_transport(MemoryTransport::new());
        let users = client.database("app").collection("users");
        assert_eq!(users.name(), "users");
        assert_eq!(users.database_name(), "app");
        assert_eq!(users.namespace().to_string(), "app.users");
        assert_eq!(users.database().name(), "app");
    }

    #[tokio::test]
    async fn test_encode_failure_sends_nothing() {
        let client = Client::with_transport(MemoryTransport::new());
        let items = client.database("app").collection("items");

        let batch = vec![document!({ "_id": 1 }), document!([1, 2])];
        let err = items.insert_many(&batch).await.unwrap_err();
        assert!(matches!(err, DocWireError::Encode(_)));
        assert_eq!(items.count(&document!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_many_empty_is_noop() {
        let client = Client::with_transport(MemoryTransport::new());
        let items = client.database("app").collection("items");
        items.insert_many(&[]).await.unwrap();
        assert!(client.database("app").list_collection_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_one_respects_explicit_limit_and_sort() {
        let client = Client::with_transport(MemoryTransport::new());
        let items = client.database("app").collection("items");
        items
            .insert_many(&[document!({ "_id": 1, "n": 5 }), document!({ "_id": 2, "n": 9 })])
            .await
            .unwrap();

        let top = items
            .find_one_with_options(&document!({}), &document!({ "sort": { "n": -1 } }))
            .await
            .unwrap();
        assert_eq!(top, Some(document!({ "_id": 2, "n": 9 })));
    }

    #[tokio::test]
    async fn test_reads_are_logged_at_debug() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer({
                let log = Arc::clone(&log);
                move || LogWriter(Arc::clone(&log))
            })
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let client = Client::with_transport(MemoryTransport::new());
        let items = client.database("app").collection("items");
        items.find_one(&document!({})).await.unwrap();
        items.count(&document!({})).await.unwrap();
        items.estimated_count().await.unwrap();

        let output = String::from_utf8(log.lock().unwrap().clone()).unwrap();
        assert!(output.contains("find_one on app.items"));
        assert!(output.contains(": count on app.items"));
        assert!(output.contains("estimated_count on app.items"));
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_old_name() {
        let client = Client::with_transport(MemoryTransport::new());
        let db = client.database("app");
        let mut a = db.collection("a");
        a.insert_one(&document!({ "_id": 1 })).await.unwrap();
        db.collection("b").insert_one(&document!({ "_id": 2 })).await.unwrap();

        let err = a.rename("app", "b", false).await.unwrap_err();
        assert!(err.operation_kind().is_some());
        assert_eq!(a.name(), "a");
        assert_eq!(a.count(&document!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rename_across_databases() {
        let client = Client::with_transport(MemoryTransport::new());
        let mut a = client.database("one").collection("a");
        a.insert_one(&document!({ "_id": 1 })).await.unwrap();

        a.rename("two", "moved", false).await.unwrap();
        assert_eq!(a.namespace().to_string(), "two.moved");
        assert_eq!(a.database().name(), "two");
        assert_eq!(a.count(&document!({})).await.unwrap(), 1);
        assert!(client.database("one").list_collection_names().await.unwrap().is_empty());
    }
}
