//! Transport seam between the document layer and a database driver
//!
//! The document layer only ever hands a transport encoded [`WireDocument`]s
//! and receives encoded documents or an error back. Connection strings,
//! server selection and the wire protocol itself live behind these traits.
//! [`crate::mongo::MongoTransport`] talks to a real server;
//! [`crate::memory::MemoryTransport`] keeps everything in process.

use async_trait::async_trait;
use docwire_common::Result;
use std::fmt;

use crate::codec::WireDocument;

/// Fully-qualified collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// A connection to a document database
///
/// Implementations must be safe to share between tasks; the document layer
/// adds no locking of its own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Acquire a server-side collection reference
    ///
    /// Must not perform I/O; the collection need not exist yet.
    fn collection(&self, namespace: &Namespace) -> Box<dyn CollectionRef>;

    /// Round-trip a no-op command to check the server is reachable
    async fn ping(&self) -> Result<()>;

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>>;

    /// Release the connection and any driver-wide state
    async fn shutdown(&self);
}

/// CRUD primitives bound to one namespace
///
/// Every argument is moved in: the transport owns the wire documents for
/// the duration of the call and they are freed when it returns, whatever
/// the outcome.
#[async_trait]
pub trait CollectionRef: Send + Sync {
    fn namespace(&self) -> &Namespace;

    async fn insert_one(&self, document: WireDocument) -> Result<()>;

    /// Ordered batch insert; stops at the first failure and reports it
    async fn insert_many(&self, documents: Vec<WireDocument>) -> Result<()>;

    async fn find(&self, filter: WireDocument, options: WireDocument) -> Result<Box<dyn WireCursor>>;

    async fn count_documents(&self, filter: WireDocument) -> Result<u64>;

    async fn estimated_document_count(&self) -> Result<u64>;

    async fn update_one(&self, filter: WireDocument, update: WireDocument) -> Result<()>;

    async fn update_many(&self, filter: WireDocument, update: WireDocument) -> Result<()>;

    async fn replace_one(&self, filter: WireDocument, replacement: WireDocument) -> Result<()>;

    async fn delete_one(&self, filter: WireDocument) -> Result<()>;

    async fn delete_many(&self, filter: WireDocument) -> Result<()>;

    async fn drop_collection(&self) -> Result<()>;

    async fn rename(&self, target: &Namespace, drop_target: bool) -> Result<()>;
}

/// Server-side result stream
///
/// Dropping the cursor releases its server resources.
#[async_trait]
pub trait WireCursor: Send {
    /// Next document, or `None` once the stream is exhausted
    async fn advance(&mut self) -> Result<Option<WireDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::new("shop", "orders");
        assert_eq!(ns.to_string(), "shop.orders");
        assert_eq!(ns.database, "shop");
        assert_eq!(ns.collection, "orders");
    }

    #[test]
    fn test_namespace_ordering() {
        let mut names = vec![Namespace::new("b", "a"), Namespace::new("a", "z"), Namespace::new("a", "b")];
        names.sort();
        assert_eq!(
            names,
            vec![Namespace::new("a", "b"), Namespace::new("a", "z"), Namespace::new("b", "a")]
        );
    }
}
