//! Named database handles

use docwire_common::Result;

use crate::client::Client;
use crate::collection::Collection;
use crate::transport::Namespace;

/// A named view onto the client's connection
///
/// Holds a borrow of the [`Client`], never ownership of the connection.
#[derive(Clone)]
pub struct Database<'c> {
    client: &'c Client,
    name: String,
}

impl<'c> Database<'c> {
    pub(crate) fn new(client: &'c Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a collection handle; performs no I/O
    pub fn collection(&self, name: &str) -> Collection<'c> {
        Collection::new(self.client, Namespace::new(self.name.as_str(), name))
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        self.client.transport().list_collection_names(&self.name).await
    }
}

impl std::fmt::Debug for Database<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::MemoryTransport;
    use crate::{document, Client};

    #[tokio::test]
    async fn test_collection_handles_are_independent() {
        let client = Client::with_transport(MemoryTransport::new());
        let db = client.database("app");

        let first = db.collection("users");
        let second = db.collection("users");
        first.insert_one(&document!({ "_id": 1 })).await.unwrap();

        assert_eq!(second.count(&document!({})).await.unwrap(), 1);
        drop(first);
        assert_eq!(second.count(&document!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_collection_names() {
        let client = Client::with_transport(MemoryTransport::new());
        let db = client.database("app");
        db.collection("b").insert_one(&document!({ "x": 1 })).await.unwrap();
        db.collection("a").insert_one(&document!({ "x": 1 })).await.unwrap();
        client.database("other").collection("c").insert_one(&document!({ "x": 1 })).await.unwrap();

        assert_eq!(db.list_collection_names().await.unwrap(), vec!["a", "b"]);
        assert_eq!(format!("{:?}", db), "Database { name: \"app\" }");
    }
}
