//! JSON-document client layer for MongoDB
//!
//! Applications work with [`Document`], a JSON-shaped value with ordered
//! object keys, and never see BSON. Every call encodes its arguments to the
//! wire format, hands them to a [`Transport`], and decodes what comes back.
//!
//! # Features
//! - Extended JSON round-trips (`$oid`, `$date`, `$numberLong`)
//! - Lazily-advancing cursors with explicit Open/Exhausted/Closed states
//! - Handles that borrow the [`Client`], so it cannot be torn down under them
//! - An in-process [`MemoryTransport`] for tests
//!
//! ```ignore
//! let client = Client::connect("mongodb://localhost:27017").await?;
//! let users = client.database("app").collection("users");
//! users.insert_one(&document!({ "name": "a" })).await?;
//! let found = users.find_one(&document!({ "name": "a" })).await?;
//! client.shutdown().await;
//! ```

pub mod client;
pub mod codec;
pub mod collection;
pub mod cursor;
pub mod database;
pub mod document;
pub mod memory;
pub mod mongo;
pub mod query;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use codec::WireDocument;
pub use collection::Collection;
pub use cursor::{Cursor, CursorState};
pub use database::Database;
pub use docwire_common::{DocWireError, OperationKind, Result};
pub use document::{Document, DocumentKind};
pub use memory::MemoryTransport;
pub use mongo::MongoTransport;
pub use query::QueryBuilder;
pub use transport::{CollectionRef, Namespace, Transport, WireCursor};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
