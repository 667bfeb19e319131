//! Transport over the official MongoDB driver

use async_trait::async_trait;
use bson::{doc, Document as BsonDocument, RawDocumentBuf};
use docwire_common::{DocWireError, OperationKind, Result};
use mongodb::options::{ClientOptions, FindOptions};

use crate::client::ClientConfig;
use crate::codec::WireDocument;
use crate::transport::{CollectionRef, Namespace, Transport, WireCursor};

/// A pooled connection to a MongoDB deployment
pub struct MongoTransport {
    client: mongodb::Client,
}

impl MongoTransport {
    /// Parse the connection string, apply `config` and build the driver client
    ///
    /// The driver connects lazily, so an unreachable server only surfaces on
    /// the first operation (or on `ping`).
    pub async fn connect(uri: &str, config: &ClientConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| DocWireError::Connection(format!("Invalid connection string: {}", e)))?;
        config.apply(&mut options);

        let client = mongodb::Client::with_options(options)
            .map_err(|e| DocWireError::Connection(format!("Cannot create client: {}", e)))?;
        tracing::info!("MongoDB client created");

        Ok(Self { client })
    }

    /// Wrap a driver client built elsewhere
    pub fn from_client(client: mongodb::Client) -> Self {
        Self { client }
    }

    fn admin(&self) -> mongodb::Database {
        self.client.database("admin")
    }
}

#[async_trait]
impl Transport for MongoTransport {
    fn collection(&self, namespace: &Namespace) -> Box<dyn CollectionRef> {
        let collection = self
            .client
            .database(&namespace.database)
            .collection::<RawDocumentBuf>(&namespace.collection);
        Box::new(MongoCollection {
            namespace: namespace.clone(),
            admin: self.admin(),
            collection,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.admin().run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        let names = self.client.database(database).list_collection_names().await?;
        Ok(names)
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
        tracing::info!("MongoDB client shut down");
    }
}

struct MongoCollection {
    namespace: Namespace,
    admin: mongodb::Database,
    collection: mongodb::Collection<RawDocumentBuf>,
}

/// Server rejections of a read are query failures rather than generic ones
fn query_error(err: mongodb::error::Error) -> DocWireError {
    match DocWireError::from(err) {
        DocWireError::Operation {
            kind: OperationKind::ServerError,
            message,
        } => DocWireError::query_failed(message),
        other => other,
    }
}

/// Driver find options from an options document; `{}` means none
fn find_options(options: &WireDocument) -> Result<Option<FindOptions>> {
    let options = options.to_bson()?;
    if options.is_empty() {
        return Ok(None);
    }
    bson::from_document::<FindOptions>(options)
        .map(Some)
        .map_err(|e| DocWireError::query_failed(format!("invalid find options: {}", e)))
}

#[async_trait]
impl CollectionRef for MongoCollection {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    async fn insert_one(&self, document: WireDocument) -> Result<()> {
        self.collection.insert_one(document.into_raw()).await?;
        Ok(())
    }

    async fn insert_many(&self, documents: Vec<WireDocument>) -> Result<()> {
        let raw: Vec<RawDocumentBuf> = documents.into_iter().map(WireDocument::into_raw).collect();
        self.collection.insert_many(raw).await?;
        Ok(())
    }

    async fn find(&self, filter: WireDocument, options: WireDocument) -> Result<Box<dyn WireCursor>> {
        let filter = filter.to_bson()?;
        let options = find_options(&options)?;
        let cursor = self
            .collection
            .find(filter)
            .with_options(options)
            .await
            .map_err(query_error)?;
        Ok(Box::new(MongoCursor { cursor }))
    }

    async fn count_documents(&self, filter: WireDocument) -> Result<u64> {
        let count = self
            .collection
            .count_documents(filter.to_bson()?)
            .await
            .map_err(query_error)?;
        Ok(count)
    }

    async fn estimated_document_count(&self) -> Result<u64> {
        let count = self
            .collection
            .estimated_document_count()
            .await
            .map_err(query_error)?;
        Ok(count)
    }

    async fn update_one(&self, filter: WireDocument, update: WireDocument) -> Result<()> {
        self.collection.update_one(filter.to_bson()?, update.to_bson()?).await?;
        Ok(())
    }

    async fn update_many(&self, filter: WireDocument, update: WireDocument) -> Result<()> {
        self.collection.update_many(filter.to_bson()?, update.to_bson()?).await?;
        Ok(())
    }

    async fn replace_one(&self, filter: WireDocument, replacement: WireDocument) -> Result<()> {
        self.collection
            .replace_one(filter.to_bson()?, replacement.into_raw())
            .await?;
        Ok(())
    }

    async fn delete_one(&self, filter: WireDocument) -> Result<()> {
        self.collection.delete_one(filter.to_bson()?).await?;
        Ok(())
    }

    async fn delete_many(&self, filter: WireDocument) -> Result<()> {
        self.collection.delete_many(filter.to_bson()?).await?;
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        self.collection.drop().await?;
        Ok(())
    }

    async fn rename(&self, target: &Namespace, drop_target: bool) -> Result<()> {
        let command: BsonDocument = doc! {
            "renameCollection": self.namespace.to_string(),
            "to": target.to_string(),
            "dropTarget": drop_target,
        };
        self.admin.run_command(command).await?;
        Ok(())
    }
}

struct MongoCursor {
    cursor: mongodb::Cursor<RawDocumentBuf>,
}

#[async_trait]
impl WireCursor for MongoCursor {
    async fn advance(&mut self) -> Result<Option<WireDocument>> {
        if self.cursor.advance().await.map_err(query_error)? {
            let raw = self.cursor.current().to_raw_document_buf();
            Ok(Some(WireDocument::from_raw(raw)))
        } else {
            Ok(None)
        }
    }
}
