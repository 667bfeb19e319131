//! Lazily-advancing cursors over query results
//!
//! A [`Cursor`] moves through three states:
//!
//! - `Open`: the server may still yield documents
//! - `Exhausted`: the stream ended; `next` keeps returning `Ok(None)`
//! - `Closed`: resources released; `next` returns a cursor error
//!
//! The server cursor is released on the first of: exhaustion, `close`, a
//! transport failure, or the `Cursor` going out of scope.

use docwire_common::{DocWireError, Result};
use futures::Stream;
use std::marker::PhantomData;

use crate::client::Client;
use crate::codec;
use crate::document::Document;
use crate::transport::{CollectionRef, Namespace, WireCursor};

/// Lifecycle state of a [`Cursor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Open,
    Exhausted,
    Closed,
}

/// Stateful iterator over a server-side result stream
///
/// Borrows the issuing [`Client`], so the client cannot be shut down while
/// the cursor is alive. A cursor must be driven by one caller at a time.
pub struct Cursor<'c> {
    namespace: Namespace,
    state: CursorState,
    inner: Option<Box<dyn WireCursor>>,
    _client: PhantomData<&'c Client>,
}

impl<'c> Cursor<'c> {
    /// Encode the filter and options and issue the query
    ///
    /// Both wire documents are handed to the transport and released when
    /// the call returns, whether or not the query succeeded.
    pub(crate) async fn open(
        collection: &dyn CollectionRef,
        filter: &Document,
        options: &Document,
    ) -> Result<Cursor<'c>> {
        let filter = codec::encode(filter)?;
        let options = codec::encode(options)?;
        let inner = collection.find(filter, options).await?;
        Ok(Self::from_wire(collection.namespace().clone(), inner))
    }

    pub(crate) fn from_wire(namespace: Namespace, inner: Box<dyn WireCursor>) -> Self {
        Self {
            namespace,
            state: CursorState::Open,
            inner: Some(inner),
            _client: PhantomData,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Pull the next document
    ///
    /// Returns `Ok(None)` once the stream is exhausted, and on every call
    /// after that until the cursor is closed. May wait on the server for
    /// the next batch.
    ///
    /// # Errors
    /// - `DocWireError::CursorState` if the cursor was closed
    /// - any transport error; the cursor is closed before it is returned
    pub async fn next(&mut self) -> Result<Option<Document>> {
        match self.state {
            CursorState::Closed => {
                return Err(DocWireError::CursorState(format!(
                    "cursor on {} is closed",
                    self.namespace
                )))
            }
            CursorState::Exhausted => return Ok(None),
            CursorState::Open => {}
        }

        let advanced = match self.inner.as_mut() {
            Some(inner) => inner.advance().await,
            None => Ok(None),
        };

        match advanced.and_then(|wire| wire.map(codec::decode).transpose()) {
            Ok(Some(document)) => Ok(Some(document)),
            Ok(None) => {
                tracing::debug!("cursor on {} exhausted", self.namespace);
                self.release(CursorState::Exhausted);
                Ok(None)
            }
            Err(err) => {
                tracing::warn!("closing cursor on {} after error: {}", self.namespace, err);
                self.release(CursorState::Closed);
                Err(err)
            }
        }
    }

    /// Collect every remaining document
    ///
    /// Memory grows with the result size; prefer [`Cursor::next`] in a loop
    /// for unbounded results.
    pub async fn drain(&mut self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    /// Release the server cursor. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.state != CursorState::Closed {
            tracing::debug!("closing cursor on {}", self.namespace);
            self.release(CursorState::Closed);
        }
    }

    /// Adapt into a `Stream` that ends at exhaustion or after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> + 'c {
        futures::stream::unfold(Some(self), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(document)) => Some((Ok(document), Some(cursor))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn release(&mut self, state: CursorState) {
        self.inner = None;
        self.state = state;
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::debug!("releasing open cursor on {} at end of scope", self.namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireDocument;
    use crate::document;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays a fixed script of transport responses and counts releases
    struct ScriptedCursor {
        script: VecDeque<Result<Option<WireDocument>>>,
        advances: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WireCursor for ScriptedCursor {
        async fn advance(&mut self) -> Result<Option<WireDocument>> {
            self.advances.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    impl Drop for ScriptedCursor {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Tracker {
        advances: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    fn scripted(steps: Vec<Result<Option<Document>>>) -> (Cursor<'static>, Tracker) {
        let script = steps
            .into_iter()
            .map(|step| step.map(|doc| doc.map(|d| codec::encode(&d).unwrap())))
            .collect();
        let advances = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let inner = ScriptedCursor {
            script,
            advances: advances.clone(),
            released: released.clone(),
        };
        let cursor = Cursor::from_wire(Namespace::new("db", "coll"), Box::new(inner));
        (cursor, Tracker { advances, released })
    }

    fn docs(n: i64) -> Vec<Result<Option<Document>>> {
        (1..=n).map(|i| Ok(Some(document!({ "_id": i })))).collect()
    }

    #[tokio::test]
    async fn test_next_yields_in_order_then_exhausts() {
        let (mut cursor, tracker) = scripted(docs(2));

        assert_eq!(cursor.next().await.unwrap(), Some(document!({ "_id": 1 })));
        assert_eq!(cursor.next().await.unwrap(), Some(document!({ "_id": 2 })));
        assert_eq!(cursor.state(), CursorState::Open);
        assert_eq!(cursor.next().await.unwrap(), None);
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_idempotent() {
        let (mut cursor, tracker) = scripted(docs(1));
        cursor.drain().await.unwrap();

        for _ in 0..3 {
            assert_eq!(cursor.next().await.unwrap(), None);
        }
        // No further trips to the transport once exhausted
        assert_eq!(tracker.advances.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut cursor, tracker) = scripted(docs(3));
        cursor.next().await.unwrap();

        cursor.close();
        cursor.close();
        assert_eq!(cursor.state(), CursorState::Closed);
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_after_exhaustion() {
        let (mut cursor, tracker) = scripted(Vec::new());
        assert_eq!(cursor.next().await.unwrap(), None);
        cursor.close();
        assert_eq!(cursor.state(), CursorState::Closed);
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_after_close_is_an_error() {
        let (mut cursor, _tracker) = scripted(docs(2));
        cursor.close();

        let err = cursor.next().await.unwrap_err();
        assert!(matches!(err, DocWireError::CursorState(_)));
        assert!(err.to_string().contains("db.coll"));
    }

    #[tokio::test]
    async fn test_drain_equals_repeated_next() {
        let (mut drained, _) = scripted(docs(5));
        let all = drained.drain().await.unwrap();

        let (mut stepped, _) = scripted(docs(5));
        let mut one_by_one = Vec::new();
        while let Some(doc) = stepped.next().await.unwrap() {
            one_by_one.push(doc);
        }

        assert_eq!(all.len(), 5);
        assert_eq!(all, one_by_one);
        assert_eq!(drained.state(), CursorState::Exhausted);
    }

    #[tokio::test]
    async fn test_drain_after_partial_next_returns_remainder() {
        let (mut cursor, _) = scripted(docs(3));
        cursor.next().await.unwrap();
        let rest = cursor.drain().await.unwrap();
        assert_eq!(rest, vec![document!({ "_id": 2 }), document!({ "_id": 3 })]);
    }

    #[tokio::test]
    async fn test_transport_error_closes_cursor() {
        let mut steps = docs(1);
        steps.push(Err(DocWireError::query_failed("cursor killed")));
        steps.extend(docs(1));
        let (mut cursor, tracker) = scripted(steps);

        assert!(cursor.next().await.unwrap().is_some());
        let err = cursor.next().await.unwrap_err();
        assert_eq!(err, DocWireError::query_failed("cursor killed"));
        assert_eq!(cursor.state(), CursorState::Closed);
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);

        assert!(matches!(cursor.next().await, Err(DocWireError::CursorState(_))));
    }

    #[tokio::test]
    async fn test_drain_surfaces_error_and_releases() {
        let mut steps = docs(2);
        steps.push(Err(DocWireError::Connection("reset by peer".to_string())));
        let (mut cursor, tracker) = scripted(steps);

        let err = cursor.drain().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_open_cursor() {
        let (mut cursor, tracker) = scripted(docs(3));
        cursor.next().await.unwrap();
        drop(cursor);
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_early_return_releases_cursor() {
        async fn first_with_id(cursor: &mut Cursor<'_>, id: i64) -> Result<Option<Document>> {
            while let Some(doc) = cursor.next().await? {
                if doc["_id"].as_i64() == Some(id) {
                    return Ok(Some(doc));
                }
            }
            Ok(None)
        }

        let (mut cursor, tracker) = scripted(docs(5));
        let found = first_with_id(&mut cursor, 2).await.unwrap();
        assert_eq!(found, Some(document!({ "_id": 2 })));
        assert_eq!(tracker.released.load(Ordering::SeqCst), 0);
        drop(cursor);
        assert_eq!(tracker.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (cursor, _) = scripted(docs(3));
        let collected: Vec<Document> = cursor.into_stream().try_collect().await.unwrap();
        assert_eq!(collected.len(), 3);
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_error() {
        let mut steps = docs(1);
        steps.push(Err(DocWireError::server("boom")));
        let (cursor, _) = scripted(steps);

        let items: Vec<Result<Document>> = futures::StreamExt::collect(cursor.into_stream()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
