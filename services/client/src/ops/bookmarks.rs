//! services/client/src/ops/bookmarks.rs

use library_core::ports::Method;
use library_core::{Book, BookId};

use super::wire::{collect, BookRecord, BooksEnvelope, MessageEnvelope};
use super::Reply;
use crate::error::RequestError;
use crate::http_client::{ApiClient, CallOptions};

/// The current user's bookmarks. The server scopes them by the bearer token.
#[derive(Clone)]
pub struct BookmarksApi {
    api: ApiClient,
}

impl BookmarksApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<Book>, RequestError> {
        let envelope: BooksEnvelope = self.api.get("/bookmarks", &[]).await?;
        collect(envelope.books, BookRecord::into_domain)
    }

    pub async fn add(&self, book_id: BookId) -> Result<Reply<()>, RequestError> {
        self.call(Method::Post, book_id).await
    }

    pub async fn remove(&self, book_id: BookId) -> Result<Reply<()>, RequestError> {
        self.call(Method::Delete, book_id).await
    }

    async fn call(&self, method: Method, book_id: BookId) -> Result<Reply<()>, RequestError> {
        let envelope: MessageEnvelope = self
            .api
            .send_json::<(), _>(method, &format!("/bookmarks/{}", book_id), None, CallOptions::default())
            .await?;
        Ok(Reply::new((), envelope.message))
    }
}
