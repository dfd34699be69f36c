//! services/client/src/ops/books.rs

use library_core::ports::{FormPart, Method};
use library_core::{Book, BookDraft, BookFilter, BookId, BookPatch};

use super::wire::{collect, BookEnvelope, BookRecord, BooksEnvelope, MessageEnvelope};
use super::Reply;
use crate::error::RequestError;
use crate::http_client::ApiClient;

#[derive(Clone)]
pub struct BooksApi {
    api: ApiClient,
}

impl BooksApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Reads a book list. Filters with a search text or category go to the
    /// search endpoint, the others to the paged listing.
    pub async fn list(&self, filter: &BookFilter, default_limit: u32) -> Result<Vec<Book>, RequestError> {
        let envelope: BooksEnvelope = if filter.is_search() {
            let mut query = vec![("q", filter.query.trim().to_string())];
            if let Some(category) = filter.category.as_ref().filter(|c| !c.is_empty()) {
                query.push(("category", category.clone()));
            }
            self.api.get("/books", &query).await?
        } else {
            let mut query = Vec::new();
            if let Some(page) = filter.page {
                query.push(("page", page.to_string()));
                query.push(("limit", filter.limit.unwrap_or(default_limit).to_string()));
            }
            self.api.get("/books/all", &query).await?
        };
        collect(envelope.books, BookRecord::into_domain)
    }

    pub async fn get(&self, id: BookId) -> Result<Book, RequestError> {
        let envelope: BookEnvelope = self.api.get(&format!("/books/{}", id), &[]).await?;
        envelope
            .book
            .ok_or_else(|| RequestError::NotFound("Book not found".to_string()))?
            .into_domain()
    }

    pub async fn create(&self, draft: &BookDraft) -> Result<Reply<Option<Book>>, RequestError> {
        let mut parts = vec![
            FormPart::text("title", draft.title.clone()),
            FormPart::text("author", draft.author.clone()),
            FormPart::text("category_id", draft.category_id.to_string()),
            FormPart::text("description", draft.description.clone()),
        ];
        if let Some(file) = &draft.book_file {
            parts.push(FormPart::file("book_file", file.clone()));
        }
        if let Some(cover) = &draft.cover_image {
            parts.push(FormPart::file("cover_image", cover.clone()));
        }

        let envelope: BookEnvelope = self.api.send_multipart(Method::Post, "/books", parts).await?;
        let book = envelope.book.map(BookRecord::into_domain).transpose()?;
        Ok(Reply::new(book, envelope.message))
    }

    /// Sends only the supplied fields; blank text fields are left out.
    pub async fn update(&self, id: BookId, patch: &BookPatch) -> Result<Reply<()>, RequestError> {
        let envelope: MessageEnvelope = self
            .api
            .send_multipart(Method::Put, &format!("/books/{}", id), update_parts(patch))
            .await?;
        Ok(Reply::new((), envelope.message))
    }

    pub async fn delete(&self, id: BookId) -> Result<Reply<()>, RequestError> {
        let envelope: MessageEnvelope = self
            .api
            .send_json::<(), _>(Method::Delete, &format!("/books/{}", id), None, Default::default())
            .await?;
        Ok(Reply::new((), envelope.message))
    }
}

fn update_parts(patch: &BookPatch) -> Vec<FormPart> {
    let text_fields = [
        ("title", patch.title.as_deref()),
        ("author", patch.author.as_deref()),
        ("description", patch.description.as_deref()),
    ];
    let mut parts: Vec<FormPart> = text_fields
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .filter(|v| !v.trim().is_empty())
                .map(|v| FormPart::text(name, v))
        })
        .collect();
    if let Some(category) = patch.category_id {
        parts.push(FormPart::text("category_id", category.to_string()));
    }
    if let Some(file) = &patch.book_file {
        parts.push(FormPart::file("book_file", file.clone()));
    }
    if let Some(cover) = &patch.cover_image {
        parts.push(FormPart::file("cover_image", cover.clone()));
    }
    parts
}
