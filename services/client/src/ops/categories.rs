//! services/client/src/ops/categories.rs

use library_core::ports::Method;
use library_core::{Book, Category, CategoryDraft, CategoryId};
use serde::Serialize;

use super::wire::{collect, BookRecord, BooksEnvelope, CategoriesEnvelope, CategoryEnvelope, CategoryRecord, MessageEnvelope};
use super::{segment, Reply};
use crate::error::RequestError;
use crate::http_client::{ApiClient, CallOptions};

#[derive(Serialize)]
struct CategoryBody<'a> {
    category_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl<'a> From<&'a CategoryDraft> for CategoryBody<'a> {
    fn from(draft: &'a CategoryDraft) -> Self {
        Self {
            category_name: draft.category_name.trim(),
            description: draft.description.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct CategoriesApi {
    api: ApiClient,
}

impl CategoriesApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<Category>, RequestError> {
        let envelope: CategoriesEnvelope = self.api.get("/categories", &[]).await?;
        collect(envelope.categories, CategoryRecord::into_domain)
    }

    pub async fn books(&self, category_name: &str) -> Result<Vec<Book>, RequestError> {
        let path = format!("/categories/books/{}", segment(category_name));
        let envelope: BooksEnvelope = self.api.get(&path, &[]).await?;
        collect(envelope.books, BookRecord::into_domain)
    }

    pub async fn create(&self, draft: &CategoryDraft) -> Result<Reply<Option<Category>>, RequestError> {
        validate(draft)?;
        let envelope: CategoryEnvelope = self
            .api
            .send_json(Method::Post, "/categories", Some(&CategoryBody::from(draft)), CallOptions::default())
            .await?;
        let category = envelope.category.map(CategoryRecord::into_domain).transpose()?;
        Ok(Reply::new(category, envelope.message))
    }

    pub async fn update(&self, id: CategoryId, draft: &CategoryDraft) -> Result<Reply<()>, RequestError> {
        validate(draft)?;
        let envelope: MessageEnvelope = self
            .api
            .send_json(
                Method::Put,
                &format!("/categories/{}", id),
                Some(&CategoryBody::from(draft)),
                CallOptions::default(),
            )
            .await?;
        Ok(Reply::new((), envelope.message))
    }

    pub async fn delete(&self, id: CategoryId) -> Result<Reply<()>, RequestError> {
        let envelope: MessageEnvelope = self
            .api
            .send_json::<(), _>(Method::Delete, &format!("/categories/{}", id), None, CallOptions::default())
            .await?;
        Ok(Reply::new((), envelope.message))
    }
}

/// Category names are unique on the server and must not be blank.
fn validate(draft: &CategoryDraft) -> Result<(), RequestError> {
    if draft.category_name.trim().is_empty() {
        return Err(RequestError::Business("Category name is required".to_string()));
    }
    Ok(())
}
