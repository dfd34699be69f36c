//! services/client/src/ops/wire.rs
//!
//! "Impure" wire records as the remote API sends them, and their conversion
//! into the fixed domain shapes. Endpoint revisions disagree on id types,
//! optional fields and nesting; all of that is absorbed here.

use chrono::{DateTime, NaiveDateTime, Utc};
use library_core::{
    Book, BookId, Category, CategoryId, CategoryRef, FileRef, Gender, ResourceKind, Role, UserId,
    UserRecord,
};
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

//=========================================================================================
// Scalars
//=========================================================================================

/// Ids arrive as numbers from some endpoints and as strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdRepr {
    Number(i64),
    Text(String),
}

impl IdRepr {
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            IdRepr::Number(n) => Some(*n),
            IdRepr::Text(s) => s.trim().parse().ok(),
        }
    }

    fn require(&self, what: &str) -> Result<i64, RequestError> {
        self.to_i64()
            .ok_or_else(|| RequestError::Protocol(format!("{} id {:?} is not numeric", what, self)))
    }
}

/// Accepts RFC 3339 as well as the `YYYY-MM-DD HH:MM:SS` form of SQL backends.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

//=========================================================================================
// Records
//=========================================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BookRecord {
    id: IdRepr,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    category_id: Option<IdRepr>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default, alias = "cover_image")]
    cover_image_path: Option<String>,
    #[serde(default, alias = "book_file")]
    file_path: Option<String>,
}

impl BookRecord {
    /// Raw file paths are never trusted; only their presence is kept, and the
    /// files are reached through the dedicated endpoints of the book id.
    pub fn into_domain(self) -> Result<Book, RequestError> {
        let id = BookId(self.id.require("book")?);
        let file_ref = |path: Option<String>, kind| {
            non_empty(path).map(|_| FileRef { book_id: id, kind })
        };
        Ok(Book {
            id,
            title: self.title.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            category: CategoryRef {
                id: self.category_id.and_then(|c| c.to_i64()).map(CategoryId),
                name: non_empty(self.category_name),
            },
            description: self.description.unwrap_or_default(),
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
            cover: file_ref(self.cover_image_path, ResourceKind::Cover),
            content: file_ref(self.file_path, ResourceKind::Content),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRecord {
    id: IdRepr,
    #[serde(alias = "name")]
    category_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl CategoryRecord {
    pub fn into_domain(self) -> Result<Category, RequestError> {
        Ok(Category {
            id: CategoryId(self.id.require("category")?),
            category_name: self.category_name,
            description: non_empty(self.description),
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
        })
    }
}

/// A user as sent by the API and as persisted in session storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: IdRepr,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl UserPayload {
    pub fn into_domain(self) -> Result<UserRecord, RequestError> {
        Ok(UserRecord {
            id: UserId(self.id.require("user")?),
            username: self.username.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            full_name: self.full_name.unwrap_or_default(),
            gender: self.gender.as_deref().and_then(Gender::parse),
            role: self.role.as_deref().map(Role::parse).unwrap_or(Role::Reader),
            contact_number: non_empty(self.contact_number),
            address: non_empty(self.address),
        })
    }
}

impl From<&UserRecord> for UserPayload {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: IdRepr::Number(user.id.0),
            username: Some(user.username.clone()),
            email: Some(user.email.clone()),
            full_name: Some(user.full_name.clone()),
            gender: user.gender.map(|g| g.as_str().to_string()),
            role: Some(user.role.as_str().to_string()),
            contact_number: user.contact_number.clone(),
            address: user.address.clone(),
        }
    }
}

//=========================================================================================
// Envelopes
//=========================================================================================

#[derive(Debug, Deserialize)]
pub struct BooksEnvelope {
    #[serde(default, alias = "data")]
    pub books: Vec<BookRecord>,
}

#[derive(Debug, Deserialize)]
pub struct BookEnvelope {
    #[serde(default, alias = "data")]
    pub book: Option<BookRecord>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CategoriesEnvelope {
    #[serde(default, alias = "data")]
    pub categories: Vec<CategoryRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryEnvelope {
    #[serde(default)]
    pub category: Option<CategoryRecord>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsersEnvelope {
    #[serde(default, alias = "data")]
    pub users: Vec<UserPayload>,
}

#[derive(Debug, Deserialize)]
pub struct UserEnvelope {
    #[serde(default)]
    pub user: Option<UserPayload>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginEnvelope {
    pub token: String,
    pub user: UserPayload,
}

/// Responses that carry nothing but an optional confirmation message.
#[derive(Debug, Default, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    pub message: Option<String>,
}

/// Converts every record of a list, failing on the first malformed one.
pub fn collect<R, T>(
    records: Vec<R>,
    convert: impl Fn(R) -> Result<T, RequestError>,
) -> Result<Vec<T>, RequestError> {
    records.into_iter().map(convert).collect()
}
