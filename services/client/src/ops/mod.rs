//! services/client/src/ops/mod.rs
//!
//! Domain Operations: one typed client per remote resource. Each builds its
//! requests through the [`ApiClient`](crate::http_client::ApiClient) and
//! normalizes every response into domain types before returning it.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub mod auth;
pub mod bookmarks;
pub mod books;
pub mod categories;
pub mod profile;
pub mod users;
pub mod wire;

pub use auth::AuthApi;
pub use bookmarks::BookmarksApi;
pub use books::BooksApi;
pub use categories::CategoriesApi;
pub use profile::ProfileApi;
pub use users::UsersApi;

/// A successful call's result with the server's confirmation, if it sent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    pub data: T,
    pub message: Option<String>,
}

impl<T> Reply<T> {
    pub fn new(data: T, message: Option<String>) -> Self {
        Self { data, message }
    }
}

/// Everything but RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Escapes a value for use as one path segment.
pub(crate) fn segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}
