//! crates/library_core/src/domain.rs
//!
//! Defines the pure, core data structures of the library client.
//! These structs are independent of any wire format or storage backend;
//! response shapes are normalized into them at the operations boundary.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

//=========================================================================================
// Identifiers
//=========================================================================================

/// Server-assigned identifier of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookId(pub i64);

/// Server-assigned identifier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Server-assigned identifier of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(pub i64);

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//=========================================================================================
// Users and Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Reader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reader => "reader",
        }
    }

    /// Anything that is not explicitly `admin` is treated as a reader.
    pub fn parse(value: &str) -> Role {
        if value.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Reader
        }
    }

    /// The route a freshly logged-in user of this role lands on.
    pub fn landing_route(&self) -> Route {
        match self {
            Role::Admin => Route::Admin,
            Role::Reader => Route::Home,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Gender> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

/// A user as known to the client. Login responses may only carry part of it,
/// in which case the missing text fields are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub gender: Option<Gender>,
    pub role: Role,
    /// Required only for admins.
    pub contact_number: Option<String>,
    /// Required only for admins.
    pub address: Option<String>,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fills every empty or absent field of `self` from `fallback`.
    /// Used to merge a full profile over the partial record returned by login.
    pub fn fill_from(mut self, fallback: &UserRecord) -> UserRecord {
        fn fill(target: &mut String, source: &str) {
            if target.is_empty() {
                *target = source.to_string();
            }
        }
        fill(&mut self.username, &fallback.username);
        fill(&mut self.email, &fallback.email);
        fill(&mut self.full_name, &fallback.full_name);
        if self.gender.is_none() {
            self.gender = fallback.gender;
        }
        if self.contact_number.is_none() {
            self.contact_number = fallback.contact_number.clone();
        }
        if self.address.is_none() {
            self.address = fallback.address.clone();
        }
        self
    }

    /// Applies the submitted fields of a profile update on top of this record.
    pub fn apply(mut self, patch: &ProfilePatch) -> UserRecord {
        if let Some(username) = &patch.username {
            self.username = username.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(full_name) = &patch.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(gender) = patch.gender {
            self.gender = Some(gender);
        }
        if let Some(contact_number) = &patch.contact_number {
            self.contact_number = Some(contact_number.clone());
        }
        if let Some(address) = &patch.address {
            self.address = Some(address.clone());
        }
        self
    }
}

/// The authenticated identity held by the client.
///
/// A token is present if and only if a user is present; the constructors are
/// the only way to build one, so an orphaned token cannot be represented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    credentials: Option<(String, UserRecord)>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { credentials: None }
    }

    pub fn authenticated(token: String, user: UserRecord) -> Self {
        Self {
            credentials: Some((token, user)),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(token, _)| token.as_str())
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.credentials.as_ref().map(|(_, user)| user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Replaces the user record of an authenticated session. An anonymous
    /// session stays anonymous.
    pub fn with_user(self, user: UserRecord) -> Session {
        match self.credentials {
            Some((token, _)) => Session::authenticated(token, user),
            None => self,
        }
    }
}

//=========================================================================================
// Catalogue
//=========================================================================================

/// Which binary artefact of a book is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cover,
    Content,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cover => "cover",
            ResourceKind::Content => "content",
        }
    }

    /// Path of the dedicated endpoint serving this artefact.
    pub fn endpoint(&self, book_id: BookId) -> String {
        match self {
            ResourceKind::Cover => format!("/books/{}/cover", book_id),
            ResourceKind::Content => format!("/books/{}/download", book_id),
        }
    }

    /// Value of the `Accept` header sent when fetching this artefact.
    pub fn accept(&self) -> &'static str {
        match self {
            ResourceKind::Cover => "image/*",
            ResourceKind::Content => "application/pdf",
        }
    }

    /// Whether a declared content type is acceptable for this artefact.
    pub fn accepts(&self, content_type: &str) -> bool {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match self {
            ResourceKind::Cover => media_type.starts_with("image/"),
            ResourceKind::Content => media_type == "application/pdf",
        }
    }
}

/// Opaque reference to a book file, resolved through its dedicated endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub book_id: BookId,
    pub kind: ResourceKind,
}

impl FileRef {
    pub fn endpoint(&self) -> String {
        self.kind.endpoint(self.book_id)
    }
}

/// Category of a book; depending on the endpoint either side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryRef {
    pub id: Option<CategoryId>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub category: CategoryRef,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    pub cover: Option<FileRef>,
    pub content: Option<FileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub category_name: String,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Parameters of a book list read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BookFilter {
    /// Page number, starting at 1. `None` reads the unpaged list.
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub query: String,
    pub category: Option<String>,
}

impl BookFilter {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn search(query: impl Into<String>, category: Option<String>) -> Self {
        Self {
            query: query.into(),
            category,
            ..Self::default()
        }
    }

    /// A filter with a search text or a category goes to the search endpoint.
    pub fn is_search(&self) -> bool {
        !self.query.trim().is_empty() || self.category.as_deref().is_some_and(|c| !c.is_empty())
    }
}

//=========================================================================================
// Submissions
//=========================================================================================

/// A file attached to a multipart submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Fields of a new book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDraft {
    pub title: String,
    pub author: String,
    pub category_id: CategoryId,
    pub description: String,
    pub book_file: Option<FileUpload>,
    pub cover_image: Option<FileUpload>,
}

/// Any subset of a book's fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category_id: Option<CategoryId>,
    pub description: Option<String>,
    pub book_file: Option<FileUpload>,
    pub cover_image: Option<FileUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDraft {
    pub category_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub gender: Gender,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub gender: Option<Gender>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

//=========================================================================================
// Presentation Signals
//=========================================================================================

/// Views the client can direct the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Home,
    Admin,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Home => "/",
            Route::Admin => "/admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A short user-facing message (toast, inline alert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> UserRecord {
        UserRecord {
            id: UserId(7),
            username: "reader01".to_string(),
            email: String::new(),
            full_name: String::new(),
            gender: None,
            role: Role::Reader,
            contact_number: None,
            address: None,
        }
    }

    #[test]
    fn unknown_roles_fall_back_to_reader() {
        assert_eq!(Role::parse("ADMIN"), Role::Admin);
        assert_eq!(Role::parse("reader"), Role::Reader);
        assert_eq!(Role::parse("librarian"), Role::Reader);
        assert_eq!(Role::Admin.landing_route(), Route::Admin);
        assert_eq!(Role::Reader.landing_route(), Route::Home);
    }

    #[test]
    fn session_cannot_hold_token_without_user() {
        let session = Session::anonymous().with_user(reader());
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);

        let session = Session::authenticated("t0k".to_string(), reader());
        assert_eq!(session.token(), Some("t0k"));
        assert_eq!(session.user().map(|u| u.id), Some(UserId(7)));
    }

    #[test]
    fn profile_fills_gaps_of_partial_login_record() {
        let partial = reader();
        let profile = UserRecord {
            username: String::new(),
            email: "r@example.org".to_string(),
            full_name: "Rae Reader".to_string(),
            gender: Some(Gender::Female),
            ..reader()
        };

        let merged = profile.fill_from(&partial);
        assert_eq!(merged.username, "reader01");
        assert_eq!(merged.email, "r@example.org");
        assert_eq!(merged.gender, Some(Gender::Female));
    }

    #[test]
    fn patch_only_touches_submitted_fields() {
        let patch = ProfilePatch {
            full_name: Some("New Name".to_string()),
            address: Some("12 Shelf Road".to_string()),
            ..ProfilePatch::default()
        };
        let updated = reader().apply(&patch);
        assert_eq!(updated.full_name, "New Name");
        assert_eq!(updated.address.as_deref(), Some("12 Shelf Road"));
        assert_eq!(updated.username, "reader01");
    }

    #[test]
    fn content_types_are_matched_per_kind() {
        assert!(ResourceKind::Cover.accepts("image/png"));
        assert!(ResourceKind::Cover.accepts("IMAGE/JPEG; charset=binary"));
        assert!(!ResourceKind::Cover.accepts("text/html; charset=utf-8"));
        assert!(ResourceKind::Content.accepts("application/pdf"));
        assert!(!ResourceKind::Content.accepts("application/json"));
        assert_eq!(ResourceKind::Content.endpoint(BookId(42)), "/books/42/download");
    }

    #[test]
    fn filter_with_text_or_category_is_a_search() {
        assert!(!BookFilter::page(1, 12).is_search());
        assert!(BookFilter::search("dune", None).is_search());
        assert!(BookFilter::search("", Some("Fiction".to_string())).is_search());
        assert!(!BookFilter::search("  ", Some(String::new())).is_search());
    }
}
