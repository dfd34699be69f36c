//! services/client/src/library.rs
//!
//! The application facade. `Library` wires the session, the HTTP client, the
//! query cache and the resource manager together and exposes the reads and
//! mutations a view needs.
//!
//! Reads go through the cache. Mutations report their outcome through the
//! `Notifier` port and, on success only, invalidate every resource they
//! touch before returning.

use library_core::ports::{HttpTransport, Navigator, Notifier, SessionStorage};
use library_core::{
    Book, BookDraft, BookFilter, BookId, BookPatch, Category, CategoryDraft, CategoryId, Notice,
    PasswordChange, ProfilePatch, Registration, Role, Route, UserId, UserRecord,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, QueryCache, QueryResource};
use crate::config::Config;
use crate::error::RequestError;
use crate::http_client::ApiClient;
use crate::ops::{AuthApi, BookmarksApi, BooksApi, CategoriesApi, ProfileApi, Reply, UsersApi};
use crate::resources::{BlobRegistry, ResourceManager, ResourceScope};
use crate::session::{SessionSnapshot, SessionStore};

const BOOK_MUTATION: &[QueryResource] = &[
    QueryResource::Book,
    QueryResource::Books,
    QueryResource::CategoryBooks,
    QueryResource::Bookmarks,
];
const CATEGORY_MUTATION: &[QueryResource] = &[
    QueryResource::Categories,
    QueryResource::CategoryBooks,
    QueryResource::Books,
    QueryResource::Book,
];
const BOOKMARK_MUTATION: &[QueryResource] = &[QueryResource::Bookmarks];
const USER_MUTATION: &[QueryResource] = &[QueryResource::Users, QueryResource::Profile];
const PROFILE_MUTATION: &[QueryResource] = &[QueryResource::Profile, QueryResource::Users];

/// Cache keys of the reads `Library` offers, for subscribing to them.
pub mod keys {
    use super::*;

    pub fn book(id: BookId) -> CacheKey {
        CacheKey::new(QueryResource::Book).with(id)
    }

    pub fn books(filter: &BookFilter) -> CacheKey {
        CacheKey::new(QueryResource::Books)
            .with(filter.page.map(|p| p.to_string()).unwrap_or_default())
            .with(filter.limit.map(|l| l.to_string()).unwrap_or_default())
            .with(filter.query.trim())
            .with(filter.category.clone().unwrap_or_default())
    }

    pub fn category_books(name: &str) -> CacheKey {
        CacheKey::new(QueryResource::CategoryBooks).with(name)
    }

    pub fn categories() -> CacheKey {
        CacheKey::new(QueryResource::Categories)
    }

    pub fn bookmarks() -> CacheKey {
        CacheKey::new(QueryResource::Bookmarks)
    }

    pub fn users() -> CacheKey {
        CacheKey::new(QueryResource::Users)
    }

    pub fn profile(id: UserId) -> CacheKey {
        CacheKey::new(QueryResource::Profile).with(id)
    }
}

/// The collaborators the embedding application provides.
#[derive(Clone)]
pub struct LibraryPorts {
    pub transport: Arc<dyn HttpTransport>,
    pub storage: Arc<dyn SessionStorage>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkOutcome {
    Added,
    Removed,
    /// The bookmark already was in the wanted state, or the same intent is
    /// still being carried out.
    Unchanged,
}

/// A downloaded book file.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: String,
    pub bytes: bytes::Bytes,
}

/// Counts shown on the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardStats {
    pub users: usize,
    pub readers: usize,
    pub books: usize,
    pub categories: usize,
}

/// Marks a bookmark intent as in progress until dropped.
struct IntentGuard<'a> {
    intents: &'a Mutex<HashSet<BookId>>,
    book_id: BookId,
}

impl<'a> IntentGuard<'a> {
    fn claim(intents: &'a Mutex<HashSet<BookId>>, book_id: BookId) -> Option<Self> {
        lock(intents)
            .insert(book_id)
            .then_some(Self { intents, book_id })
    }
}

impl Drop for IntentGuard<'_> {
    fn drop(&mut self) {
        lock(self.intents).remove(&self.book_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Library {
    config: Config,
    session: Arc<SessionStore>,
    cache: QueryCache,
    resources: ResourceManager,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    auth_api: AuthApi,
    books_api: BooksApi,
    categories_api: CategoriesApi,
    bookmarks_api: BookmarksApi,
    users_api: UsersApi,
    profile_api: ProfileApi,
    bookmark_intents: Mutex<HashSet<BookId>>,
}

impl Library {
    /// Builds the client and restores the persisted session.
    pub fn new(config: Config, ports: LibraryPorts) -> Self {
        let session = Arc::new(SessionStore::new(ports.storage, ports.navigator.clone()));
        session.restore();

        let api = ApiClient::new(ports.transport, session.clone());
        let cache = QueryCache::following(config.cache.clone(), session.subscribe());
        let resources = ResourceManager::new(api.clone(), BlobRegistry::new(), config.placeholder_cover.clone());

        Self {
            auth_api: AuthApi::new(api.clone()),
            books_api: BooksApi::new(api.clone()),
            categories_api: CategoriesApi::new(api.clone()),
            bookmarks_api: BookmarksApi::new(api.clone()),
            users_api: UsersApi::new(api.clone()),
            profile_api: ProfileApi::new(api),
            config,
            session,
            cache,
            resources,
            navigator: ports.navigator,
            notifier: ports.notifier,
            bookmark_intents: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.session.user()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// A handle scope for one view. Dropping it releases its handles.
    pub fn resource_scope(&self) -> ResourceScope {
        self.resources.scope()
    }

    //-------------------------------------------------------------------------------------
    // Session
    //-------------------------------------------------------------------------------------

    /// Logs in and routes by role. Failures are reported as notices.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        match self.try_login(username, password).await {
            Ok(user) => {
                let name = if user.full_name.is_empty() { &user.username } else { &user.full_name };
                self.notifier.notify(Notice::success(format!("Welcome back, {}!", name)));
                true
            }
            Err(e) => {
                warn!(username, error = %e, "Login failed");
                self.notifier.notify(Notice::error(e.user_message("Login failed")));
                false
            }
        }
    }

    async fn try_login(&self, username: &str, password: &str) -> Result<UserRecord, RequestError> {
        let grant = self.auth_api.login(username, password).await?;
        self.session.begin_login(&grant.token)?;

        // The login answer may carry only part of the user.
        let user = match self.profile_api.get(grant.user.id).await {
            Ok(Some(profile)) => profile.fill_from(&grant.user),
            Ok(None) => grant.user,
            Err(e) => {
                self.session.abandon_login();
                return Err(e);
            }
        };

        match self.session.establish(grant.token, user.clone()) {
            Ok(route) => {
                info!(user_id = %user.id, route = route.path(), "Logged in");
                Ok(user)
            }
            Err(e) => {
                self.session.abandon_login();
                Err(e.into())
            }
        }
    }

    /// Registers an account and sends the user to the login view. Does not
    /// log in.
    pub async fn register(&self, registration: &Registration) -> bool {
        match self.auth_api.register(registration).await {
            Ok(reply) => {
                let message = reply
                    .message
                    .unwrap_or_else(|| "Registration successful! Please login.".to_string());
                self.notifier.notify(Notice::success(message));
                self.navigator.navigate(Route::Login);
                true
            }
            Err(e) => {
                self.notifier.notify(Notice::error(e.user_message("Registration failed")));
                false
            }
        }
    }

    pub fn logout(&self) {
        self.session.logout();
        self.cache.clear();
        self.notifier.notify(Notice::success("Logged out successfully"));
    }

    /// Updates a profile. The session's own record is merged with the
    /// server's answer, or with the submitted fields when there is none.
    pub async fn update_profile(&self, id: UserId, patch: &ProfilePatch) -> bool {
        match self.profile_api.update(id, patch).await {
            Ok(reply) => {
                if let Some(current) = self.session.user().filter(|u| u.id == id) {
                    let submitted = current.apply(patch);
                    let merged = match reply.data {
                        Some(server) => server.fill_from(&submitted),
                        None => submitted,
                    };
                    if let Err(e) = self.session.replace_user(merged) {
                        warn!(error = %e, "Failed to persist the updated profile");
                    }
                }
                self.cache.invalidate_all(PROFILE_MUTATION);
                let message = reply.message.unwrap_or_else(|| "Profile updated successfully".to_string());
                self.notifier.notify(Notice::success(message));
                true
            }
            Err(e) => {
                self.report(&e, "Failed to update profile");
                false
            }
        }
    }

    pub async fn change_password(&self, change: &PasswordChange) -> bool {
        self.mutate(
            &[],
            "Password changed successfully",
            "Failed to change password",
            self.users_api.change_password(change),
        )
        .await
        .is_ok()
    }

    //-------------------------------------------------------------------------------------
    // Reads
    //-------------------------------------------------------------------------------------

    pub async fn book(&self, id: BookId) -> Result<Arc<Book>, RequestError> {
        let ops = self.books_api.clone();
        self.cache
            .fetch(keys::book(id), move || {
                let ops = ops.clone();
                async move { ops.get(id).await }
            })
            .await
    }

    pub async fn books(&self, filter: &BookFilter) -> Result<Arc<Vec<Book>>, RequestError> {
        let ops = self.books_api.clone();
        let limit = self.config.page_size;
        let owned = filter.clone();
        self.cache
            .fetch(keys::books(filter), move || {
                let ops = ops.clone();
                let filter = owned.clone();
                async move { ops.list(&filter, limit).await }
            })
            .await
    }

    pub async fn category_books(&self, name: &str) -> Result<Arc<Vec<Book>>, RequestError> {
        let ops = self.categories_api.clone();
        let owned = name.to_string();
        self.cache
            .fetch(keys::category_books(name), move || {
                let ops = ops.clone();
                let name = owned.clone();
                async move { ops.books(&name).await }
            })
            .await
    }

    pub async fn categories(&self) -> Result<Arc<Vec<Category>>, RequestError> {
        let ops = self.categories_api.clone();
        self.cache
            .fetch(keys::categories(), move || {
                let ops = ops.clone();
                async move { ops.list().await }
            })
            .await
    }

    pub async fn bookmarks(&self) -> Result<Arc<Vec<Book>>, RequestError> {
        let ops = self.bookmarks_api.clone();
        self.cache
            .fetch(keys::bookmarks(), move || {
                let ops = ops.clone();
                async move { ops.list().await }
            })
            .await
    }

    pub async fn users(&self) -> Result<Arc<Vec<UserRecord>>, RequestError> {
        let ops = self.users_api.clone();
        self.cache
            .fetch(keys::users(), move || {
                let ops = ops.clone();
                async move { ops.list().await }
            })
            .await
    }

    pub async fn profile(&self, id: UserId) -> Result<Arc<UserRecord>, RequestError> {
        let ops = self.profile_api.clone();
        self.cache
            .fetch(keys::profile(id), move || {
                let ops = ops.clone();
                async move {
                    ops.get(id)
                        .await?
                        .ok_or_else(|| RequestError::NotFound("User not found".to_string()))
                }
            })
            .await
    }

    pub async fn is_bookmarked(&self, book_id: BookId) -> Result<bool, RequestError> {
        Ok(self.bookmarks().await?.iter().any(|b| b.id == book_id))
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, RequestError> {
        let all_books = BookFilter::default();
        let (users, books, categories) =
            tokio::try_join!(self.users(), self.books(&all_books), self.categories())?;
        Ok(DashboardStats {
            users: users.len(),
            readers: users.iter().filter(|u| u.role == Role::Reader).count(),
            books: books.len(),
            categories: categories.len(),
        })
    }

    //-------------------------------------------------------------------------------------
    // Mutations
    //-------------------------------------------------------------------------------------

    /// Runs a mutation. On success the given resources are invalidated before
    /// the result is returned; on failure nothing is invalidated.
    async fn mutate<T, Fut>(
        &self,
        invalidates: &[QueryResource],
        success: &str,
        fallback: &str,
        call: Fut,
    ) -> Result<T, RequestError>
    where
        Fut: Future<Output = Result<Reply<T>, RequestError>>,
    {
        match call.await {
            Ok(reply) => {
                if !invalidates.is_empty() {
                    self.cache.invalidate_all(invalidates);
                }
                let message = reply.message.unwrap_or_else(|| success.to_string());
                self.notifier.notify(Notice::success(message));
                Ok(reply.data)
            }
            Err(e) => {
                self.report(&e, fallback);
                Err(e)
            }
        }
    }

    /// Shows a failure. Expired sessions were already handled globally.
    fn report(&self, error: &RequestError, fallback: &str) {
        if *error != RequestError::Unauthorized {
            self.notifier.notify(Notice::error(error.user_message(fallback)));
        }
    }

    pub async fn create_book(&self, draft: &BookDraft) -> Result<Option<Book>, RequestError> {
        self.mutate(BOOK_MUTATION, "Book added successfully", "Failed to add book", self.books_api.create(draft))
            .await
    }

    pub async fn update_book(&self, id: BookId, patch: &BookPatch) -> Result<(), RequestError> {
        self.mutate(
            BOOK_MUTATION,
            "Book updated successfully",
            "Failed to update book",
            self.books_api.update(id, patch),
        )
        .await
    }

    pub async fn delete_book(&self, id: BookId) -> Result<(), RequestError> {
        self.mutate(BOOK_MUTATION, "Book deleted successfully", "Failed to delete book", self.books_api.delete(id))
            .await
    }

    pub async fn create_category(&self, draft: &CategoryDraft) -> Result<Option<Category>, RequestError> {
        self.mutate(
            CATEGORY_MUTATION,
            "Category created successfully",
            "Failed to create category",
            self.categories_api.create(draft),
        )
        .await
    }

    pub async fn update_category(&self, id: CategoryId, draft: &CategoryDraft) -> Result<(), RequestError> {
        self.mutate(
            CATEGORY_MUTATION,
            "Category updated successfully",
            "Failed to update category",
            self.categories_api.update(id, draft),
        )
        .await
    }

    pub async fn delete_category(&self, id: CategoryId) -> Result<(), RequestError> {
        self.mutate(
            CATEGORY_MUTATION,
            "Category deleted successfully",
            "Failed to delete category",
            self.categories_api.delete(id),
        )
        .await
    }

    pub async fn delete_user(&self, id: UserId) -> Result<(), RequestError> {
        self.mutate(USER_MUTATION, "User deleted successfully", "Failed to delete user", self.users_api.delete(id))
            .await
    }

    pub async fn add_bookmark(&self, book_id: BookId) -> Result<BookmarkOutcome, RequestError> {
        self.set_bookmark(book_id, Some(true)).await
    }

    pub async fn remove_bookmark(&self, book_id: BookId) -> Result<BookmarkOutcome, RequestError> {
        self.set_bookmark(book_id, Some(false)).await
    }

    /// Adds or removes, depending on the current bookmark set.
    pub async fn toggle_bookmark(&self, book_id: BookId) -> Result<BookmarkOutcome, RequestError> {
        self.set_bookmark(book_id, None).await
    }

    async fn set_bookmark(&self, book_id: BookId, wanted: Option<bool>) -> Result<BookmarkOutcome, RequestError> {
        let Some(_intent) = IntentGuard::claim(&self.bookmark_intents, book_id) else {
            debug!(book_id = %book_id, "Bookmark change already in progress");
            return Ok(BookmarkOutcome::Unchanged);
        };

        let current = match self.cache.peek::<Vec<Book>>(&keys::bookmarks()) {
            Some(books) => Some(books.iter().any(|b| b.id == book_id)),
            None if wanted.is_none() => Some(self.is_bookmarked(book_id).await?),
            None => None,
        };
        let add = wanted.unwrap_or(current != Some(true));
        if current == Some(add) {
            return Ok(BookmarkOutcome::Unchanged);
        }

        if add {
            self.mutate(
                BOOKMARK_MUTATION,
                "Book added to bookmarks",
                "Failed to add bookmark",
                self.bookmarks_api.add(book_id),
            )
            .await?;
            Ok(BookmarkOutcome::Added)
        } else {
            self.mutate(
                BOOKMARK_MUTATION,
                "Book removed from bookmarks",
                "Failed to remove bookmark",
                self.bookmarks_api.remove(book_id),
            )
            .await?;
            Ok(BookmarkOutcome::Removed)
        }
    }

    //-------------------------------------------------------------------------------------
    // Files
    //-------------------------------------------------------------------------------------

    /// Downloads a book file. Nothing is kept after the call.
    pub async fn download_book(&self, id: BookId) -> Result<Download, RequestError> {
        let payload = match self.resources.download(id).await {
            Ok(payload) => payload,
            Err(e) => {
                self.report(&e, "Failed to download book");
                return Err(e);
            }
        };

        let file_name = match payload.file_name {
            Some(name) => name,
            None => match self.book(id).await {
                Ok(book) => format!("{}.pdf", book.title),
                Err(_) => format!("book-{}.pdf", id),
            },
        };
        Ok(Download {
            file_name: sanitize_file_name(&file_name),
            content_type: payload.content_type,
            bytes: payload.bytes,
        })
    }
}

/// Keeps only the last path component of a server-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        "book.pdf".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_cannot_leave_the_target_directory() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("Dune.pdf"), "Dune.pdf");
        assert_eq!(sanitize_file_name("dir\\x.pdf"), "x.pdf");
        assert_eq!(sanitize_file_name(".."), "book.pdf");
    }

    #[test]
    fn book_list_keys_separate_pages_and_searches() {
        assert_ne!(keys::books(&BookFilter::page(1, 12)), keys::books(&BookFilter::page(2, 12)));
        assert_ne!(
            keys::books(&BookFilter::search("dune", None)),
            keys::books(&BookFilter::search("dune", Some("Poetry".to_string())))
        );
        assert_eq!(keys::books(&BookFilter::default()).resource(), QueryResource::Books);
    }
}
