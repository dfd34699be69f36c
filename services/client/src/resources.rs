//! services/client/src/resources.rs
//!
//! The Resource URL Manager. Authenticated binary endpoints (covers, book
//! files) are turned into local, revocable handles that a view can render.
//!
//! Handles are owned by a [`ResourceScope`], one per view. A scope holds at
//! most one live handle per (book, kind) slot and releases every handle it
//! created exactly once: on replacement, on explicit release, or when the
//! scope is closed or dropped.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use library_core::{BookId, ResourceKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RequestError, ResourceError};
use crate::http_client::{ApiClient, BinaryPayload};

const CONTENT_FAILURE: &str = "Failed to load PDF. Try downloading instead.";
const HANDLE_PREFIX: &str = "blob:library/";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//=========================================================================================
// Blob Registry
//=========================================================================================

/// The bytes behind a local handle.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    blobs: HashMap<String, Blob>,
    created: u64,
    revoked: u64,
}

/// Process-wide table of live local handles.
#[derive(Debug, Clone, Default)]
pub struct BlobRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` and returns the URL that resolves to them.
    pub fn create(&self, bytes: Bytes, content_type: &str) -> String {
        let url = format!("{}{}", HANDLE_PREFIX, Uuid::new_v4());
        let mut state = lock(&self.state);
        state.blobs.insert(
            url.clone(),
            Blob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        state.created += 1;
        url
    }

    pub fn resolve(&self, url: &str) -> Option<Blob> {
        lock(&self.state).blobs.get(url).cloned()
    }

    /// Frees the blob behind `url`. Returns false when it was already gone.
    pub fn revoke(&self, url: &str) -> bool {
        let mut state = lock(&self.state);
        let removed = state.blobs.remove(url).is_some();
        if removed {
            state.revoked += 1;
        }
        removed
    }

    /// Number of handles created and not yet revoked.
    pub fn live(&self) -> usize {
        lock(&self.state).blobs.len()
    }

    pub fn created(&self) -> u64 {
        lock(&self.state).created
    }

    pub fn revoked(&self) -> u64 {
        lock(&self.state).revoked
    }
}

//=========================================================================================
// Handles
//=========================================================================================

/// A renderable reference to a book's cover or content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub id: Uuid,
    pub book_id: BookId,
    pub kind: ResourceKind,
    pub url: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    /// The well-known default cover; not backed by a blob and never revoked.
    pub placeholder: bool,
    pub file_name: Option<String>,
}

impl ResourceHandle {
    fn placeholder(book_id: BookId, url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            kind: ResourceKind::Cover,
            url: url.to_string(),
            content_type: "image/*".to_string(),
            created_at: Utc::now(),
            placeholder: true,
            file_name: None,
        }
    }
}

type Fetch = Shared<BoxFuture<'static, Result<ResourceHandle, ResourceError>>>;

//=========================================================================================
// Manager
//=========================================================================================

/// Fetches binary resources and mints handles for them.
#[derive(Clone)]
pub struct ResourceManager {
    api: ApiClient,
    registry: BlobRegistry,
    placeholder_cover: String,
}

impl ResourceManager {
    pub fn new(api: ApiClient, registry: BlobRegistry, placeholder_cover: impl Into<String>) -> Self {
        Self {
            api,
            registry,
            placeholder_cover: placeholder_cover.into(),
        }
    }

    pub fn registry(&self) -> &BlobRegistry {
        &self.registry
    }

    pub fn placeholder_cover(&self) -> &str {
        &self.placeholder_cover
    }

    /// Opens a handle scope for one view.
    pub fn scope(&self) -> ResourceScope {
        ResourceScope {
            manager: self.clone(),
            state: Arc::new(Mutex::new(ScopeState::default())),
            tickets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fetches the book file once, without minting a handle.
    pub async fn download(&self, book_id: BookId) -> Result<BinaryPayload, RequestError> {
        self.api
            .get_binary(&ResourceKind::Content.endpoint(book_id), ResourceKind::Content)
            .await
    }

    /// Fetches one resource and turns it into a handle. Covers fall back to
    /// the placeholder; content failures are reported.
    async fn mint(self, book_id: BookId, kind: ResourceKind) -> Result<ResourceHandle, ResourceError> {
        match self.api.get_binary(&kind.endpoint(book_id), kind).await {
            Ok(payload) => {
                let url = self.registry.create(payload.bytes, &payload.content_type);
                info!(book_id = %book_id, kind = kind.as_str(), url = %url, "Resource handle created");
                Ok(ResourceHandle {
                    id: Uuid::new_v4(),
                    book_id,
                    kind,
                    url,
                    content_type: payload.content_type,
                    created_at: Utc::now(),
                    placeholder: false,
                    file_name: payload.file_name,
                })
            }
            Err(e) => match kind {
                ResourceKind::Cover => {
                    warn!(book_id = %book_id, error = %e, "Cover unavailable, using placeholder");
                    Ok(ResourceHandle::placeholder(book_id, &self.placeholder_cover))
                }
                ResourceKind::Content => {
                    warn!(book_id = %book_id, error = %e, "Book content unavailable");
                    Err(ResourceError::ContentUnavailable {
                        book_id,
                        message: e.user_message(CONTENT_FAILURE),
                    })
                }
            },
        }
    }

    fn dispose(&self, handle: &ResourceHandle) {
        if handle.placeholder {
            return;
        }
        if self.registry.revoke(&handle.url) {
            debug!(book_id = %handle.book_id, kind = handle.kind.as_str(), url = %handle.url, "Resource handle revoked");
        }
    }
}

//=========================================================================================
// Scopes
//=========================================================================================

#[derive(Default)]
struct Slot {
    handle: Option<ResourceHandle>,
    pending: Option<(u64, Fetch)>,
    last_error: Option<ResourceError>,
}

#[derive(Default)]
struct ScopeState {
    closed: bool,
    slots: HashMap<(BookId, ResourceKind), Slot>,
}

/// The handles owned by one view.
pub struct ResourceScope {
    manager: ResourceManager,
    state: Arc<Mutex<ScopeState>>,
    tickets: Arc<AtomicU64>,
}

impl ResourceScope {
    /// Returns the slot's handle, fetching it when there is none. Callers
    /// racing on the same slot share one fetch.
    pub async fn acquire(&self, book_id: BookId, kind: ResourceKind) -> Result<ResourceHandle, ResourceError> {
        self.load(book_id, kind, false).await
    }

    /// Fetches the slot again. The new handle replaces, and releases, the old.
    pub async fn refresh(&self, book_id: BookId, kind: ResourceKind) -> Result<ResourceHandle, ResourceError> {
        self.load(book_id, kind, true).await
    }

    async fn load(&self, book_id: BookId, kind: ResourceKind, replace: bool) -> Result<ResourceHandle, ResourceError> {
        let (ticket, fetch) = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(ResourceError::Closed);
            }
            let slot = state.slots.entry((book_id, kind)).or_default();
            let joined = match &slot.handle {
                _ if replace => None,
                Some(handle) => return Ok(handle.clone()),
                None => slot.pending.clone(),
            };
            match joined {
                Some(pending) => pending,
                None => {
                    let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
                    let fetch = self.manager.clone().mint(book_id, kind).boxed().shared();
                    slot.pending = Some((ticket, fetch.clone()));
                    (ticket, fetch)
                }
            }
        };

        let outcome = fetch.await;
        self.settle(book_id, kind, ticket, outcome)
    }

    /// Installs the outcome of fetch `ticket`, or throws its handle away when
    /// the slot has moved on.
    fn settle(
        &self,
        book_id: BookId,
        kind: ResourceKind,
        ticket: u64,
        outcome: Result<ResourceHandle, ResourceError>,
    ) -> Result<ResourceHandle, ResourceError> {
        let mut state = lock(&self.state);
        let closed = state.closed;
        let slot = match state.slots.get_mut(&(book_id, kind)) {
            Some(slot) if !closed => slot,
            _ => return self.discard(outcome),
        };

        let current = matches!(&slot.pending, Some((t, _)) if *t == ticket);
        if !current {
            // Another caller sharing this fetch may already have installed it.
            return match (&slot.handle, outcome) {
                (Some(installed), Ok(handle)) if installed.id == handle.id => Ok(handle),
                (_, Err(e)) => Err(e),
                (_, outcome) => self.discard(outcome),
            };
        }

        slot.pending = None;
        match outcome {
            Ok(handle) => {
                if let Some(replaced) = slot.handle.replace(handle.clone()) {
                    self.manager.dispose(&replaced);
                }
                slot.last_error = None;
                Ok(handle)
            }
            Err(e) => {
                slot.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn discard(&self, outcome: Result<ResourceHandle, ResourceError>) -> Result<ResourceHandle, ResourceError> {
        if let Ok(handle) = outcome {
            debug!(book_id = %handle.book_id, kind = handle.kind.as_str(), "Discarding late resource");
            self.manager.dispose(&handle);
        }
        Err(ResourceError::Discarded)
    }

    /// The installed handle of a slot, without fetching.
    pub fn handle(&self, book_id: BookId, kind: ResourceKind) -> Option<ResourceHandle> {
        lock(&self.state)
            .slots
            .get(&(book_id, kind))
            .and_then(|slot| slot.handle.clone())
    }

    /// The error of the slot's last failed fetch, if it has not succeeded since.
    pub fn last_error(&self, book_id: BookId, kind: ResourceKind) -> Option<ResourceError> {
        lock(&self.state)
            .slots
            .get(&(book_id, kind))
            .and_then(|slot| slot.last_error.clone())
    }

    /// Stops needing a slot. Its handle is released; a fetch still in flight
    /// runs to completion and its handle is released on arrival.
    pub fn release(&self, book_id: BookId, kind: ResourceKind) -> bool {
        let slot = lock(&self.state).slots.remove(&(book_id, kind));
        match slot.and_then(|slot| slot.handle) {
            Some(handle) => {
                self.manager.dispose(&handle);
                true
            }
            None => false,
        }
    }

    /// Releases `handle` if it is still the one installed in its slot.
    pub fn release_handle(&self, handle: &ResourceHandle) -> bool {
        let mut state = lock(&self.state);
        let key = (handle.book_id, handle.kind);
        let installed = state
            .slots
            .get(&key)
            .and_then(|slot| slot.handle.as_ref())
            .is_some_and(|installed| installed.id == handle.id);
        if installed {
            if let Some(slot) = state.slots.remove(&key) {
                slot.handle.iter().for_each(|h| self.manager.dispose(h));
            }
        }
        installed
    }

    /// Releases every slot whose book is not in `books`, e.g. after a list
    /// view moved to another page.
    pub fn retain_books(&self, books: &[BookId]) -> usize {
        let mut state = lock(&self.state);
        let stale: Vec<_> = state
            .slots
            .keys()
            .filter(|(book_id, _)| !books.contains(book_id))
            .copied()
            .collect();
        for key in &stale {
            if let Some(handle) = state.slots.remove(key).and_then(|slot| slot.handle) {
                self.manager.dispose(&handle);
            }
        }
        stale.len()
    }

    /// Number of installed handles.
    pub fn len(&self) -> usize {
        lock(&self.state)
            .slots
            .values()
            .filter(|slot| slot.handle.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tears the scope down, releasing every handle. Later fetch results are
    /// discarded. Idempotent.
    pub fn close(&self) {
        let slots = {
            let mut state = lock(&self.state);
            state.closed = true;
            std::mem::take(&mut state.slots)
        };
        let mut released = 0;
        for handle in slots.into_values().filter_map(|slot| slot.handle) {
            self.manager.dispose(&handle);
            released += 1;
        }
        if released > 0 {
            debug!(released, "Resource scope closed");
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.close();
    }
}
