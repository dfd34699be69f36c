//! services/client/src/session.rs
//!
//! The Session Store: the process-wide authentication token and user record,
//! mirrored into durable storage and published to the rest of the client.
//!
//! The store is injected explicitly into the HTTP Client Adapter and the
//! facade; nothing else reads session storage directly.

use library_core::ports::{Navigator, PortResult, SessionStorage};
use library_core::{Route, Session, UserRecord};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::ops::wire::UserPayload;

/// Storage key of the bearer token.
pub const TOKEN_KEY: &str = "token";
/// Storage key of the JSON-encoded user record.
pub const USER_KEY: &str = "user";

//=========================================================================================
// Published State
//=========================================================================================

/// What consumers of the session observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<UserRecord>,
    /// True until `restore` has run once.
    pub loading: bool,
    /// Incremented on every identity change (login, logout, expiry).
    pub epoch: u64,
}

/// The three things a view can do with the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Loading,
    App,
    Login,
}

impl SessionSnapshot {
    pub fn view(&self) -> AppView {
        if self.loading {
            AppView::Loading
        } else if self.user.is_some() {
            AppView::App
        } else {
            AppView::Login
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    session: Session,
    /// Token of a login whose profile has not been fetched yet.
    pending_token: Option<String>,
    loading: bool,
    epoch: u64,
}

//=========================================================================================
// The Store
//=========================================================================================

pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    navigator: Arc<dyn Navigator>,
    state: RwLock<SessionState>,
    published: watch::Sender<SessionSnapshot>,
}

impl SessionStore {
    /// Creates an empty store in the loading state. Call [`restore`](Self::restore)
    /// once at startup.
    pub fn new(storage: Arc<dyn SessionStorage>, navigator: Arc<dyn Navigator>) -> Self {
        let (published, _) = watch::channel(SessionSnapshot {
            user: None,
            loading: true,
            epoch: 0,
        });
        Self {
            storage,
            navigator,
            state: RwLock::new(SessionState {
                loading: true,
                ..SessionState::default()
            }),
            published,
        }
    }

    /// Reads the persisted token and user. A token without a parseable user
    /// (or the reverse) is treated as no session and wiped.
    pub fn restore(&self) -> Option<UserRecord> {
        let restored = match self.read_persisted() {
            Ok(Some((token, user))) => Some(Session::authenticated(token, user)),
            Ok(None) => None,
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                self.wipe_storage();
                None
            }
        };

        {
            let mut state = self.write();
            state.loading = false;
            state.pending_token = None;
            if let Some(session) = restored {
                state.session = session;
                state.epoch += 1;
            }
        }
        self.publish();

        let user = self.user();
        match &user {
            Some(user) => info!(user_id = %user.id, role = user.role.as_str(), "Session restored"),
            None => debug!("No persisted session"),
        }
        user
    }

    fn read_persisted(&self) -> Result<Option<(String, UserRecord)>, String> {
        let token = self.storage.load(TOKEN_KEY).map_err(|e| e.to_string())?;
        let user = self.storage.load(USER_KEY).map_err(|e| e.to_string())?;
        match (token, user) {
            (None, None) => Ok(None),
            (Some(token), Some(user)) if !token.is_empty() => {
                let payload: UserPayload =
                    serde_json::from_str(&user).map_err(|e| format!("user record: {}", e))?;
                let user = payload.into_domain().map_err(|e| e.to_string())?;
                Ok(Some((token, user)))
            }
            _ => Err("token and user record are not both present".to_string()),
        }
    }

    /// The token to attach to outgoing requests. A login that is still
    /// completing wins over the session it is about to replace.
    pub fn token(&self) -> Option<String> {
        let state = self.read();
        state
            .pending_token
            .clone()
            .or_else(|| state.session.token().map(str::to_string))
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.read().session.user().cloned()
    }

    pub fn session(&self) -> Session {
        self.read().session.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.published.subscribe()
    }

    //-------------------------------------------------------------------------------------
    // Transitions
    //-------------------------------------------------------------------------------------

    /// First step of a login: persists the token so the profile request can
    /// authenticate. The in-memory session stays anonymous until
    /// [`establish`](Self::establish).
    pub(crate) fn begin_login(&self, token: &str) -> PortResult<()> {
        self.storage.store(TOKEN_KEY, token)?;
        self.write().pending_token = Some(token.to_string());
        Ok(())
    }

    /// Undoes [`begin_login`](Self::begin_login) when the login cannot complete.
    /// A session that was active before the attempt keeps its persisted token.
    pub(crate) fn abandon_login(&self) {
        let (had_pending, previous) = {
            let mut state = self.write();
            let had_pending = state.pending_token.take().is_some();
            (had_pending, state.session.token().map(str::to_string))
        };
        if !had_pending {
            return;
        }
        let restored = match previous {
            Some(token) => self.storage.store(TOKEN_KEY, &token),
            None => self.storage.remove(TOKEN_KEY),
        };
        if let Err(e) = restored {
            error!("Failed to roll back abandoned login token: {}", e);
        }
    }

    /// Completes a login: persists the user, installs the session and
    /// navigates to the landing route of the user's role.
    pub(crate) fn establish(&self, token: String, user: UserRecord) -> PortResult<Route> {
        self.storage.store(TOKEN_KEY, &token)?;
        self.persist_user(&user)?;
        let route = user.role.landing_route();
        {
            let mut state = self.write();
            info!(user_id = %user.id, role = user.role.as_str(), "Session established");
            state.session = Session::authenticated(token, user);
            state.pending_token = None;
            state.loading = false;
            state.epoch += 1;
        }
        self.publish();
        self.navigator.navigate(route);
        Ok(route)
    }

    /// Replaces the user record of the current session, e.g. after a profile
    /// update. Does nothing without a session.
    pub(crate) fn replace_user(&self, user: UserRecord) -> PortResult<()> {
        if !self.read().session.is_authenticated() {
            return Ok(());
        }
        self.persist_user(&user)?;
        {
            let mut state = self.write();
            let session = std::mem::take(&mut state.session);
            state.session = session.with_user(user);
        }
        self.publish();
        Ok(())
    }

    fn persist_user(&self, user: &UserRecord) -> PortResult<()> {
        let encoded = serde_json::to_string(&UserPayload::from(user))
            .map_err(|e| library_core::PortError::Storage(e.to_string()))?;
        self.storage.store(USER_KEY, &encoded)
    }

    /// Ends the session and sends the user to the login view. Safe to call
    /// without a session.
    pub fn logout(&self) {
        info!("Logging out");
        self.teardown();
    }

    /// Ends the session because the server rejected its credentials.
    pub fn expire(&self) {
        warn!("Session rejected by the server, tearing down");
        self.teardown();
    }

    fn teardown(&self) {
        self.wipe_storage();
        {
            let mut state = self.write();
            state.session = Session::anonymous();
            state.pending_token = None;
            state.loading = false;
            state.epoch += 1;
        }
        self.publish();
        self.navigator.navigate(Route::Login);
    }

    fn wipe_storage(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                error!("Failed to clear '{}' from session storage: {}", key, e);
            }
        }
    }

    fn publish(&self) {
        let snapshot = {
            let state = self.read();
            SessionSnapshot {
                user: state.session.user().cloned(),
                loading: state.loading,
                epoch: state.epoch,
            }
        };
        self.published.send_replace(snapshot);
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryStorage, RecordingNavigator};
    use library_core::{Role, UserId};

    fn admin() -> UserRecord {
        UserRecord {
            id: UserId(1),
            username: "admin01".to_string(),
            email: "admin@example.org".to_string(),
            full_name: "Ada Admin".to_string(),
            gender: None,
            role: Role::Admin,
            contact_number: Some("555-0100".to_string()),
            address: Some("1 Stack St".to_string()),
        }
    }

    fn store() -> (SessionStore, Arc<MemoryStorage>, Arc<RecordingNavigator>) {
        let storage = Arc::new(MemoryStorage::default());
        let navigator = Arc::new(RecordingNavigator::default());
        let store = SessionStore::new(storage.clone(), navigator.clone());
        (store, storage, navigator)
    }

    #[test]
    fn starts_loading_until_restored() {
        let (store, _, _) = store();
        assert_eq!(store.snapshot().view(), AppView::Loading);
        assert_eq!(store.restore(), None);
        assert_eq!(store.snapshot().view(), AppView::Login);
    }

    #[test]
    fn restores_a_persisted_session() {
        let (store, storage, _) = store();
        storage.store(TOKEN_KEY, "abc").unwrap();
        storage
            .store(USER_KEY, &serde_json::to_string(&UserPayload::from(&admin())).unwrap())
            .unwrap();

        assert_eq!(store.restore(), Some(admin()));
        assert_eq!(store.token().as_deref(), Some("abc"));
        assert_eq!(store.snapshot().view(), AppView::App);
    }

    #[test]
    fn pending_login_token_wins_over_the_current_session() {
        let (store, storage, _) = store();
        store.restore();
        store.establish("first".to_string(), admin()).unwrap();

        store.begin_login("second").unwrap();
        assert_eq!(store.token().as_deref(), Some("second"));

        store.abandon_login();
        assert_eq!(store.token().as_deref(), Some("first"));
        assert_eq!(storage.load(TOKEN_KEY).unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn token_with_unparseable_user_fails_safe() {
        let (store, storage, _) = store();
        storage.store(TOKEN_KEY, "abc").unwrap();
        storage.store(USER_KEY, "{not json").unwrap();

        assert_eq!(store.restore(), None);
        assert_eq!(store.token(), None);
        assert_eq!(storage.load(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.load(USER_KEY).unwrap(), None);
    }

    #[test]
    fn token_without_user_is_no_session() {
        let (store, storage, _) = store();
        storage.store(TOKEN_KEY, "orphan").unwrap();
        assert_eq!(store.restore(), None);
        assert_eq!(storage.load(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn establish_persists_and_routes_by_role() {
        let (store, storage, navigator) = store();
        store.restore();
        store.begin_login("tok").unwrap();
        assert_eq!(store.token().as_deref(), Some("tok"));
        assert_eq!(store.user(), None);

        let route = store.establish("tok".to_string(), admin()).unwrap();
        assert_eq!(route, Route::Admin);
        assert_eq!(navigator.routes(), vec![Route::Admin]);
        assert_eq!(storage.load(TOKEN_KEY).unwrap().as_deref(), Some("tok"));
        assert!(storage.load(USER_KEY).unwrap().is_some());
        assert_eq!(store.snapshot().epoch, 1);
    }

    #[test]
    fn abandoned_login_leaves_no_token() {
        let (store, storage, _) = store();
        store.begin_login("tok").unwrap();
        store.abandon_login();
        assert_eq!(store.token(), None);
        assert_eq!(storage.load(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn logout_is_idempotent() {
        let (store, storage, navigator) = store();
        store.establish("tok".to_string(), admin()).unwrap();

        store.logout();
        store.logout();

        assert_eq!(store.user(), None);
        assert_eq!(store.token(), None);
        assert_eq!(storage.load(USER_KEY).unwrap(), None);
        assert_eq!(navigator.routes(), vec![Route::Admin, Route::Login, Route::Login]);
    }

    #[test]
    fn replace_user_requires_a_session() {
        let (store, storage, _) = store();
        store.replace_user(admin()).unwrap();
        assert_eq!(store.user(), None);
        assert_eq!(storage.load(USER_KEY).unwrap(), None);

        store.establish("tok".to_string(), admin()).unwrap();
        let renamed = UserRecord {
            full_name: "Ada L.".to_string(),
            ..admin()
        };
        store.replace_user(renamed.clone()).unwrap();
        assert_eq!(store.user(), Some(renamed));
    }

    #[tokio::test]
    async fn subscribers_see_identity_changes() {
        let (store, _, _) = store();
        let mut rx = store.subscribe();
        store.restore();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().loading);

        store.establish("tok".to_string(), admin()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().user.as_ref().map(|u| u.id), Some(UserId(1)));
    }
}
