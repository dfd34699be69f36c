//! services/client/src/adapters/memory.rs
//!
//! In-memory implementations of the ports, for embedding the client without a
//! disk, a UI or a server, and for tests.

use async_trait::async_trait;
use library_core::ports::{
    HttpRequest, HttpResponse, HttpTransport, Method, Navigator, Notifier, PortError, PortResult,
    SessionStorage,
};
use library_core::{Notice, Route};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Session storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl SessionStorage for MemoryStorage {
    fn load(&self, key: &str) -> PortResult<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> PortResult<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Remembers every route it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<Route> {
        lock(&self.routes).clone()
    }

    pub fn last(&self) -> Option<Route> {
        lock(&self.routes).last().copied()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        lock(&self.routes).push(route);
    }
}

/// Remembers every notice it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }

    pub fn last(&self) -> Option<Notice> {
        lock(&self.notices).last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }
}

/// An API stand-in answering from scripted responses per (method, path).
///
/// Queued responses are consumed in order; the last one keeps answering.
/// Unscripted routes answer `404` with an error envelope.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<PortResult<HttpResponse>>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, response: HttpResponse) {
        self.push(method, path, Ok(response));
    }

    /// Queues a JSON answer.
    pub fn json(&self, method: Method, path: &str, status: u16, body: serde_json::Value) {
        let response =
            HttpResponse::new(status, body.to_string()).with_header("Content-Type", "application/json");
        self.respond(method, path, response);
    }

    pub fn fail(&self, method: Method, path: &str, error: PortError) {
        self.push(method, path, Err(error));
    }

    fn push(&self, method: Method, path: &str, response: PortResult<HttpResponse>) {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Drops every queued answer of a route.
    pub fn reset(&self, method: Method, path: &str) {
        lock(&self.routes).remove(&(method, path.to_string()));
    }

    /// Delays every answer, so concurrent callers overlap.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self, method: Method, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn answer(&self, method: Method, path: &str) -> PortResult<HttpResponse> {
        let mut routes = lock(&self.routes);
        match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(PortError::Unexpected("empty script".to_string()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(PortError::Unexpected("empty script".to_string()))),
            None => Ok(HttpResponse::new(
                404,
                serde_json::json!({ "success": false, "error": format!("No route for {} {}", method, path) })
                    .to_string(),
            )
            .with_header("Content-Type", "application/json")),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> PortResult<HttpResponse> {
        let (method, path) = (request.method, request.path.clone());
        lock(&self.requests).push(request);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.answer(method, &path)
    }
}
