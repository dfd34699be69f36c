//! Shared fixture of the integration tests: a `Library` wired to a scripted
//! API and in-memory ports.

#![allow(dead_code)]

use client_lib::adapters::{MemoryStorage, RecordingNavigator, RecordingNotifier, ScriptedTransport};
use client_lib::cache::CacheConfig;
use client_lib::config::Config;
use client_lib::{Library, LibraryPorts};
use library_core::ports::{HttpResponse, Method};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct Harness {
    pub api: Arc<ScriptedTransport>,
    pub storage: Arc<MemoryStorage>,
    pub navigator: Arc<RecordingNavigator>,
    pub notifier: Arc<RecordingNotifier>,
    pub library: Library,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::default()))
    }

    /// A harness whose session starts from what `storage` already holds.
    pub fn with_storage(storage: Arc<MemoryStorage>) -> Self {
        let api = Arc::new(ScriptedTransport::new());
        let navigator = Arc::new(RecordingNavigator::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let config = Config {
            cache: CacheConfig {
                retries: 0,
                ..CacheConfig::default()
            },
            ..Config::default()
        };
        let library = Library::new(
            config,
            LibraryPorts {
                transport: api.clone(),
                storage: storage.clone(),
                navigator: navigator.clone(),
                notifier: notifier.clone(),
            },
        );
        Self {
            api,
            storage,
            navigator,
            notifier,
            library,
        }
    }

    /// Scripts a successful login of `username` with the given role and logs in.
    pub async fn login_as(&self, id: i64, username: &str, role: &str) {
        self.script_login(id, username, role);
        assert!(self.library.login(username, "secret").await, "login should succeed");
    }

    pub fn script_login(&self, id: i64, username: &str, role: &str) {
        self.api.reset(Method::Post, "/auth/login");
        self.api.json(
            Method::Post,
            "/auth/login",
            200,
            json!({
                "success": true,
                "token": format!("token-{}", username),
                "user": { "id": id, "username": username, "role": role }
            }),
        );
        self.api.json(
            Method::Get,
            &format!("/profile/{}", id),
            200,
            json!({ "success": true, "user": user_json(id, username, role) }),
        );
    }

    pub fn ok(&self, method: Method, path: &str, body: Value) {
        self.api.json(method, path, 200, body);
    }

    pub fn books(&self, path: &str, books: Value) {
        self.ok(Method::Get, path, json!({ "success": true, "books": books }));
    }

    pub fn binary(&self, path: &str, content_type: &str, body: &'static [u8]) {
        self.api.respond(
            Method::Get,
            path,
            HttpResponse::new(200, body).with_header("Content-Type", content_type),
        );
    }
}

pub fn user_json(id: i64, username: &str, role: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{}@library.test", username),
        "full_name": format!("{} Example", username),
        "gender": "female",
        "role": role,
        "contact_number": if role == "admin" { json!("555-0100") } else { Value::Null },
        "address": if role == "admin" { json!("1 Library Way") } else { Value::Null },
    })
}

pub fn book_json(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "author": "Frank Herbert",
        "category_id": 3,
        "category_name": "Fiction",
        "description": "",
        "created_at": "2024-02-01 10:30:00",
        "cover_image_path": format!("uploads/{}/cover.jpg", id),
        "file_path": format!("uploads/{}/book.pdf", id)
    })
}
