//! services/client/src/http_client.rs
//!
//! The HTTP Client Adapter. Every call to the remote API goes through here:
//! bearer credentials are attached from the Session Store, bodies are
//! negotiated as JSON or multipart, JSON envelopes are validated against the
//! `success` contract, binary payloads are checked for their content type,
//! and any 401 tears the session down.

use bytes::Bytes;
use library_core::ports::{FormPart, HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};
use library_core::ResourceKind;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::session::SessionStore;

/// Per-call behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Whether a 401 answer ends the session. Off for the public
    /// authentication endpoints, where it only means "bad credentials".
    pub intercept_unauthorized: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            intercept_unauthorized: true,
        }
    }
}

impl CallOptions {
    pub fn public() -> Self {
        Self {
            intercept_unauthorized: false,
        }
    }
}

/// A validated binary response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    pub bytes: Bytes,
    pub content_type: String,
    /// File name announced by `Content-Disposition`, if any.
    pub file_name: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, session: Arc<SessionStore>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    //-------------------------------------------------------------------------------------
    // JSON calls
    //-------------------------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RequestError> {
        let mut request = HttpRequest::new(Method::Get, path);
        for (name, value) in query {
            request = request.query(*name, value.clone());
        }
        let response = self.execute(request, CallOptions::default()).await?;
        decode_envelope(&response)
    }

    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: CallOptions,
    ) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = match body {
            Some(body) => RequestBody::Json(Bytes::from(
                serde_json::to_vec(body).map_err(|e| RequestError::Protocol(e.to_string()))?,
            )),
            None => RequestBody::Empty,
        };
        let response = self
            .execute(HttpRequest::new(method, path).body(body), options)
            .await?;
        decode_envelope(&response)
    }

    pub async fn send_multipart<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        parts: Vec<FormPart>,
    ) -> Result<T, RequestError> {
        let request = HttpRequest::new(method, path).body(RequestBody::Multipart(parts));
        let response = self.execute(request, CallOptions::default()).await?;
        decode_envelope(&response)
    }

    //-------------------------------------------------------------------------------------
    // Binary calls
    //-------------------------------------------------------------------------------------

    /// Fetches a book artefact. The envelope check is skipped, but the
    /// declared content type must match `kind`.
    pub async fn get_binary(&self, path: &str, kind: ResourceKind) -> Result<BinaryPayload, RequestError> {
        let mut request = HttpRequest::new(Method::Get, path);
        request.set_header("Accept", kind.accept());
        let response = self.execute(request, CallOptions::default()).await?;

        let content_type = response.content_type().map(str::to_string);
        match content_type {
            Some(content_type) if kind.accepts(&content_type) => Ok(BinaryPayload {
                file_name: response.header("content-disposition").and_then(disposition_file_name),
                bytes: response.body.clone(),
                content_type,
            }),
            actual => {
                warn!(path, expected = kind.accept(), actual = ?actual, "Binary response has the wrong content type");
                Err(RequestError::InvalidFileFormat {
                    expected: kind.accept().to_string(),
                    actual,
                })
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // Shared pipeline
    //-------------------------------------------------------------------------------------

    /// Sends a request and returns its 2xx response. Every other status is
    /// turned into an error here; 401 also ends the session.
    async fn execute(&self, mut request: HttpRequest, options: CallOptions) -> Result<HttpResponse, RequestError> {
        if let Some(token) = self.session.token() {
            request.set_header("Authorization", format!("Bearer {}", token));
        }
        if request.body.is_multipart() {
            request.remove_header("Content-Type");
        } else {
            request.set_header("Content-Type", "application/json");
        }
        if request.header("Accept").is_none() {
            request.set_header("Accept", "application/json");
        }

        let method = request.method;
        let path = request.path.clone();
        let response = self.transport.send(request).await.map_err(|e| {
            warn!(%method, path = %path, error = %e, "Request failed");
            RequestError::from(e)
        })?;
        debug!(%method, path = %path, status = response.status, "API call finished");

        if response.status == 401 && options.intercept_unauthorized {
            self.session.expire();
            return Err(RequestError::Unauthorized);
        }
        if response.is_success() {
            return Ok(response);
        }

        let message = error_message(&response.body);
        Err(match (response.status, message) {
            (_, Some(message)) => RequestError::Business(message),
            (401, None) => RequestError::Unauthorized,
            (404, None) => RequestError::NotFound("Resource not found".to_string()),
            (status, None) => RequestError::Status(status),
        })
    }
}

/// Validates the `success` envelope of a JSON response and decodes it.
fn decode_envelope<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, RequestError> {
    let document: Value = serde_json::from_slice(&response.body).map_err(|e| {
        warn!(status = response.status, error = %e, "Response is not JSON");
        RequestError::Protocol(format!("response is not JSON: {}", e))
    })?;

    match document.get("success").and_then(Value::as_bool) {
        Some(true) => {}
        Some(false) => {
            return Err(RequestError::Business(
                message_of(&document).unwrap_or_else(|| "The request was not successful".to_string()),
            ))
        }
        None => {
            warn!(status = response.status, "Response lacks a boolean success indicator");
            return Err(RequestError::Protocol("missing success indicator".to_string()));
        }
    }

    serde_json::from_value(document).map_err(|e| {
        warn!(error = %e, "Response payload has an unexpected shape");
        RequestError::Protocol(format!("unexpected payload: {}", e))
    })
}

fn message_of(document: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|field| document.get(*field).and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(message_of)
}

/// Extracts the file name of a `Content-Disposition` header. The extended
/// `filename*=charset'lang'value` form wins over a plain `filename=`.
pub fn disposition_file_name(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for param in header.split(';').skip(1) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "filename*" => extended = extended_value(value.trim()),
            "filename" => plain = Some(value.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }
    extended.or(plain).filter(|name| !name.is_empty())
}

fn extended_value(value: &str) -> Option<String> {
    let mut fields = value.trim_matches('"').splitn(3, '\'');
    let charset = fields.next()?;
    let encoded = fields.nth(1)?;
    let decoded = percent_decode_str(encoded);
    if charset.eq_ignore_ascii_case("utf-8") {
        decoded.decode_utf8().ok().map(|name| name.into_owned())
    } else {
        Some(decoded.decode_utf8_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryStorage, RecordingNavigator};
    use crate::ops::wire::MessageEnvelope;
    use crate::session::TOKEN_KEY;
    use async_trait::async_trait;
    use library_core::ports::{PortError, PortResult, SessionStorage};
    use library_core::{Role, Route, UserId, UserRecord};
    use std::sync::Mutex;

    /// Answers every request with the same response and remembers the requests.
    struct FixedTransport {
        response: PortResult<HttpResponse>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl FixedTransport {
        fn new(response: PortResult<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                response,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn send(&self, request: HttpRequest) -> PortResult<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            self.response.clone()
        }
    }

    fn json(status: u16, body: &str) -> PortResult<HttpResponse> {
        Ok(HttpResponse::new(status, body.to_string()).with_header("Content-Type", "application/json"))
    }

    fn user() -> UserRecord {
        UserRecord {
            id: UserId(2),
            username: "reader02".to_string(),
            email: String::new(),
            full_name: String::new(),
            gender: None,
            role: Role::Reader,
            contact_number: None,
            address: None,
        }
    }

    fn client(
        response: PortResult<HttpResponse>,
    ) -> (ApiClient, Arc<FixedTransport>, Arc<MemoryStorage>, Arc<RecordingNavigator>) {
        let transport = FixedTransport::new(response);
        let storage = Arc::new(MemoryStorage::default());
        let navigator = Arc::new(RecordingNavigator::default());
        let session = Arc::new(SessionStore::new(storage.clone(), navigator.clone()));
        session.restore();
        (ApiClient::new(transport.clone(), session), transport, storage, navigator)
    }

    #[tokio::test]
    async fn attaches_bearer_token_and_json_content_type() {
        let (api, transport, _, _) = client(json(200, r#"{"success":true}"#));
        api.session().establish("t0k".to_string(), user()).unwrap();

        let _: MessageEnvelope = api.get("/bookmarks", &[]).await.unwrap();

        let sent = transport.last();
        assert_eq!(sent.header("Authorization"), Some("Bearer t0k"));
        assert_eq!(sent.header("Content-Type"), Some("application/json"));
        assert_eq!(sent.header("Accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn anonymous_requests_carry_no_credentials() {
        let (api, transport, _, _) = client(json(200, r#"{"success":true}"#));
        let _: MessageEnvelope = api.get("/categories", &[]).await.unwrap();
        assert_eq!(transport.last().header("Authorization"), None);
    }

    #[tokio::test]
    async fn multipart_requests_leave_content_type_to_the_transport() {
        let (api, transport, _, _) = client(json(200, r#"{"success":true}"#));
        let _: MessageEnvelope = api
            .send_multipart(Method::Put, "/books/4", vec![FormPart::text("title", "Emma")])
            .await
            .unwrap();
        assert_eq!(transport.last().header("Content-Type"), None);
    }

    #[tokio::test]
    async fn missing_success_indicator_is_a_protocol_error() {
        let (api, _, _, _) = client(json(200, r#"{"books":[]}"#));
        let err = api.get::<MessageEnvelope>("/books/all", &[]).await.unwrap_err();
        assert!(matches!(err, RequestError::Protocol(_)));
    }

    #[tokio::test]
    async fn unsuccessful_envelope_carries_the_server_message() {
        let (api, _, _, _) = client(json(200, r#"{"success":false,"error":"Book not found"}"#));
        let err = api.get::<MessageEnvelope>("/books/9", &[]).await.unwrap_err();
        assert_eq!(err, RequestError::Business("Book not found".to_string()));
    }

    #[tokio::test]
    async fn error_status_with_message_is_a_business_error() {
        let (api, _, _, _) = client(json(409, r#"{"success":false,"error":"Category exists"}"#));
        let err = api
            .send_json::<_, MessageEnvelope>(
                Method::Post,
                "/categories",
                Some(&serde_json::json!({"category_name": "Poetry"})),
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Business("Category exists".to_string()));
    }

    #[tokio::test]
    async fn unauthorized_tears_the_session_down() {
        let (api, _, storage, navigator) = client(json(401, r#"{"success":false,"error":"Token expired"}"#));
        api.session().establish("t0k".to_string(), user()).unwrap();

        let err = api.get::<MessageEnvelope>("/bookmarks", &[]).await.unwrap_err();

        assert_eq!(err, RequestError::Unauthorized);
        assert_eq!(api.session().user(), None);
        assert_eq!(storage.load(TOKEN_KEY).unwrap(), None);
        assert_eq!(navigator.last(), Some(Route::Login));
    }

    #[tokio::test]
    async fn public_calls_do_not_intercept_unauthorized() {
        let (api, _, _, navigator) = client(json(401, r#"{"success":false,"error":"Invalid credentials"}"#));
        let err = api
            .send_json::<_, MessageEnvelope>(
                Method::Post,
                "/auth/login",
                Some(&serde_json::json!({"username": "x", "password": "y"})),
                CallOptions::public(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Business("Invalid credentials".to_string()));
        assert_eq!(navigator.last(), None);
    }

    #[tokio::test]
    async fn binary_with_matching_type_is_returned_with_its_file_name() {
        let response = Ok(HttpResponse::new(200, &b"%PDF-1.7"[..])
            .with_header("Content-Type", "application/pdf")
            .with_header("Content-Disposition", r#"attachment; filename="dune.pdf""#));
        let (api, transport, _, _) = client(response);

        let payload = api.get_binary("/books/1/download", ResourceKind::Content).await.unwrap();

        assert_eq!(payload.file_name.as_deref(), Some("dune.pdf"));
        assert_eq!(&payload.bytes[..], b"%PDF-1.7");
        assert_eq!(transport.last().header("Accept"), Some("application/pdf"));
    }

    #[tokio::test]
    async fn binary_with_wrong_type_is_an_invalid_file() {
        let response = Ok(HttpResponse::new(200, "<html>oops</html>").with_header("Content-Type", "text/html"));
        let (api, _, _, _) = client(response);
        let err = api.get_binary("/books/42/cover", ResourceKind::Cover).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::InvalidFileFormat {
                expected: "image/*".to_string(),
                actual: Some("text/html".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn transport_failures_are_reported_as_such() {
        let (api, _, _, _) = client(Err(PortError::Transport("connection refused".to_string())));
        let err = api.get::<MessageEnvelope>("/categories", &[]).await.unwrap_err();
        assert_eq!(err, RequestError::Transport("connection refused".to_string()));
    }

    #[test]
    fn disposition_names_are_unquoted() {
        assert_eq!(disposition_file_name(r#"attachment; filename="a b.pdf""#).as_deref(), Some("a b.pdf"));
        assert_eq!(disposition_file_name("attachment; filename=x.pdf; size=3").as_deref(), Some("x.pdf"));
        assert_eq!(disposition_file_name("inline"), None);
    }

    #[test]
    fn extended_disposition_names_are_decoded_and_preferred() {
        assert_eq!(
            disposition_file_name("attachment; filename=\"Cafe.pdf\"; filename*=UTF-8''Caf%C3%A9%20Noir.pdf").as_deref(),
            Some("Café Noir.pdf")
        );
        assert_eq!(
            disposition_file_name("attachment; filename*=utf-8'en'%E6%9B%B8.pdf").as_deref(),
            Some("書.pdf")
        );
        assert_eq!(
            disposition_file_name("attachment; filename=\"plain.pdf\"; filename*=UTF-8''%FF").as_deref(),
            Some("plain.pdf")
        );
    }
}
