//! services/client/src/adapters/http.rs
//!
//! This module contains the adapter for the remote library API over `reqwest`.
//! It implements the `HttpTransport` port from the `core` crate.

use async_trait::async_trait;
use library_core::ports::{
    FormValue, HttpRequest, HttpResponse, HttpTransport, Method, PortError, PortResult, RequestBody,
};
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that sends raw requests to the API below `base_url`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Creates a new `ReqwestTransport`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn to_form(parts: Vec<library_core::FormPart>) -> PortResult<Form> {
    let mut form = Form::new();
    for part in parts {
        form = match part.value {
            FormValue::Text(text) => form.text(part.name, text),
            FormValue::File(upload) => {
                let file = Part::bytes(upload.bytes.to_vec())
                    .file_name(upload.file_name)
                    .mime_str(&upload.content_type)
                    .map_err(|e| PortError::Unexpected(format!("invalid upload content type: {}", e)))?;
                form.part(part.name, file)
            }
        };
    }
    Ok(form)
}

//=========================================================================================
// `HttpTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> PortResult<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let url = self.url(&request.path);

        let mut builder = self.client.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder.body(bytes),
            RequestBody::Multipart(parts) => builder.multipart(to_form(parts)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        debug!(method = %request.method, url = %url, status, bytes = body.len(), "Response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use library_core::{FileUpload, FormPart};
    use wiremock::matchers::{body_string, header, header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> ReqwestTransport {
        ReqwestTransport::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn forwards_query_headers_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/categories/3"))
            .and(query_param("verbose", "1"))
            .and(header("authorization", "Bearer t0k"))
            .and(body_string(r#"{"category_name":"Poetry"}"#))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"success":true}"#),
            )
            .mount(&server)
            .await;

        let mut request = HttpRequest::new(Method::Put, "/categories/3")
            .query("verbose", "1")
            .body(RequestBody::Json(Bytes::from_static(br#"{"category_name":"Poetry"}"#)));
        request.set_header("Authorization", "Bearer t0k");
        request.set_header("Content-Type", "application/json");

        let response = transport(&server).send(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(&response.body[..], br#"{"success":true}"#);
    }

    #[tokio::test]
    async fn multipart_bodies_carry_their_own_boundary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/books"))
            .and(header_regex("content-type", "^multipart/form-data; boundary="))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"success":true}"#))
            .mount(&server)
            .await;

        let request = HttpRequest::new(Method::Post, "/books").body(RequestBody::Multipart(vec![
            FormPart::text("title", "Dune"),
            FormPart::file(
                "book_file",
                FileUpload {
                    file_name: "dune.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    bytes: Bytes::from_static(b"%PDF-1.7"),
                },
            ),
        ]));

        let response = transport(&server).send(request).await.unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn escaped_path_segments_reach_the_server_intact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/categories/books/Sci%5CFi"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success":true,"books":[]}"#))
            .mount(&server)
            .await;

        let response = transport(&server)
            .send(HttpRequest::new(Method::Get, "/categories/books/Sci%5CFi"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn error_statuses_are_responses_not_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bookmarks"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"success":false,"error":"expired"}"#))
            .mount(&server)
            .await;

        let response = transport(&server)
            .send(HttpRequest::new(Method::Get, "/bookmarks"))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let transport = ReqwestTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = transport
            .send(HttpRequest::new(Method::Get, "/books/all"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Transport(_)));
    }
}
