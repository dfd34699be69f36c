//! services/client/src/ops/users.rs

use library_core::ports::Method;
use library_core::{PasswordChange, UserId, UserRecord};
use serde::Serialize;

use super::wire::{collect, MessageEnvelope, UserPayload, UsersEnvelope};
use super::Reply;
use crate::error::RequestError;
use crate::http_client::{ApiClient, CallOptions};

#[derive(Serialize)]
struct PasswordBody<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

/// User administration and the user's own credentials.
#[derive(Clone)]
pub struct UsersApi {
    api: ApiClient,
}

impl UsersApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<UserRecord>, RequestError> {
        let envelope: UsersEnvelope = self.api.get("/users", &[]).await?;
        collect(envelope.users, UserPayload::into_domain)
    }

    pub async fn delete(&self, id: UserId) -> Result<Reply<()>, RequestError> {
        let envelope: MessageEnvelope = self
            .api
            .send_json::<(), _>(Method::Delete, &format!("/users/{}", id), None, CallOptions::default())
            .await?;
        Ok(Reply::new((), envelope.message))
    }

    pub async fn change_password(&self, change: &PasswordChange) -> Result<Reply<()>, RequestError> {
        let body = PasswordBody {
            current_password: &change.current_password,
            new_password: &change.new_password,
        };
        let envelope: MessageEnvelope = self
            .api
            .send_json(Method::Post, "/users/change-password", Some(&body), CallOptions::default())
            .await?;
        Ok(Reply::new((), envelope.message))
    }
}
