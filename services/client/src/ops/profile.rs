//! services/client/src/ops/profile.rs

use library_core::ports::Method;
use library_core::{ProfilePatch, UserId, UserRecord};
use serde::Serialize;

use super::wire::{UserEnvelope, UserPayload};
use super::Reply;
use crate::error::RequestError;
use crate::http_client::{ApiClient, CallOptions};

#[derive(Serialize)]
struct ProfileBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gender: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
}

impl<'a> From<&'a ProfilePatch> for ProfileBody<'a> {
    fn from(patch: &'a ProfilePatch) -> Self {
        Self {
            username: patch.username.as_deref(),
            email: patch.email.as_deref(),
            full_name: patch.full_name.as_deref(),
            gender: patch.gender.map(|g| g.as_str()),
            contact_number: patch.contact_number.as_deref(),
            address: patch.address.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct ProfileApi {
    api: ApiClient,
}

impl ProfileApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Reads a full profile. `None` when the server confirms without a user.
    pub async fn get(&self, id: UserId) -> Result<Option<UserRecord>, RequestError> {
        let envelope: UserEnvelope = self.api.get(&format!("/profile/{}", id), &[]).await?;
        envelope.user.map(UserPayload::into_domain).transpose()
    }

    /// Submits changed fields. Returns the server's view of the user when it
    /// sends one back.
    pub async fn update(&self, id: UserId, patch: &ProfilePatch) -> Result<Reply<Option<UserRecord>>, RequestError> {
        let envelope: UserEnvelope = self
            .api
            .send_json(
                Method::Put,
                &format!("/profile/{}", id),
                Some(&ProfileBody::from(patch)),
                CallOptions::default(),
            )
            .await?;
        let user = envelope.user.map(UserPayload::into_domain).transpose()?;
        Ok(Reply::new(user, envelope.message))
    }
}
