//! services/client/src/ops/auth.rs
//!
//! The public authentication endpoints. A 401 here means bad credentials, not
//! an expired session, so these calls bypass the global interception.

use library_core::ports::Method;
use library_core::{Registration, UserRecord};
use serde::Serialize;

use super::wire::{LoginEnvelope, MessageEnvelope};
use super::Reply;
use crate::error::RequestError;
use crate::http_client::{ApiClient, CallOptions};

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegistrationBody<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
    full_name: &'a str,
    gender: &'static str,
    role: &'static str,
}

/// A token and the (possibly partial) user record issued at login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub token: String,
    pub user: UserRecord,
}

#[derive(Clone)]
pub struct AuthApi {
    api: ApiClient,
}

impl AuthApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginGrant, RequestError> {
        let body = LoginBody { username, password };
        let envelope: LoginEnvelope = self
            .api
            .send_json(Method::Post, "/auth/login", Some(&body), CallOptions::public())
            .await?;
        if envelope.token.trim().is_empty() {
            return Err(RequestError::Protocol("login response carries an empty token".to_string()));
        }
        Ok(LoginGrant {
            token: envelope.token,
            user: envelope.user.into_domain()?,
        })
    }

    pub async fn register(&self, registration: &Registration) -> Result<Reply<()>, RequestError> {
        let body = RegistrationBody {
            username: &registration.username,
            email: &registration.email,
            password: &registration.password,
            full_name: &registration.full_name,
            gender: registration.gender.as_str(),
            role: registration.role.as_str(),
        };
        let envelope: MessageEnvelope = self
            .api
            .send_json(Method::Post, "/auth/register", Some(&body), CallOptions::public())
            .await?;
        Ok(Reply::new((), envelope.message))
    }
}
