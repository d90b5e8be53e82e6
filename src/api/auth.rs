//! Request authentication for the mini-app and admin surfaces

use super::handlers::AppError;
use super::AppState;
use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Verified platform identity of a mini-app caller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token rejected: {0}")]
    Rejected(String),
    #[error("Identity service unreachable: {0}")]
    Client(String),
}

/// Resolves an opaque bearer credential to an identity
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, access_token: &str) -> Result<Identity, AuthError>;
}

/// Verifies mini-app access tokens against the LINE platform: token check
/// first, then the profile lookup.
pub struct LineTokenVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl LineTokenVerifier {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for LineTokenVerifier {
    async fn verify(&self, access_token: &str) -> Result<Identity, AuthError> {
        let verify = self
            .client
            .get(format!("{}/oauth2/v2.1/verify", self.base_url))
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| AuthError::Client(e.to_string()))?;
        if !verify.status().is_success() {
            let body = verify.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(body));
        }

        let profile = self
            .client
            .get(format!("{}/v2/profile", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Client(e.to_string()))?;
        if !profile.status().is_success() {
            let body = profile.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(body));
        }

        profile
            .json::<Identity>()
            .await
            .map_err(|e| AuthError::Client(format!("malformed profile: {e}")))
    }
}

/// Extractor for an authenticated mini-app caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("authorization header is missing".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("invalid authorization header format".to_string()))?;

        match state.verifier.verify(token).await {
            Ok(identity) => Ok(AuthUser(identity)),
            Err(e) => {
                tracing::warn!(error = %e, "Mini-app token verification failed");
                Err(AppError::Unauthorized("invalid token".to_string()))
            }
        }
    }
}

/// Extractor guarding the admin endpoints
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

pub const ADMIN_KEY_HEADER: &str = "x-api-key";

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_api_key.as_deref() else {
            return Err(AppError::Unavailable(
                "admin endpoints not configured".to_string(),
            ));
        };

        let provided = match parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(key) => Some(key.to_string()),
            None => Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(mut q)| q.remove("api_key")),
        };

        if provided.as_deref() == Some(expected) {
            Ok(AdminKey)
        } else {
            Err(AppError::Unauthorized(
                "invalid or missing API key".to_string(),
            ))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Accepts `token-<userId>` and answers with a display name of `<userId>`
    pub struct StaticVerifier;

    #[async_trait]
    impl IdentityVerifier for StaticVerifier {
        async fn verify(&self, access_token: &str) -> Result<Identity, AuthError> {
            access_token
                .strip_prefix("token-")
                .map(|user_id| Identity {
                    user_id: user_id.to_string(),
                    display_name: format!("{user_id} name"),
                })
                .ok_or_else(|| AuthError::Rejected("unknown token".to_string()))
        }
    }
}
