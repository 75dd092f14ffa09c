//! Identity resolution and document access.
//!
//! Tokens are HS256 JWTs issued by the editor's account service. The claims
//! carry the user's identity directly, so no user lookup is needed here.

use crate::config::AccessConfig;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use scribe_core::{DocumentId, UserInfo};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication token required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
}

/// Resolves a bearer token into the user it was issued to.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<UserInfo, AuthError>;
}

/// Decides whether a user may view a document.
pub trait DocumentAccess: Send + Sync {
    fn can_view(&self, user: &UserInfo, document_id: &DocumentId) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub exp: u64,
}

/// Validates HS256 tokens against a shared secret.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserInfo, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(AuthError::InvalidToken)?;
        let Claims {
            user_id,
            username,
            email,
            ..
        } = data.claims;
        Ok(UserInfo::new(user_id, username, email))
    }
}

/// Access policy built from the `[access]` configuration section.
#[derive(Debug, Clone)]
pub struct ConfigAccessPolicy {
    default_allow: bool,
    documents: HashMap<String, HashSet<String>>,
}

impl ConfigAccessPolicy {
    #[must_use]
    pub fn new(config: &AccessConfig) -> Self {
        let mut documents: HashMap<String, HashSet<String>> = HashMap::new();
        for allowlist in &config.documents {
            documents
                .entry(allowlist.document.clone())
                .or_default()
                .extend(allowlist.users.iter().cloned());
        }

        Self {
            default_allow: config.default_allow,
            documents,
        }
    }
}

impl DocumentAccess for ConfigAccessPolicy {
    fn can_view(&self, user: &UserInfo, document_id: &DocumentId) -> bool {
        match self.documents.get(document_id.as_str()) {
            Some(allowed) => allowed.contains(&user.user_id),
            None => self.default_allow,
        }
    }
}

/// Find the token of a request: the `token` query parameter first, then an
/// `Authorization: Bearer` header.
pub fn extract_token(query: Option<&str>, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query.filter(|token| !token.is_empty()) {
        return Ok(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::MissingToken)
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, user: &UserInfo, expires_in_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = Claims {
        user_id: user.user_id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        exp: (now + expires_in_secs).max(0) as u64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
