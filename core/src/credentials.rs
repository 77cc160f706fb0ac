//! Authorization headers.

use std::fmt;

use crate::error::HttpClientError;

/// Supplies the authorization header for every call.
///
/// Called once per attempt, so providers that rotate tokens externally are
/// picked up on the next retry.
pub trait CredentialProvider: Send + Sync {
    /// Header name and value, e.g. `("authorization", "Bearer ...")`.
    fn authorization_header(&self) -> Result<(String, String), HttpClientError>;
}

/// A fixed bearer token.
#[derive(Clone)]
pub struct Token {
    token: String,
}

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("token", &"***").finish()
    }
}

impl CredentialProvider for Token {
    fn authorization_header(&self) -> Result<(String, String), HttpClientError> {
        if self.token.is_empty() {
            return Err(HttpClientError::Credentials("token is empty".to_string()));
        }
        Ok(("authorization".to_string(), format!("Bearer {}", self.token)))
    }
}
