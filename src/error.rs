//! Boundary error taxonomy for the auth flows.

use serde_json::json;
use thiserror::Error;

/// The only outcomes registration and login surface to callers.
///
/// Internal component failures (store, key service, signing) are collapsed
/// into `Internal`; no stack detail or credential material crosses this
/// boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("email already registered")]
    AlreadyExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// HTTP status an embedding transport should map this error to.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::Validation(_) => 400,
            AuthError::AlreadyExists => 409,
            AuthError::InvalidCredentials => 401,
            AuthError::Internal(_) => 500,
        }
    }

    /// JSON body for the error response, `{"error": "..."}`.
    pub fn body(&self) -> serde_json::Value {
        json!({ "error": self.to_string() })
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
