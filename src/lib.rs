//! Credential-authentication core: account registration and bearer-token
//! login over a durable user store.
//!
//! Passwords are stored as Argon2 digests, personal profile fields as
//! per-field AES-256-GCM envelopes wrapped by a managed key, and successful
//! logins return HS256-signed access tokens. The HTTP layer is out of scope;
//! embedders construct an [`AuthService`] and call
//! [`register`](AuthService::register) / [`login`](AuthService::login)
//! directly.

pub mod cipher;
pub mod config;
pub mod dto;
pub mod error;
pub mod password;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod token;
pub mod user;

pub use config::AppConfig;
pub use dto::{LoginRequest, RegisterRequest, RegisterResponse, TokenResponse};
pub use error::{AuthError, AuthResult};
pub use service::AuthService;
